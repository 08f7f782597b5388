//! ETA projection from the vehicle's latest GPS sample, with time-of-day
//! traffic buffers and a short per-visit cache.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::distance::DistanceService;
use crate::domain::{Location, VehicleId, VisitId};
use crate::error::Result;
use crate::store::Store;
use crate::tracking::location::LocationTracker;
use crate::traffic;

/// Cached ETAs are reused for this long.
pub const CACHE_TTL_SECONDS: i64 = 300;
/// An ETA shift at or beyond this gates downstream notifications.
pub const SIGNIFICANT_CHANGE_MINUTES: f64 = 10.0;
/// Projected arrivals later than planned by more than this are "delayed".
pub const DELAYED_AFTER_MINUTES: f64 = 5.0;

#[derive(Debug, Clone, Serialize)]
pub struct EtaDetails {
    pub visit_id: VisitId,
    pub vehicle_id: VehicleId,
    pub current_location: Location,
    pub location_timestamp: DateTime<Utc>,
    pub destination: Location,
    pub distance_km: f64,
    pub base_duration_minutes: f64,
    pub traffic_multiplier: f64,
    pub traffic_period: &'static str,
    pub buffered_duration_minutes: f64,
    pub eta: DateTime<Utc>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub delay_minutes: Option<f64>,
    pub is_delayed: bool,
}

pub struct EtaCalculator {
    store: Arc<Store>,
    distance: Arc<DistanceService>,
    locations: Arc<LocationTracker>,
    cache: Mutex<HashMap<VisitId, (DateTime<Utc>, DateTime<Utc>)>>, // eta, cached_at
}

impl EtaCalculator {
    pub fn new(
        store: Arc<Store>,
        distance: Arc<DistanceService>,
        locations: Arc<LocationTracker>,
    ) -> Self {
        Self {
            store,
            distance,
            locations,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Projects the arrival instant, or `None` when the vehicle has no
    /// location data or the distance service cannot resolve the pair.
    pub async fn eta(
        &self,
        visit_id: VisitId,
        vehicle_id: VehicleId,
        use_cache: bool,
    ) -> Result<Option<DateTime<Utc>>> {
        if use_cache {
            if let Some((eta, cached_at)) = self.cache.lock().get(&visit_id).copied() {
                if (Utc::now() - cached_at).num_seconds() < CACHE_TTL_SECONDS {
                    return Ok(Some(eta));
                }
            }
        }

        let Some(details) = self.project(visit_id, vehicle_id).await? else {
            return Ok(None);
        };

        self.cache
            .lock()
            .insert(visit_id, (details.eta, Utc::now()));
        Ok(Some(details.eta))
    }

    /// Full projection report for the tracking API and the delay detector.
    pub async fn eta_details(
        &self,
        visit_id: VisitId,
        vehicle_id: VehicleId,
    ) -> Result<Option<EtaDetails>> {
        self.project(visit_id, vehicle_id).await
    }

    /// Recomputes without cache and compares with the cached value. Returns
    /// `(is_significant, change_minutes)`; a first computation is always
    /// significant.
    pub async fn significant_change(
        &self,
        visit_id: VisitId,
        vehicle_id: VehicleId,
    ) -> Result<(bool, Option<f64>)> {
        let cached = self.cache.lock().get(&visit_id).map(|(eta, _)| *eta);

        let Some(new_eta) = self.eta(visit_id, vehicle_id, false).await? else {
            return Ok((false, None));
        };

        match cached {
            None => Ok((true, None)),
            Some(old) => {
                let change = (new_eta - old).num_seconds() as f64 / 60.0;
                Ok((change.abs() >= SIGNIFICANT_CHANGE_MINUTES, Some(change)))
            }
        }
    }

    pub fn invalidate(&self, visit_id: Option<VisitId>) {
        let mut cache = self.cache.lock();
        match visit_id {
            Some(id) => {
                cache.remove(&id);
            }
            None => cache.clear(),
        }
    }

    async fn project(
        &self,
        visit_id: VisitId,
        vehicle_id: VehicleId,
    ) -> Result<Option<EtaDetails>> {
        let visit = self.store.visit(visit_id)?;
        let case = self.store.case(visit.case_id)?;

        let Some(sample) = self.locations.current(vehicle_id)? else {
            return Ok(None);
        };

        let travel = match self
            .distance
            .travel_time(sample.location, case.location)
            .await
        {
            Ok(t) => t,
            Err(_) => return Ok(None),
        };

        let period = traffic::period_at(sample.timestamp.time());
        let multiplier = period.multiplier();
        let buffered_seconds = travel.duration_seconds * multiplier;
        let eta = sample.timestamp + TimeDelta::seconds(buffered_seconds as i64);

        let delay_minutes = visit
            .estimated_arrival
            .map(|planned| (eta - planned).num_seconds() as f64 / 60.0);

        Ok(Some(EtaDetails {
            visit_id,
            vehicle_id,
            current_location: sample.location,
            location_timestamp: sample.timestamp,
            destination: case.location,
            distance_km: (travel.distance_km() * 100.0).round() / 100.0,
            base_duration_minutes: (travel.duration_minutes() * 10.0).round() / 10.0,
            traffic_multiplier: multiplier,
            traffic_period: period.label(),
            buffered_duration_minutes: (buffered_seconds / 60.0 * 10.0).round() / 10.0,
            eta,
            estimated_arrival: visit.estimated_arrival,
            delay_minutes: delay_minutes.map(|d| (d * 10.0).round() / 10.0),
            is_delayed: delay_minutes.is_some_and(|d| d > DELAYED_AFTER_MINUTES),
        }))
    }
}
