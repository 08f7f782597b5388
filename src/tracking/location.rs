//! GPS ingestion and location queries.
//!
//! Writes per vehicle are serialized through a per-vehicle lock so the
//! "current" sample stays monotonic in timestamp.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::domain::{Location, LocationLog, VehicleId};
use crate::error::{Error, Result};
use crate::geo;
use crate::store::Store;

/// Samples older than this are dropped by [`LocationTracker::cleanup`].
pub const RETENTION_DAYS: i64 = 90;
pub const HISTORY_LIMIT_MAX: usize = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct NearbyVehicle {
    pub vehicle_id: VehicleId,
    pub location: Location,
    pub speed_kmh: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub distance_meters: f64,
}

pub struct LocationTracker {
    store: Arc<Store>,
    vehicle_locks: Mutex<HashMap<VehicleId, Arc<Mutex<()>>>>,
}

impl LocationTracker {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            vehicle_locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, vehicle_id: VehicleId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.vehicle_locks
                .lock()
                .entry(vehicle_id)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Validates and appends one GPS sample.
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        vehicle_id: VehicleId,
        latitude: f64,
        longitude: f64,
        speed_kmh: Option<f64>,
        heading_degrees: Option<f64>,
        accuracy_meters: Option<f64>,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<LocationLog> {
        let location = Location::new(latitude, longitude)?;

        if speed_kmh.is_some_and(|s| s < 0.0) {
            return Err(Error::invalid("speed cannot be negative"));
        }
        if heading_degrees.is_some_and(|h| !(0.0..=360.0).contains(&h)) {
            return Err(Error::invalid("heading must be between 0 and 360 degrees"));
        }
        if accuracy_meters.is_some_and(|a| a < 0.0) {
            return Err(Error::invalid("accuracy cannot be negative"));
        }

        let lock = self.lock_for(vehicle_id);
        let _guard = lock.lock();
        self.store.append_location(
            vehicle_id,
            location,
            speed_kmh,
            heading_degrees,
            accuracy_meters,
            timestamp.unwrap_or_else(Utc::now),
        )
    }

    /// Most recent sample, if any.
    pub fn current(&self, vehicle_id: VehicleId) -> Result<Option<LocationLog>> {
        // Unknown vehicles are an error; a known vehicle with no samples is not.
        self.store.vehicle(vehicle_id)?;
        Ok(self.store.latest_location(vehicle_id))
    }

    /// Samples newest-first, capped at 1000.
    pub fn history(
        &self,
        vehicle_id: VehicleId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<LocationLog>> {
        self.store.vehicle(vehicle_id)?;
        let limit = limit.clamp(1, HISTORY_LIMIT_MAX);
        Ok(self.store.location_history(vehicle_id, start, end, limit))
    }

    /// Freshest-per-vehicle samples within the geodesic circle and age bound.
    pub fn nearby(
        &self,
        latitude: f64,
        longitude: f64,
        radius_meters: f64,
        max_age_minutes: i64,
    ) -> Result<Vec<NearbyVehicle>> {
        let center = Location::new(latitude, longitude)?;
        let cutoff = Utc::now() - TimeDelta::minutes(max_age_minutes);

        let mut nearby: Vec<NearbyVehicle> = self
            .store
            .latest_locations_since(cutoff)
            .into_iter()
            .filter_map(|log| {
                let distance = geo::haversine(center, log.location);
                (distance <= radius_meters).then_some(NearbyVehicle {
                    vehicle_id: log.vehicle_id,
                    location: log.location,
                    speed_kmh: log.speed_kmh,
                    timestamp: log.timestamp,
                    distance_meters: (distance * 100.0).round() / 100.0,
                })
            })
            .collect();
        nearby.sort_by(|a, b| a.distance_meters.total_cmp(&b.distance_meters));
        Ok(nearby)
    }

    /// Drops samples older than the retention period; returns how many.
    pub fn cleanup(&self, days: Option<i64>) -> usize {
        let cutoff = Utc::now() - TimeDelta::days(days.unwrap_or(RETENTION_DAYS));
        self.store.delete_locations_before(cutoff)
    }
}
