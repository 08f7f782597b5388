//! Delay detection: projected vs. planned arrivals, severity tiers, per-route
//! statistics and time-window violation reports.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::domain::{CaseId, RouteId, VehicleId, Visit, VisitId, VisitStatus};
use crate::error::Result;
use crate::store::Store;
use crate::tracking::eta::EtaCalculator;

pub const MINOR_THRESHOLD_MINUTES: f64 = 5.0;
pub const MODERATE_THRESHOLD_MINUTES: f64 = 15.0;
pub const SEVERE_THRESHOLD_MINUTES: f64 = 30.0;

/// A visit is not re-checked within this window unless forced.
pub const CHECK_INTERVAL_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DelaySeverity {
    Minor,
    Moderate,
    Severe,
}

impl DelaySeverity {
    pub fn classify(delay_minutes: f64) -> Self {
        if delay_minutes >= SEVERE_THRESHOLD_MINUTES {
            DelaySeverity::Severe
        } else if delay_minutes >= MODERATE_THRESHOLD_MINUTES {
            DelaySeverity::Moderate
        } else {
            DelaySeverity::Minor
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DelayAlert {
    pub visit_id: VisitId,
    pub route_id: RouteId,
    pub vehicle_id: VehicleId,
    pub case_id: CaseId,
    pub severity: DelaySeverity,
    pub delay_minutes: f64,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub current_eta: DateTime<Utc>,
    pub message: String,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DelayStatistics {
    pub route_id: RouteId,
    pub total_visits: usize,
    pub on_time: usize,
    pub minor_delays: usize,
    pub moderate_delays: usize,
    pub severe_delays: usize,
    pub average_delay_minutes: f64,
    pub max_delay_minutes: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeWindowViolation {
    pub visit_id: VisitId,
    pub case_id: CaseId,
    pub time_window_end: DateTime<Utc>,
    pub current_eta: DateTime<Utc>,
    pub minutes_over_window: f64,
    pub severity: &'static str,
}

pub struct DelayDetector {
    store: Arc<Store>,
    eta: Arc<EtaCalculator>,
    last_check: Mutex<HashMap<VisitId, DateTime<Utc>>>,
}

impl DelayDetector {
    pub fn new(store: Arc<Store>, eta: Arc<EtaCalculator>) -> Self {
        Self {
            store,
            eta,
            last_check: Mutex::new(HashMap::new()),
        }
    }

    fn is_active(status: VisitStatus) -> bool {
        matches!(
            status,
            VisitStatus::Pending | VisitStatus::EnRoute | VisitStatus::Arrived
        )
    }

    /// Checks one visit; `None` when recently checked, on time, or lacking
    /// the data to project.
    pub async fn check_visit(
        &self,
        visit_id: VisitId,
        vehicle_id: VehicleId,
        force: bool,
    ) -> Result<Option<DelayAlert>> {
        if !force {
            if let Some(last) = self.last_check.lock().get(&visit_id).copied() {
                if (Utc::now() - last).num_minutes() < CHECK_INTERVAL_MINUTES {
                    return Ok(None);
                }
            }
        }

        let visit = self.store.visit(visit_id)?;
        if visit.estimated_arrival.is_none() {
            return Ok(None);
        }

        let Some(details) = self.eta.eta_details(visit_id, vehicle_id).await? else {
            return Ok(None);
        };

        self.last_check.lock().insert(visit_id, Utc::now());

        let Some(delay_minutes) = details.delay_minutes else {
            return Ok(None);
        };
        if delay_minutes < MINOR_THRESHOLD_MINUTES {
            return Ok(None);
        }

        let severity = DelaySeverity::classify(delay_minutes);
        Ok(Some(DelayAlert {
            visit_id,
            route_id: visit.route_id,
            vehicle_id,
            case_id: visit.case_id,
            severity,
            delay_minutes,
            estimated_arrival: visit.estimated_arrival,
            current_eta: details.eta,
            message: delay_message(delay_minutes, severity),
            detected_at: Utc::now(),
        }))
    }

    /// Scans every non-terminal visit of a route.
    pub async fn detect_route(&self, route_id: RouteId) -> Result<Vec<DelayAlert>> {
        let route = self.store.route(route_id)?;
        let mut alerts = Vec::new();
        for visit in self.store.visits_of_route(route_id) {
            if Self::is_active(visit.status) {
                if let Some(alert) = self.check_visit(visit.id, route.vehicle_id, false).await? {
                    alerts.push(alert);
                }
            }
        }
        Ok(alerts)
    }

    /// On-time / delayed breakdown: completed visits use actual minus planned
    /// arrival, active ones the live projection.
    pub async fn statistics(&self, route_id: RouteId) -> Result<DelayStatistics> {
        let route = self.store.route(route_id)?;
        let visits = self.store.visits_of_route(route_id);

        let mut stats = DelayStatistics {
            route_id,
            total_visits: visits.len(),
            on_time: 0,
            minor_delays: 0,
            moderate_delays: 0,
            severe_delays: 0,
            average_delay_minutes: 0.0,
            max_delay_minutes: 0.0,
        };

        let mut delays: Vec<f64> = Vec::new();

        for visit in &visits {
            if visit.status == VisitStatus::Completed {
                if let Some(delay) = historical_delay(visit) {
                    delays.push(delay);
                    if delay < MINOR_THRESHOLD_MINUTES {
                        stats.on_time += 1;
                    } else if delay < MODERATE_THRESHOLD_MINUTES {
                        stats.minor_delays += 1;
                    } else if delay < SEVERE_THRESHOLD_MINUTES {
                        stats.moderate_delays += 1;
                    } else {
                        stats.severe_delays += 1;
                    }
                }
            } else if Self::is_active(visit.status) {
                match self.check_visit(visit.id, route.vehicle_id, true).await? {
                    Some(alert) => {
                        delays.push(alert.delay_minutes);
                        match alert.severity {
                            DelaySeverity::Minor => stats.minor_delays += 1,
                            DelaySeverity::Moderate => stats.moderate_delays += 1,
                            DelaySeverity::Severe => stats.severe_delays += 1,
                        }
                    }
                    None => stats.on_time += 1,
                }
            }
        }

        if !delays.is_empty() {
            let sum: f64 = delays.iter().sum();
            stats.average_delay_minutes =
                (sum / delays.len() as f64 * 10.0).round() / 10.0;
            stats.max_delay_minutes =
                (delays.iter().cloned().fold(f64::MIN, f64::max) * 10.0).round() / 10.0;
        }

        Ok(stats)
    }

    /// Active visits whose projection lands after the case's window end.
    pub async fn time_window_violations(
        &self,
        route_id: RouteId,
    ) -> Result<Vec<TimeWindowViolation>> {
        let route = self.store.route(route_id)?;
        let mut violations = Vec::new();

        for visit in self.store.visits_of_route(route_id) {
            if !Self::is_active(visit.status) {
                continue;
            }
            let case = self.store.case(visit.case_id)?;
            let Some(details) = self.eta.eta_details(visit.id, route.vehicle_id).await? else {
                continue;
            };

            let window_end = route
                .route_date
                .and_time(case.time_window.end)
                .and_utc();

            if details.eta > window_end {
                let minutes_over = (details.eta - window_end).num_seconds() as f64 / 60.0;
                violations.push(TimeWindowViolation {
                    visit_id: visit.id,
                    case_id: case.id,
                    time_window_end: window_end,
                    current_eta: details.eta,
                    minutes_over_window: (minutes_over * 10.0).round() / 10.0,
                    severity: if minutes_over > 30.0 { "critical" } else { "warning" },
                });
            }
        }

        Ok(violations)
    }

    pub fn clear_check_cache(&self) {
        self.last_check.lock().clear();
    }
}

fn historical_delay(visit: &Visit) -> Option<f64> {
    let actual = visit.actual_arrival?;
    let planned = visit.estimated_arrival?;
    Some((actual - planned).num_seconds() as f64 / 60.0)
}

fn delay_message(delay_minutes: f64, severity: DelaySeverity) -> String {
    let rounded = delay_minutes.round() as i64;
    match severity {
        DelaySeverity::Severe => format!(
            "Retraso grave: {rounded} minutos de demora. Se requiere acción inmediata."
        ),
        DelaySeverity::Moderate => format!(
            "Retraso moderado: {rounded} minutos de demora. Considere ajustar la ruta."
        ),
        DelaySeverity::Minor => format!("Retraso leve: {rounded} minutos de demora."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceService;
    use crate::domain::{
        Case, CaseStatus, Location, Priority, TimeWindow, TimeWindowType, Vehicle, VehicleStatus,
    };
    use crate::store::{NewRoute, NewVisit};
    use crate::tracking::location::LocationTracker;
    use chrono::{NaiveDate, NaiveTime};

    struct Fixture {
        store: Arc<Store>,
        tracker: Arc<LocationTracker>,
        detector: DelayDetector,
        vehicle_id: VehicleId,
        route_id: RouteId,
        visit_id: VisitId,
    }

    fn stamp(hour: u32, minute: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2025, 6, 2)
            .unwrap()
            .and_time(NaiveTime::from_hms_opt(hour, minute, 0).unwrap())
            .and_utc()
    }

    fn fixture(planned_arrival: DateTime<Utc>) -> Fixture {
        let store = Arc::new(Store::new());
        let vehicle = store
            .insert_vehicle(Vehicle {
                id: 0,
                identifier: "AMB-01".to_string(),
                capacity_personnel: 3,
                base_location: Location::new(-33.4489, -70.6693).unwrap(),
                status: VehicleStatus::Available,
                resources: Default::default(),
                is_active: true,
            })
            .unwrap();
        let case = store.insert_case(Case {
            id: 0,
            patient_id: 1,
            care_type_id: 1,
            scheduled_date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            time_window_type: TimeWindowType::Am,
            time_window: TimeWindow::new(
                NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            )
            .unwrap(),
            location: Location::new(-33.4372, -70.6506).unwrap(),
            priority: Priority::Medium,
            status: CaseStatus::Assigned,
            estimated_duration_minutes: 30,
            notes: None,
        });
        let route_ids = store
            .persist_optimization(
                vec![NewRoute {
                    vehicle_id: vehicle.id,
                    route_date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
                    total_distance_km: 2.0,
                    total_duration_minutes: 40,
                    personnel: vec![],
                    metadata: None,
                    visits: vec![NewVisit {
                        case_id: case.id,
                        estimated_arrival: Some(planned_arrival),
                        estimated_departure: None,
                        distance_from_previous_km: 2.0,
                        travel_minutes_from_previous: 5,
                    }],
                }],
                vec![],
            )
            .unwrap();
        let route_id = route_ids[0];
        let visit_id = store.visits_of_route(route_id)[0].id;

        let distance = Arc::new(DistanceService::geodesic_only());
        let tracker = Arc::new(LocationTracker::new(Arc::clone(&store)));
        let eta = Arc::new(EtaCalculator::new(
            Arc::clone(&store),
            distance,
            Arc::clone(&tracker),
        ));
        let detector = DelayDetector::new(Arc::clone(&store), eta);

        Fixture {
            store,
            tracker,
            detector,
            vehicle_id: vehicle.id,
            route_id,
            visit_id,
        }
    }

    #[test]
    fn severity_tiers() {
        assert_eq!(DelaySeverity::classify(5.0), DelaySeverity::Minor);
        assert_eq!(DelaySeverity::classify(14.9), DelaySeverity::Minor);
        assert_eq!(DelaySeverity::classify(15.0), DelaySeverity::Moderate);
        assert_eq!(DelaySeverity::classify(29.9), DelaySeverity::Moderate);
        assert_eq!(DelaySeverity::classify(30.0), DelaySeverity::Severe);
        assert_eq!(DelaySeverity::classify(90.0), DelaySeverity::Severe);
    }

    #[tokio::test]
    async fn late_vehicle_raises_a_severe_alert() {
        // Planned 08:00, vehicle still at base at 09:30.
        let f = fixture(stamp(8, 0));
        f.tracker
            .record(
                f.vehicle_id,
                -33.4489,
                -70.6693,
                None,
                None,
                None,
                Some(stamp(9, 30)),
            )
            .unwrap();

        let alert = f
            .detector
            .check_visit(f.visit_id, f.vehicle_id, true)
            .await
            .unwrap()
            .expect("delay expected");
        assert_eq!(alert.severity, DelaySeverity::Severe);
        assert!(alert.delay_minutes >= 30.0);
        assert!(alert.message.contains("Retraso grave"));
    }

    #[tokio::test]
    async fn rate_limit_suppresses_rechecks() {
        let f = fixture(stamp(8, 0));
        f.tracker
            .record(
                f.vehicle_id,
                -33.4489,
                -70.6693,
                None,
                None,
                None,
                Some(stamp(9, 30)),
            )
            .unwrap();

        assert!(f
            .detector
            .check_visit(f.visit_id, f.vehicle_id, false)
            .await
            .unwrap()
            .is_some());
        // Second unforced check inside the interval returns nothing.
        assert!(f
            .detector
            .check_visit(f.visit_id, f.vehicle_id, false)
            .await
            .unwrap()
            .is_none());
        // Forced check still reports.
        assert!(f
            .detector
            .check_visit(f.visit_id, f.vehicle_id, true)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn statistics_cover_completed_and_active_visits() {
        let f = fixture(stamp(8, 0));
        // Mark the visit completed with a 20-minute late actual arrival.
        f.store
            .with_visit_mut(f.visit_id, |v| {
                v.status = VisitStatus::Completed;
                v.actual_arrival = Some(stamp(8, 20));
                v.actual_departure = Some(stamp(8, 50));
            })
            .unwrap();

        let stats = f.detector.statistics(f.route_id).await.unwrap();
        assert_eq!(stats.total_visits, 1);
        assert_eq!(stats.moderate_delays, 1);
        assert_eq!(stats.average_delay_minutes, 20.0);
        assert_eq!(stats.max_delay_minutes, 20.0);
    }

    #[tokio::test]
    async fn window_violation_is_critical_past_thirty_minutes() {
        let f = fixture(stamp(8, 0));
        // Sample at 13:00: any projection lands past the 12:00 window end.
        f.tracker
            .record(
                f.vehicle_id,
                -33.4489,
                -70.6693,
                None,
                None,
                None,
                Some(stamp(13, 0)),
            )
            .unwrap();

        let violations = f.detector.time_window_violations(f.route_id).await.unwrap();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].minutes_over_window > 30.0);
        assert_eq!(violations[0].severity, "critical");
    }

    #[tokio::test]
    async fn no_location_data_means_no_alerts() {
        let f = fixture(stamp(8, 0));
        assert!(f
            .detector
            .check_visit(f.visit_id, f.vehicle_id, true)
            .await
            .unwrap()
            .is_none());
        assert!(f.detector.detect_route(f.route_id).await.unwrap().is_empty());
    }
}
