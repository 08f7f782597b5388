//! Optimization orchestration: loads entities, acquires matrices, runs the
//! solver off the async runtime, and persists the outcome atomically.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime, Utc};
use tracing::{info, warn};

use crate::distance::DistanceService;
use crate::domain::{Case as CaseRow, CaseId, Location, VehicleId};
use crate::error::{Error, Result};
use crate::optimizer::solver::GuidedSearchStrategy;
use crate::optimizer::types::{
    Case, ConstraintViolation, OptimizationRequest, OptimizationResult, Personnel, Vehicle,
    WORK_START_HOUR,
};
use crate::store::{NewRoute, NewVisit, OptimizationMetrics, Store};
use crate::traffic;

pub struct OptimizationService {
    store: Arc<Store>,
    distance: Arc<DistanceService>,
}

/// Outcome of a run: the solver result plus ids of the persisted routes.
pub struct OptimizationOutcome {
    pub result: OptimizationResult,
    pub route_ids: Vec<i64>,
}

impl OptimizationService {
    pub fn new(store: Arc<Store>, distance: Arc<DistanceService>) -> Self {
        Self { store, distance }
    }

    pub async fn optimize_routes(
        &self,
        case_ids: &[CaseId],
        vehicle_ids: &[VehicleId],
        date: NaiveDate,
        use_heuristic: bool,
        max_time_secs: u64,
    ) -> Result<OptimizationOutcome> {
        info!(
            cases = case_ids.len(),
            vehicles = vehicle_ids.len(),
            %date,
            "optimization started"
        );

        if use_heuristic {
            // The guided-search strategy is always used in the primary flow;
            // partial success is preferred to a strategy switch.
            info!("use_heuristic requested; primary strategy is used regardless");
        }

        let cases_db = self.store.plannable_cases(case_ids);
        if cases_db.len() != case_ids.len() {
            return Ok(OptimizationOutcome {
                result: OptimizationResult::failure(
                    "guided_search",
                    Vec::new(),
                    vec![ConstraintViolation::infeasible(format!(
                        "some cases not found or have invalid status; found {} of {} \
                         (cases must be pending or assigned)",
                        cases_db.len(),
                        case_ids.len()
                    ))],
                    "invalid cases",
                ),
                route_ids: Vec::new(),
            });
        }

        let vehicles_db = self.store.active_vehicles(vehicle_ids);
        if vehicles_db.len() != vehicle_ids.len() {
            return Ok(OptimizationOutcome {
                result: OptimizationResult::failure(
                    "guided_search",
                    Vec::new(),
                    vec![ConstraintViolation::infeasible(
                        "some vehicles not found or not active",
                    )],
                    "invalid vehicles",
                ),
                route_ids: Vec::new(),
            });
        }

        let personnel_db = self.store.active_personnel();
        if personnel_db.is_empty() {
            return Ok(OptimizationOutcome {
                result: OptimizationResult::failure(
                    "guided_search",
                    Vec::new(),
                    vec![ConstraintViolation::infeasible(
                        "no active personnel available",
                    )],
                    "no personnel available",
                ),
                route_ids: Vec::new(),
            });
        }

        let cases = self.convert_cases(&cases_db)?;
        let vehicles: Vec<Vehicle> = vehicles_db
            .iter()
            .map(|v| Vehicle {
                id: v.id,
                identifier: v.identifier.clone(),
                capacity: v.capacity_personnel,
                base_location: v.base_location,
            })
            .collect();
        let personnel: Vec<Personnel> = personnel_db
            .iter()
            .map(|p| Personnel {
                id: p.id,
                name: p.name.clone(),
                skills: p.skills.clone(),
            })
            .collect();

        let (distance_km, time_minutes) = self.build_matrices(&cases, &vehicles, date).await?;

        let request = OptimizationRequest {
            cases,
            vehicles,
            personnel,
            date,
            distance_km: Some(distance_km),
            time_minutes: Some(time_minutes),
            max_optimization_time_secs: max_time_secs,
            use_heuristic,
        };

        // CPU-bound solve runs on the blocking pool; this task suspends.
        let result = tokio::task::spawn_blocking(move || GuidedSearchStrategy::optimize(&request))
            .await
            .map_err(|e| Error::Internal(format!("solver task failed: {e}")))?;

        let route_ids = if result.success {
            self.persist(&result, date)?
        } else {
            Vec::new()
        };

        info!(
            success = result.success,
            routes = result.routes.len(),
            unassigned = result.unassigned_cases.len(),
            strategy = result.strategy_used,
            "optimization finished"
        );

        Ok(OptimizationOutcome { result, route_ids })
    }

    fn convert_cases(&self, cases_db: &[CaseRow]) -> Result<Vec<Case>> {
        cases_db
            .iter()
            .map(|row| {
                let patient = self.store.patient(row.patient_id)?;
                let care_type = self.store.care_type(row.care_type_id)?;
                let duration = if row.estimated_duration_minutes > 0 {
                    row.estimated_duration_minutes
                } else {
                    care_type.estimated_duration_minutes
                };
                Ok(Case {
                    id: row.id,
                    patient_id: row.patient_id,
                    patient_name: patient.name,
                    location: row.location,
                    required_skills: care_type.required_skills,
                    time_window: row.time_window,
                    priority: row.priority,
                    estimated_duration_minutes: duration,
                })
            })
            .collect()
    }

    /// Distance (km) and time (minutes) matrices over `[depots..., cases...]`.
    ///
    /// With a traffic-capable head provider the durations come back already
    /// buffered for a departure of 08:00 on the route date. Otherwise the
    /// cached provider durations are inflated post-hoc by the time-of-day
    /// multiplier for that departure; the cache itself stays unbuffered.
    async fn build_matrices(
        &self,
        cases: &[Case],
        vehicles: &[Vehicle],
        date: NaiveDate,
    ) -> Result<(Vec<Vec<f64>>, Vec<Vec<i64>>)> {
        let locations: Vec<Location> = vehicles
            .iter()
            .map(|v| v.base_location)
            .chain(cases.iter().map(|c| c.location))
            .collect();

        let departure = date
            .and_time(NaiveTime::from_hms_opt(WORK_START_HOUR, 0, 0).expect("valid time"))
            .and_utc();

        let (matrix, buffered) = if self.distance.traffic_capable() {
            match self
                .distance
                .calculate_matrix_with_traffic(&locations, departure.timestamp())
                .await
            {
                Ok(m) => (m, true),
                Err(e) => {
                    warn!("traffic-aware matrix failed: {e}; using fallback chain");
                    (self.distance.calculate_matrix(&locations, None, false).await?, false)
                }
            }
        } else {
            (self.distance.calculate_matrix(&locations, None, false).await?, false)
        };

        let multiplier = if buffered {
            1.0
        } else {
            traffic::period_at(departure.time()).multiplier()
        };

        let n = locations.len();
        let mut distance_km = vec![vec![0.0; n]; n];
        let mut time_minutes = vec![vec![0i64; n]; n];
        for i in 0..n {
            for j in 0..n {
                let tt = matrix.travel_time(i, j);
                distance_km[i][j] = tt.distance_km();
                time_minutes[i][j] = (tt.duration_minutes() * multiplier) as i64;
            }
        }

        Ok((distance_km, time_minutes))
    }

    /// One transaction: routes, personnel joins, visits, case statuses and
    /// metrics rows (per route plus overall).
    fn persist(&self, result: &OptimizationResult, date: NaiveDate) -> Result<Vec<i64>> {
        let metadata = result.summary();

        let new_routes: Vec<NewRoute> = result
            .routes
            .iter()
            .map(|route| NewRoute {
                vehicle_id: route.vehicle.id,
                route_date: date,
                total_distance_km: route.total_distance_km,
                total_duration_minutes: route.total_time_minutes,
                personnel: route.personnel.iter().map(|p| p.id).collect(),
                metadata: Some(metadata.clone()),
                visits: route
                    .visits
                    .iter()
                    .map(|v| NewVisit {
                        case_id: v.case.id,
                        estimated_arrival: Some(v.arrival.and_utc()),
                        estimated_departure: Some(v.departure.and_utc()),
                        distance_from_previous_km: v.distance_km_from_previous,
                        travel_minutes_from_previous: v.travel_minutes_from_previous,
                    })
                    .collect(),
            })
            .collect();

        let mut metrics = Vec::new();
        if let Some(analysis) = &result.skill_gap_analysis {
            let gaps = serde_json::to_value(analysis)
                .map_err(|e| Error::Internal(e.to_string()))?;
            let row = |route_id: Option<i64>| OptimizationMetrics {
                id: 0,
                route_id,
                optimization_date: date,
                optimization_timestamp: Utc::now(),
                strategy_used: result.strategy_used.to_string(),
                total_cases_requested: analysis.summary.total_cases_requested,
                total_cases_assigned: analysis.summary.total_cases_assigned,
                total_cases_unassigned: analysis.summary.total_cases_unassigned,
                assignment_rate_percentage: analysis.summary.assignment_rate_percentage,
                optimization_time_seconds: result.optimization_time_seconds,
                total_distance_km: result.total_distance_km,
                total_time_minutes: result.total_time_minutes,
                skill_gaps: gaps.clone(),
            };
            // Placeholder route ids are rewritten by the store in route order.
            for _ in &new_routes {
                metrics.push(row(Some(0)));
            }
            metrics.push(row(None));
        }

        let route_ids = self.store.persist_optimization(new_routes, metrics)?;

        // Remaining unassigned cases keep their previous status; assigned
        // ones were flipped inside the transaction.
        let assigned: HashSet<CaseId> = result
            .routes
            .iter()
            .flat_map(|r| r.visits.iter().map(|v| v.case.id))
            .collect();
        info!(
            routes = route_ids.len(),
            assigned = assigned.len(),
            "persisted optimization outcome"
        );

        Ok(route_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::domain::{
        Case as CaseRow, CaseStatus, CareType, Patient, Personnel as PersonnelRow, Priority,
        TimeWindow, TimeWindowType, Vehicle as VehicleRow, VehicleStatus,
    };
    use chrono::NaiveTime;

    fn seeded() -> (Arc<Store>, OptimizationService, Vec<CaseId>, Vec<VehicleId>) {
        let store = Arc::new(Store::new());
        let distance = Arc::new(DistanceService::new(&Config::default(), Arc::clone(&store)));
        let service = OptimizationService::new(Arc::clone(&store), distance);

        store.insert_skill("nurse");
        let care_type = store.insert_care_type(CareType {
            id: 0,
            name: "Curación simple".to_string(),
            estimated_duration_minutes: 30,
            required_skills: ["nurse".to_string()].into_iter().collect(),
        });
        let patient = store
            .insert_patient(Patient {
                id: 0,
                name: "María Pérez".to_string(),
                rut: Some("12.345.678-5".to_string()),
                phone: None,
                email: None,
                home_location: Location::new(-33.4372, -70.6506).unwrap(),
                address: "Av. Italia 850".to_string(),
            })
            .unwrap();
        let vehicle = store
            .insert_vehicle(VehicleRow {
                id: 0,
                identifier: "AMB-01".to_string(),
                capacity_personnel: 3,
                base_location: Location::new(-33.4489, -70.6693).unwrap(),
                status: VehicleStatus::Available,
                resources: Default::default(),
                is_active: true,
            })
            .unwrap();
        store.insert_personnel(PersonnelRow {
            id: 0,
            name: "Carla Soto".to_string(),
            skills: ["nurse".to_string()].into_iter().collect(),
            work_start: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            work_end: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            start_location: None,
            is_active: true,
        });
        let case = store.insert_case(CaseRow {
            id: 0,
            patient_id: patient.id,
            care_type_id: care_type.id,
            scheduled_date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            time_window_type: TimeWindowType::Am,
            time_window: TimeWindow::new(
                NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            )
            .unwrap(),
            location: patient.home_location,
            priority: Priority::Medium,
            status: CaseStatus::Pending,
            estimated_duration_minutes: 30,
            notes: None,
        });

        (store, service, vec![case.id], vec![vehicle.id])
    }

    #[tokio::test]
    async fn end_to_end_optimize_persists_a_route() {
        let (store, service, case_ids, vehicle_ids) = seeded();
        let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();

        let outcome = service
            .optimize_routes(&case_ids, &vehicle_ids, date, false, 1)
            .await
            .unwrap();

        assert!(outcome.result.success);
        assert_eq!(outcome.route_ids.len(), 1);

        let route = store.route(outcome.route_ids[0]).unwrap();
        assert_eq!(route.status, crate::domain::RouteStatus::Draft);
        assert_eq!(route.assigned_personnel.len(), 1);

        let visits = store.visits_of_route(route.id);
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].sequence_number, 0);
        assert!(visits[0].estimated_arrival.is_some());

        // Case flipped to assigned inside the same transaction.
        assert_eq!(
            store.case(case_ids[0]).unwrap().status,
            CaseStatus::Assigned
        );

        // Per-route and overall metrics rows.
        assert_eq!(store.metrics().len(), 2);
    }

    #[tokio::test]
    async fn unknown_case_ids_fail_without_raising() {
        let (_store, service, _case_ids, vehicle_ids) = seeded();
        let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();

        let outcome = service
            .optimize_routes(&[9999], &vehicle_ids, date, false, 1)
            .await
            .unwrap();

        assert!(!outcome.result.success);
        assert!(outcome.route_ids.is_empty());
    }
}
