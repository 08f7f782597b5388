//! In-memory document store standing in for the relational layer.
//!
//! The rest of the crate only needs a transactional key-value surface over
//! its entities, and this module provides it. A single `RwLock` over the data
//! makes multi-entity writes atomic: [`Store::persist_optimization`] validates
//! everything first and mutates only after validation passes, so a failed
//! commit leaves no partial state behind.

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::{
    Case, CaseId, CaseStatus, CareType, CareTypeId, LocationLog, LocationLogId, Patient,
    PatientId, Personnel, PersonnelId, Route, RouteId, RouteStatus, Skill, SkillId, Vehicle,
    VehicleId, Visit, VisitId, VisitStatus, Location,
};
use crate::error::{Error, Result};

/// Cached distance matrix row, as stored in the `distance_cache` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistanceCacheRecord {
    pub cache_key: String,
    pub distances_meters: Vec<Vec<f64>>,
    pub durations_seconds: Vec<Vec<f64>>,
    pub provider: String,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Optimization metrics row, one per route plus one overall per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationMetrics {
    pub id: i64,
    pub route_id: Option<RouteId>,
    pub optimization_date: NaiveDate,
    pub optimization_timestamp: DateTime<Utc>,
    pub strategy_used: String,
    pub total_cases_requested: usize,
    pub total_cases_assigned: usize,
    pub total_cases_unassigned: usize,
    pub assignment_rate_percentage: f64,
    pub optimization_time_seconds: f64,
    pub total_distance_km: f64,
    pub total_time_minutes: i64,
    pub skill_gaps: serde_json::Value,
}

/// Input for one route in an optimization commit.
#[derive(Debug, Clone)]
pub struct NewRoute {
    pub vehicle_id: VehicleId,
    pub route_date: NaiveDate,
    pub total_distance_km: f64,
    pub total_duration_minutes: i64,
    pub personnel: Vec<PersonnelId>,
    pub metadata: Option<serde_json::Value>,
    pub visits: Vec<NewVisit>,
}

#[derive(Debug, Clone)]
pub struct NewVisit {
    pub case_id: CaseId,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub estimated_departure: Option<DateTime<Utc>>,
    pub distance_from_previous_km: f64,
    pub travel_minutes_from_previous: i64,
}

#[derive(Default)]
struct Inner {
    skills: HashMap<SkillId, Skill>,
    care_types: HashMap<CareTypeId, CareType>,
    patients: HashMap<PatientId, Patient>,
    personnel: HashMap<PersonnelId, Personnel>,
    vehicles: HashMap<VehicleId, Vehicle>,
    cases: HashMap<CaseId, Case>,
    routes: HashMap<RouteId, Route>,
    visits: HashMap<VisitId, Visit>,
    location_logs: HashMap<VehicleId, Vec<LocationLog>>,
    distance_cache: HashMap<String, DistanceCacheRecord>,
    metrics: Vec<OptimizationMetrics>,
    next_id: i64,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct Store {
    inner: RwLock<Inner>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Seeding ─────────────────────────────────────────────────────────────

    pub fn insert_skill(&self, name: impl Into<String>) -> Skill {
        let mut inner = self.inner.write();
        let skill = Skill { id: inner.next_id(), name: name.into() };
        inner.skills.insert(skill.id, skill.clone());
        skill
    }

    pub fn insert_care_type(&self, mut care_type: CareType) -> CareType {
        let mut inner = self.inner.write();
        care_type.id = inner.next_id();
        inner.care_types.insert(care_type.id, care_type.clone());
        care_type
    }

    pub fn insert_patient(&self, mut patient: Patient) -> Result<Patient> {
        patient.normalize_rut()?;
        let mut inner = self.inner.write();
        patient.id = inner.next_id();
        inner.patients.insert(patient.id, patient.clone());
        Ok(patient)
    }

    pub fn insert_personnel(&self, mut person: Personnel) -> Personnel {
        let mut inner = self.inner.write();
        person.id = inner.next_id();
        inner.personnel.insert(person.id, person.clone());
        person
    }

    pub fn insert_vehicle(&self, mut vehicle: Vehicle) -> Result<Vehicle> {
        let mut inner = self.inner.write();
        if inner
            .vehicles
            .values()
            .any(|v| v.identifier == vehicle.identifier)
        {
            return Err(Error::Conflict(format!(
                "ya existe un vehículo con identificador {}",
                vehicle.identifier
            )));
        }
        vehicle.id = inner.next_id();
        inner.vehicles.insert(vehicle.id, vehicle.clone());
        Ok(vehicle)
    }

    pub fn insert_case(&self, mut case: Case) -> Case {
        let mut inner = self.inner.write();
        case.id = inner.next_id();
        inner.cases.insert(case.id, case.clone());
        case
    }

    // ── Lookups ─────────────────────────────────────────────────────────────

    pub fn care_type(&self, id: CareTypeId) -> Result<CareType> {
        self.inner
            .read()
            .care_types
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("care type {id} not found")))
    }

    pub fn patient(&self, id: PatientId) -> Result<Patient> {
        self.inner
            .read()
            .patients
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("patient {id} not found")))
    }

    pub fn vehicle(&self, id: VehicleId) -> Result<Vehicle> {
        self.inner
            .read()
            .vehicles
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("vehicle {id} not found")))
    }

    pub fn case(&self, id: CaseId) -> Result<Case> {
        self.inner
            .read()
            .cases
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("case {id} not found")))
    }

    pub fn route(&self, id: RouteId) -> Result<Route> {
        self.inner
            .read()
            .routes
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("route {id} not found")))
    }

    pub fn visit(&self, id: VisitId) -> Result<Visit> {
        self.inner
            .read()
            .visits
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("visit {id} not found")))
    }

    pub fn personnel_by_id(&self, id: PersonnelId) -> Result<Personnel> {
        self.inner
            .read()
            .personnel
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("personnel {id} not found")))
    }

    /// Cases by id accepting `pending` or `assigned` status (re-optimization).
    pub fn plannable_cases(&self, ids: &[CaseId]) -> Vec<Case> {
        let inner = self.inner.read();
        ids.iter()
            .filter_map(|id| inner.cases.get(id))
            .filter(|c| matches!(c.status, CaseStatus::Pending | CaseStatus::Assigned))
            .cloned()
            .collect()
    }

    pub fn active_vehicles(&self, ids: &[VehicleId]) -> Vec<Vehicle> {
        let inner = self.inner.read();
        ids.iter()
            .filter_map(|id| inner.vehicles.get(id))
            .filter(|v| v.is_active)
            .cloned()
            .collect()
    }

    pub fn active_personnel(&self) -> Vec<Personnel> {
        let mut personnel: Vec<Personnel> = self
            .inner
            .read()
            .personnel
            .values()
            .filter(|p| p.is_active)
            .cloned()
            .collect();
        personnel.sort_by_key(|p| p.id);
        personnel
    }

    pub fn routes(&self) -> Vec<Route> {
        let mut routes: Vec<Route> = self.inner.read().routes.values().cloned().collect();
        routes.sort_by_key(|r| r.id);
        routes
    }

    /// Routes in `active` or `in_progress` status, optionally filtered.
    pub fn active_routes(
        &self,
        route_date: Option<NaiveDate>,
        vehicle_id: Option<VehicleId>,
    ) -> Vec<Route> {
        let inner = self.inner.read();
        let mut routes: Vec<Route> = inner
            .routes
            .values()
            .filter(|r| matches!(r.status, RouteStatus::Active | RouteStatus::InProgress))
            .filter(|r| route_date.map_or(true, |d| r.route_date == d))
            .filter(|r| vehicle_id.map_or(true, |v| r.vehicle_id == v))
            .cloned()
            .collect();
        routes.sort_by_key(|r| r.id);
        routes
    }

    pub fn active_route_for_vehicle(&self, vehicle_id: VehicleId) -> Option<Route> {
        self.active_routes(None, Some(vehicle_id)).into_iter().next()
    }

    /// Visits of a route ordered by sequence number.
    pub fn visits_of_route(&self, route_id: RouteId) -> Vec<Visit> {
        let inner = self.inner.read();
        let mut visits: Vec<Visit> = inner
            .visits
            .values()
            .filter(|v| v.route_id == route_id)
            .cloned()
            .collect();
        visits.sort_by_key(|v| v.sequence_number);
        visits
    }

    // ── Mutation helpers ────────────────────────────────────────────────────

    pub fn update_case_status(&self, id: CaseId, status: CaseStatus) -> Result<()> {
        let mut inner = self.inner.write();
        let case = inner
            .cases
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("case {id} not found")))?;
        case.status = status;
        Ok(())
    }

    pub fn with_visit_mut<T>(
        &self,
        id: VisitId,
        f: impl FnOnce(&mut Visit) -> T,
    ) -> Result<T> {
        let mut inner = self.inner.write();
        let visit = inner
            .visits
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("visit {id} not found")))?;
        Ok(f(visit))
    }

    pub fn with_route_mut<T>(
        &self,
        id: RouteId,
        f: impl FnOnce(&mut Route) -> T,
    ) -> Result<T> {
        let mut inner = self.inner.write();
        let route = inner
            .routes
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("route {id} not found")))?;
        Ok(f(route))
    }

    // ── Optimization commit ─────────────────────────────────────────────────

    /// Persists the outcome of an optimization run in one transaction:
    /// route rows, personnel joins, visit rows, case status updates and
    /// metrics. Validation happens before any mutation, so an error leaves
    /// the store untouched.
    pub fn persist_optimization(
        &self,
        new_routes: Vec<NewRoute>,
        metrics: Vec<OptimizationMetrics>,
    ) -> Result<Vec<RouteId>> {
        let mut inner = self.inner.write();

        // Validate first.
        for new_route in &new_routes {
            if new_route.visits.is_empty() {
                return Err(Error::invalid(
                    "a route with zero visits is never persisted",
                ));
            }
            if !inner.vehicles.contains_key(&new_route.vehicle_id) {
                return Err(Error::not_found(format!(
                    "vehicle {} not found",
                    new_route.vehicle_id
                )));
            }
            for person_id in &new_route.personnel {
                if !inner.personnel.contains_key(person_id) {
                    return Err(Error::not_found(format!(
                        "personnel {person_id} not found"
                    )));
                }
            }
            for new_visit in &new_route.visits {
                if !inner.cases.contains_key(&new_visit.case_id) {
                    return Err(Error::not_found(format!(
                        "case {} not found",
                        new_visit.case_id
                    )));
                }
                // At most one non-terminal visit per case system-wide.
                if inner
                    .visits
                    .values()
                    .any(|v| v.case_id == new_visit.case_id && !v.status.is_terminal())
                {
                    return Err(Error::Conflict(format!(
                        "case {} already has an open visit",
                        new_visit.case_id
                    )));
                }
            }
        }

        // Apply.
        let mut route_ids = Vec::with_capacity(new_routes.len());
        for new_route in new_routes {
            let route_id = inner.next_id();
            route_ids.push(route_id);

            for (sequence, new_visit) in new_route.visits.iter().enumerate() {
                let visit_id = inner.next_id();
                inner.visits.insert(
                    visit_id,
                    Visit {
                        id: visit_id,
                        route_id,
                        case_id: new_visit.case_id,
                        sequence_number: sequence as u32,
                        estimated_arrival: new_visit.estimated_arrival,
                        estimated_departure: new_visit.estimated_departure,
                        actual_arrival: None,
                        actual_departure: None,
                        status: VisitStatus::Pending,
                        notes: None,
                        distance_from_previous_km: new_visit.distance_from_previous_km,
                        travel_minutes_from_previous: new_visit.travel_minutes_from_previous,
                    },
                );
                if let Some(case) = inner.cases.get_mut(&new_visit.case_id) {
                    case.status = CaseStatus::Assigned;
                }
            }

            inner.routes.insert(
                route_id,
                Route {
                    id: route_id,
                    vehicle_id: new_route.vehicle_id,
                    route_date: new_route.route_date,
                    status: RouteStatus::Draft,
                    total_distance_km: new_route.total_distance_km,
                    total_duration_minutes: new_route.total_duration_minutes,
                    assigned_personnel: new_route.personnel,
                    optimization_metadata: new_route.metadata,
                },
            );
        }

        for (i, mut metric) in metrics.into_iter().enumerate() {
            metric.id = inner.next_id();
            // Per-route metrics are emitted in route order; the overall row
            // carries no route id.
            if metric.route_id.is_some() {
                metric.route_id = route_ids.get(i).copied();
            }
            inner.metrics.push(metric);
        }

        Ok(route_ids)
    }

    pub fn insert_metrics(&self, mut metric: OptimizationMetrics) -> i64 {
        let mut inner = self.inner.write();
        metric.id = inner.next_id();
        let id = metric.id;
        inner.metrics.push(metric);
        id
    }

    pub fn metrics(&self) -> Vec<OptimizationMetrics> {
        self.inner.read().metrics.clone()
    }

    // ── Location logs ───────────────────────────────────────────────────────

    pub fn append_location(
        &self,
        vehicle_id: VehicleId,
        location: Location,
        speed_kmh: Option<f64>,
        heading_degrees: Option<f64>,
        accuracy_meters: Option<f64>,
        timestamp: DateTime<Utc>,
    ) -> Result<LocationLog> {
        let mut inner = self.inner.write();
        if !inner.vehicles.contains_key(&vehicle_id) {
            return Err(Error::not_found(format!("vehicle {vehicle_id} not found")));
        }
        let id: LocationLogId = inner.next_id();
        let log = LocationLog {
            id,
            vehicle_id,
            location,
            speed_kmh,
            heading_degrees,
            accuracy_meters,
            timestamp,
        };
        inner
            .location_logs
            .entry(vehicle_id)
            .or_default()
            .push(log.clone());
        Ok(log)
    }

    pub fn latest_location(&self, vehicle_id: VehicleId) -> Option<LocationLog> {
        self.inner
            .read()
            .location_logs
            .get(&vehicle_id)?
            .iter()
            .max_by_key(|l| l.timestamp)
            .cloned()
    }

    /// Samples for a vehicle, newest first, bounded by the optional range.
    pub fn location_history(
        &self,
        vehicle_id: VehicleId,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Vec<LocationLog> {
        let inner = self.inner.read();
        let mut logs: Vec<LocationLog> = inner
            .location_logs
            .get(&vehicle_id)
            .map(|v| v.as_slice())
            .unwrap_or_default()
            .iter()
            .filter(|l| start.map_or(true, |s| l.timestamp >= s))
            .filter(|l| end.map_or(true, |e| l.timestamp <= e))
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        logs.truncate(limit);
        logs
    }

    /// Freshest sample per vehicle no older than the cutoff.
    pub fn latest_locations_since(&self, cutoff: DateTime<Utc>) -> Vec<LocationLog> {
        let inner = self.inner.read();
        inner
            .location_logs
            .values()
            .filter_map(|logs| logs.iter().max_by_key(|l| l.timestamp))
            .filter(|l| l.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    pub fn delete_locations_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut inner = self.inner.write();
        let mut deleted = 0;
        for logs in inner.location_logs.values_mut() {
            let before = logs.len();
            logs.retain(|l| l.timestamp >= cutoff);
            deleted += before - logs.len();
        }
        deleted
    }

    // ── Distance cache (durable tier) ───────────────────────────────────────

    pub fn cache_get(&self, key: &str) -> Option<DistanceCacheRecord> {
        self.inner.read().distance_cache.get(key).cloned()
    }

    /// Idempotent upsert keyed by fingerprint.
    pub fn cache_put(&self, record: DistanceCacheRecord) {
        self.inner
            .write()
            .distance_cache
            .insert(record.cache_key.clone(), record);
    }

    pub fn cache_delete(&self, key: &str) {
        self.inner.write().distance_cache.remove(key);
    }

    pub fn cache_delete_expired(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.write();
        let before = inner.distance_cache.len();
        inner.distance_cache.retain(|_, r| r.expires_at > now);
        before - inner.distance_cache.len()
    }

    pub fn cache_entries(&self) -> Vec<DistanceCacheRecord> {
        self.inner.read().distance_cache.values().cloned().collect()
    }
}
