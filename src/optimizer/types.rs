//! Value types for the optimization problem space, separate from the stored
//! entities: the solver works on plain data with skills already resolved.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeSet;

use crate::domain::{CaseId, Location, PatientId, PersonnelId, Priority, TimeWindow, VehicleId};
use crate::error::{Error, Result};
use crate::optimizer::skill_gap::SkillGapAnalysis;

/// Daily shift bounds used by both strategies.
pub const WORK_START_HOUR: u32 = 8;
pub const WORK_END_HOUR: u32 = 17;

/// Average speed assumed when no time matrix is provided.
pub const FALLBACK_SPEED_KMH: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    SkillMismatch,
    CapacityExceeded,
    TimeWindowViolation,
    WorkingHoursViolation,
    Infeasible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConstraintViolation {
    pub kind: ConstraintKind,
    pub description: String,
    pub entity_id: Option<i64>,
    pub entity_kind: Option<&'static str>,
    pub severity: Severity,
}

impl ConstraintViolation {
    pub fn infeasible(description: impl Into<String>) -> Self {
        Self {
            kind: ConstraintKind::Infeasible,
            description: description.into(),
            entity_id: None,
            entity_kind: None,
            severity: Severity::Error,
        }
    }
}

/// A visit request as the optimizer sees it: required skills resolved from
/// the care type, location resolved from the patient.
#[derive(Debug, Clone)]
pub struct Case {
    pub id: CaseId,
    pub patient_id: PatientId,
    pub patient_name: String,
    pub location: Location,
    pub required_skills: BTreeSet<String>,
    pub time_window: TimeWindow,
    pub priority: Priority,
    pub estimated_duration_minutes: u32,
}

#[derive(Debug, Clone)]
pub struct Vehicle {
    pub id: VehicleId,
    pub identifier: String,
    pub capacity: u32,
    pub base_location: Location,
}

#[derive(Debug, Clone)]
pub struct Personnel {
    pub id: PersonnelId,
    pub name: String,
    pub skills: BTreeSet<String>,
}

impl Personnel {
    pub fn has_all(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.skills)
    }
}

/// A scheduled stop within a planned route.
#[derive(Debug, Clone)]
pub struct PlannedVisit {
    pub case: Case,
    pub sequence: u32,
    pub arrival: NaiveDateTime,
    pub departure: NaiveDateTime,
    pub travel_minutes_from_previous: i64,
    pub distance_km_from_previous: f64,
}

#[derive(Debug, Clone)]
pub struct PlannedRoute {
    pub vehicle: Vehicle,
    pub personnel: Vec<Personnel>,
    pub visits: Vec<PlannedVisit>,
    pub date: NaiveDate,
    pub total_distance_km: f64,
    pub total_time_minutes: i64,
}

impl PlannedRoute {
    /// True when the team's pooled skills cover every visit's requirements.
    pub fn skills_covered(&self) -> bool {
        let team: BTreeSet<&String> = self
            .personnel
            .iter()
            .flat_map(|p| p.skills.iter())
            .collect();
        self.visits
            .iter()
            .all(|v| v.case.required_skills.iter().all(|s| team.contains(s)))
    }
}

#[derive(Debug, Clone)]
pub struct OptimizationRequest {
    pub cases: Vec<Case>,
    pub vehicles: Vec<Vehicle>,
    pub personnel: Vec<Personnel>,
    pub date: NaiveDate,
    /// Kilometers between location indices `[depots..., cases...]`; built
    /// from geodesic distance when absent.
    pub distance_km: Option<Vec<Vec<f64>>>,
    /// Minutes between the same indices.
    pub time_minutes: Option<Vec<Vec<i64>>>,
    pub max_optimization_time_secs: u64,
    pub use_heuristic: bool,
}

impl OptimizationRequest {
    pub fn validate(&self) -> Result<()> {
        if self.cases.is_empty() {
            return Err(Error::invalid("at least one case is required"));
        }
        if self.vehicles.is_empty() {
            return Err(Error::invalid("at least one vehicle is required"));
        }
        if self.personnel.is_empty() {
            return Err(Error::invalid("at least one personnel is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct OptimizationResult {
    pub success: bool,
    pub routes: Vec<PlannedRoute>,
    pub unassigned_cases: Vec<Case>,
    pub constraint_violations: Vec<ConstraintViolation>,
    pub total_distance_km: f64,
    pub total_time_minutes: i64,
    pub optimization_time_seconds: f64,
    pub strategy_used: &'static str,
    pub skill_gap_analysis: Option<SkillGapAnalysis>,
    pub message: String,
}

impl OptimizationResult {
    pub fn failure(
        strategy: &'static str,
        unassigned: Vec<Case>,
        violations: Vec<ConstraintViolation>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            routes: Vec::new(),
            unassigned_cases: unassigned,
            constraint_violations: violations,
            total_distance_km: 0.0,
            total_time_minutes: 0,
            optimization_time_seconds: 0.0,
            strategy_used: strategy,
            skill_gap_analysis: None,
            message: message.into(),
        }
    }

    pub fn assigned_count(&self) -> usize {
        self.routes.iter().map(|r| r.visits.len()).sum()
    }

    /// Compact summary persisted as route metadata.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "success": self.success,
            "strategy_used": self.strategy_used,
            "num_routes": self.routes.len(),
            "num_assigned_cases": self.assigned_count(),
            "num_unassigned_cases": self.unassigned_cases.len(),
            "num_violations": self.constraint_violations.len(),
            "total_distance_km": (self.total_distance_km * 100.0).round() / 100.0,
            "total_time_minutes": self.total_time_minutes,
            "optimization_time_seconds": (self.optimization_time_seconds * 100.0).round() / 100.0,
            "message": self.message,
        })
    }
}
