//! Domain model: entities, value types and status machines.
//!
//! These mirror the relational layer's rows. Routes own their visits by id,
//! visits refer to cases by id, and cases reach their route only through
//! queries — no back-pointers, no object graphs in memory.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::rut;

pub type SkillId = i64;
pub type CareTypeId = i64;
pub type PatientId = i64;
pub type PersonnelId = i64;
pub type VehicleId = i64;
pub type CaseId = i64;
pub type RouteId = i64;
pub type VisitId = i64;
pub type LocationLogId = i64;

/// Geographic point on WGS-84. Construction validates the coordinate ranges,
/// so a `Location` is always usable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(Error::invalid(format!(
                "latitude must be between -90 and 90, got {latitude}"
            )));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::invalid(format!(
                "longitude must be between -180 and 180, got {longitude}"
            )));
        }
        Ok(Self { latitude, longitude })
    }
}

/// Time-of-day window with `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Result<Self> {
        if start >= end {
            return Err(Error::invalid(format!(
                "invalid time window: {start} >= {end}"
            )));
        }
        Ok(Self { start, end })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: SkillId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CareType {
    pub id: CareTypeId,
    pub name: String,
    pub estimated_duration_minutes: u32,
    pub required_skills: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    pub name: String,
    pub rut: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub home_location: Location,
    pub address: String,
}

impl Patient {
    /// Validates and canonicalizes the RUT if one is present.
    pub fn normalize_rut(&mut self) -> Result<()> {
        if let Some(raw) = &self.rut {
            rut::validate(raw)?;
            self.rut = Some(rut::format(raw));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Personnel {
    pub id: PersonnelId,
    pub name: String,
    pub skills: BTreeSet<String>,
    pub work_start: NaiveTime,
    pub work_end: NaiveTime,
    pub start_location: Option<Location>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    Available,
    InUse,
    Maintenance,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub identifier: String,
    pub capacity_personnel: u32,
    pub base_location: Location,
    pub status: VehicleStatus,
    pub resources: BTreeSet<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeWindowType {
    Am,
    Pm,
    Specific,
    Anytime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pending,
    Assigned,
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub id: CaseId,
    pub patient_id: PatientId,
    pub care_type_id: CareTypeId,
    pub scheduled_date: NaiveDate,
    pub time_window_type: TimeWindowType,
    pub time_window: TimeWindow,
    /// Defaults to the patient's home location.
    pub location: Location,
    pub priority: Priority,
    pub status: CaseStatus,
    pub estimated_duration_minutes: u32,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    Draft,
    Active,
    InProgress,
    Completed,
    Cancelled,
}

impl RouteStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RouteStatus::Completed | RouteStatus::Cancelled)
    }

    /// `draft → active → in_progress → completed`; any non-terminal state may
    /// be cancelled.
    pub fn can_transition_to(self, next: RouteStatus) -> bool {
        if self == next {
            return true;
        }
        match (self, next) {
            (RouteStatus::Draft, RouteStatus::Active)
            | (RouteStatus::Active, RouteStatus::InProgress)
            | (RouteStatus::InProgress, RouteStatus::Completed) => true,
            (from, RouteStatus::Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub id: RouteId,
    pub vehicle_id: VehicleId,
    pub route_date: NaiveDate,
    pub status: RouteStatus,
    pub total_distance_km: f64,
    pub total_duration_minutes: i64,
    pub assigned_personnel: Vec<PersonnelId>,
    /// JSON summary written by the optimizer.
    pub optimization_metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitStatus {
    Pending,
    EnRoute,
    Arrived,
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

impl VisitStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            VisitStatus::Completed | VisitStatus::Cancelled | VisitStatus::Failed
        )
    }

    /// Allowed transitions per state; terminal states allow none.
    pub fn allowed_transitions(self) -> &'static [VisitStatus] {
        match self {
            VisitStatus::Pending => &[VisitStatus::EnRoute, VisitStatus::Cancelled],
            VisitStatus::EnRoute => &[VisitStatus::Arrived, VisitStatus::Cancelled],
            VisitStatus::Arrived => &[VisitStatus::InProgress, VisitStatus::Cancelled],
            VisitStatus::InProgress => &[VisitStatus::Completed, VisitStatus::Failed],
            VisitStatus::Completed | VisitStatus::Cancelled | VisitStatus::Failed => &[],
        }
    }

    pub fn can_transition_to(self, next: VisitStatus) -> bool {
        self == next || self.allowed_transitions().contains(&next)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Visit {
    pub id: VisitId,
    pub route_id: RouteId,
    pub case_id: CaseId,
    /// Contiguous 0..n-1 within the owning route after persistence.
    pub sequence_number: u32,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub estimated_departure: Option<DateTime<Utc>>,
    pub actual_arrival: Option<DateTime<Utc>>,
    pub actual_departure: Option<DateTime<Utc>>,
    pub status: VisitStatus,
    pub notes: Option<String>,
    pub distance_from_previous_km: f64,
    pub travel_minutes_from_previous: i64,
}

/// Append-only GPS sample for a vehicle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationLog {
    pub id: LocationLogId,
    pub vehicle_id: VehicleId,
    pub location: Location,
    pub speed_kmh: Option<f64>,
    pub heading_degrees: Option<f64>,
    pub accuracy_meters: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_rejects_out_of_range() {
        assert!(Location::new(91.0, 0.0).is_err());
        assert!(Location::new(-91.0, 0.0).is_err());
        assert!(Location::new(0.0, 181.0).is_err());
        assert!(Location::new(0.0, -181.0).is_err());
        assert!(Location::new(-33.45, -70.66).is_ok());
    }

    #[test]
    fn time_window_requires_start_before_end() {
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let twelve = NaiveTime::from_hms_opt(12, 0, 0).unwrap();
        assert!(TimeWindow::new(nine, twelve).is_ok());
        assert!(TimeWindow::new(twelve, nine).is_err());
        assert!(TimeWindow::new(nine, nine).is_err());
    }

    #[test]
    fn visit_reachability_from_pending_covers_all_states() {
        // Breadth-first walk over allowed edges must visit exactly the full
        // status set.
        let mut seen = vec![VisitStatus::Pending];
        let mut frontier = vec![VisitStatus::Pending];
        while let Some(status) = frontier.pop() {
            for &next in status.allowed_transitions() {
                if !seen.contains(&next) {
                    seen.push(next);
                    frontier.push(next);
                }
            }
        }
        seen.sort_by_key(|s| *s as u8);
        assert_eq!(
            seen,
            vec![
                VisitStatus::Pending,
                VisitStatus::EnRoute,
                VisitStatus::Arrived,
                VisitStatus::InProgress,
                VisitStatus::Completed,
                VisitStatus::Cancelled,
                VisitStatus::Failed,
            ]
        );
    }

    #[test]
    fn terminal_visit_states_allow_nothing() {
        for status in [
            VisitStatus::Completed,
            VisitStatus::Cancelled,
            VisitStatus::Failed,
        ] {
            assert!(status.is_terminal());
            assert!(status.allowed_transitions().is_empty());
        }
    }

    #[test]
    fn route_status_transitions() {
        assert!(RouteStatus::Draft.can_transition_to(RouteStatus::Active));
        assert!(RouteStatus::Active.can_transition_to(RouteStatus::InProgress));
        assert!(RouteStatus::InProgress.can_transition_to(RouteStatus::Completed));
        assert!(RouteStatus::Draft.can_transition_to(RouteStatus::Cancelled));
        assert!(!RouteStatus::Completed.can_transition_to(RouteStatus::Cancelled));
        assert!(!RouteStatus::Draft.can_transition_to(RouteStatus::Completed));
    }

    #[test]
    fn patient_rut_normalization() {
        let mut patient = Patient {
            id: 1,
            name: "María Pérez".to_string(),
            rut: Some("123456785".to_string()),
            phone: None,
            email: None,
            home_location: Location::new(-33.45, -70.66).unwrap(),
            address: "Av. Providencia 1234".to_string(),
        };
        patient.normalize_rut().unwrap();
        assert_eq!(patient.rut.as_deref(), Some("12.345.678-5"));

        patient.rut = Some("12.345.678-9".to_string());
        assert!(patient.normalize_rut().is_err());
    }
}
