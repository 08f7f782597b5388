//! Visit and route state machines and their derived invariants.
//!
//! Transitions within a route are serialized under a per-route lock so the
//! route-completion check always observes a consistent snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;

use crate::domain::{
    CaseStatus, Route, RouteId, RouteStatus, Visit, VisitId, VisitStatus,
};
use crate::error::{Error, Result};
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct RouteProgress {
    pub route_id: RouteId,
    pub total_visits: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub pending: usize,
    pub completion_percentage: f64,
}

pub struct RouteTracker {
    store: Arc<Store>,
    route_locks: Mutex<HashMap<RouteId, Arc<Mutex<()>>>>,
}

impl RouteTracker {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            route_locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, route_id: RouteId) -> Arc<Mutex<()>> {
        Arc::clone(
            self.route_locks
                .lock()
                .entry(route_id)
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Applies a visit transition with full validation and all cascades:
    /// timestamps, case mirroring, route activation and route completion.
    pub fn update_visit_status(
        &self,
        visit_id: VisitId,
        new_status: VisitStatus,
        notes: Option<String>,
    ) -> Result<Visit> {
        let visit = self.store.visit(visit_id)?;
        let lock = self.lock_for(visit.route_id);
        let _guard = lock.lock();

        // Re-read under the lock.
        let visit = self.store.visit(visit_id)?;
        let current = visit.status;

        if !current.can_transition_to(new_status) {
            return Err(Error::invalid(format!(
                "invalid status transition from {current:?} to {new_status:?}"
            )));
        }

        let now = Utc::now();
        let updated = self.store.with_visit_mut(visit_id, |v| {
            v.status = new_status;
            if let Some(notes) = notes {
                v.notes = Some(notes);
            }
            match new_status {
                VisitStatus::Arrived if v.actual_arrival.is_none() => {
                    v.actual_arrival = Some(now);
                }
                VisitStatus::Completed if v.actual_departure.is_none() => {
                    v.actual_departure = Some(now);
                }
                _ => {}
            }
            v.clone()
        })?;

        self.mirror_case_status(&updated)?;

        // First movement flips an active route to in-progress.
        if new_status == VisitStatus::EnRoute {
            let route = self.store.route(updated.route_id)?;
            if route.status == RouteStatus::Active {
                self.store
                    .with_route_mut(route.id, |r| r.status = RouteStatus::InProgress)?;
            }
        }

        self.check_route_completion(updated.route_id)?;

        Ok(updated)
    }

    fn mirror_case_status(&self, visit: &Visit) -> Result<()> {
        let case_status = match visit.status {
            VisitStatus::EnRoute | VisitStatus::Arrived | VisitStatus::InProgress => {
                CaseStatus::InProgress
            }
            VisitStatus::Completed => CaseStatus::Completed,
            VisitStatus::Cancelled => CaseStatus::Cancelled,
            VisitStatus::Failed => CaseStatus::Failed,
            VisitStatus::Pending => return Ok(()),
        };
        self.store.update_case_status(visit.case_id, case_status)
    }

    fn check_route_completion(&self, route_id: RouteId) -> Result<()> {
        let route = self.store.route(route_id)?;
        let visits = self.store.visits_of_route(route_id);
        let all_terminal = !visits.is_empty() && visits.iter().all(|v| v.status.is_terminal());

        if all_terminal && route.status == RouteStatus::InProgress {
            self.store
                .with_route_mut(route_id, |r| r.status = RouteStatus::Completed)?;
        }
        Ok(())
    }

    /// Cancels the route and every non-terminal visit, storing the reason in
    /// the visit notes. Forbidden once the route completed.
    pub fn cancel_route(&self, route_id: RouteId, reason: Option<&str>) -> Result<Route> {
        let lock = self.lock_for(route_id);
        let _guard = lock.lock();

        let route = self.store.route(route_id)?;
        if route.status == RouteStatus::Completed {
            return Err(Error::invalid("cannot cancel a completed route"));
        }

        for visit in self.store.visits_of_route(route_id) {
            if visit.status.is_terminal() {
                continue;
            }
            self.store.with_visit_mut(visit.id, |v| {
                v.status = VisitStatus::Cancelled;
                if let Some(reason) = reason {
                    v.notes = Some(format!("Route cancelled: {reason}"));
                }
            })?;
            self.store
                .update_case_status(visit.case_id, CaseStatus::Cancelled)?;
        }

        self.store
            .with_route_mut(route_id, |r| r.status = RouteStatus::Cancelled)?;
        self.store.route(route_id)
    }

    /// First visit still pending, in sequence order.
    pub fn next_pending_visit(&self, route_id: RouteId) -> Result<Option<Visit>> {
        self.store.route(route_id)?;
        Ok(self
            .store
            .visits_of_route(route_id)
            .into_iter()
            .find(|v| v.status == VisitStatus::Pending))
    }

    /// First visit currently being worked (en_route, arrived or in_progress).
    pub fn current_visit(&self, route_id: RouteId) -> Result<Option<Visit>> {
        self.store.route(route_id)?;
        Ok(self.store.visits_of_route(route_id).into_iter().find(|v| {
            matches!(
                v.status,
                VisitStatus::EnRoute | VisitStatus::Arrived | VisitStatus::InProgress
            )
        }))
    }

    pub fn progress(&self, route_id: RouteId) -> Result<RouteProgress> {
        self.store.route(route_id)?;
        let visits = self.store.visits_of_route(route_id);

        let total = visits.len();
        let count = |status: VisitStatus| visits.iter().filter(|v| v.status == status).count();
        let completed = count(VisitStatus::Completed);
        let in_progress = count(VisitStatus::InProgress);
        let failed = count(VisitStatus::Failed);
        let cancelled = count(VisitStatus::Cancelled);

        Ok(RouteProgress {
            route_id,
            total_visits: total,
            completed,
            in_progress,
            failed,
            cancelled,
            pending: total - completed - in_progress - failed - cancelled,
            completion_percentage: if total > 0 {
                (completed as f64 / total as f64 * 10000.0).round() / 100.0
            } else {
                0.0
            },
        })
    }
}
