//! Primary optimization strategy: a constraint-driven VRP search.
//!
//! The model mirrors a classic CP routing formulation — one depot node per
//! vehicle, one node per feasible case, arc costs in meters, hard per-case
//! vehicle restrictions from skill coverage, and droppable visits with a flat
//! penalty. The search runs parallel cheapest insertion for the first
//! solution, then guided local search (penalty-augmented relocate / swap /
//! 2-opt / reinsertion) until convergence, the wall-clock budget, or the
//! evaluation limit.
//!
//! Time windows are deliberately not hard constraints here; the heuristic
//! strategy enforces them directly.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{NaiveTime, TimeDelta};
use tracing::{info, warn};

use crate::domain::CaseId;
use crate::geo;
use crate::optimizer::assignment::{allowed_vehicles_for_case, assign_personnel_to_vehicles};
use crate::optimizer::skill_gap;
use crate::optimizer::types::{
    Case, ConstraintKind, ConstraintViolation, OptimizationRequest, OptimizationResult,
    PlannedRoute, PlannedVisit, Severity, FALLBACK_SPEED_KMH, WORK_START_HOUR,
};

/// Dropping an assignable case costs the same as 100 km of driving.
const DROP_PENALTY_METERS: i64 = 100_000;
/// Wall-clock floor; requested budgets below this are raised to it.
const MIN_TIME_LIMIT_SECS: u64 = 120;
/// Candidate-move evaluation cap.
const EVALUATION_LIMIT: u64 = 50_000;
/// Convergence: GLS rounds without improvement before accepting the incumbent.
const STALL_ROUNDS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SolveStatus {
    /// Search converged before hitting any limit.
    Converged,
    /// Budget or evaluation limit hit; the incumbent is still usable.
    LimitReached,
    NoSolution,
}

pub struct GuidedSearchStrategy;

impl GuidedSearchStrategy {
    pub fn optimize(request: &OptimizationRequest) -> OptimizationResult {
        let started = Instant::now();

        if let Err(e) = request.validate() {
            return OptimizationResult::failure(
                "guided_search",
                request.cases.clone(),
                vec![ConstraintViolation::infeasible(e.to_string())],
                "validation failed",
            );
        }

        info!(
            cases = request.cases.len(),
            vehicles = request.vehicles.len(),
            personnel = request.personnel.len(),
            "starting guided-search optimization"
        );

        let model = Model::build(request);
        info!(
            feasible = model.feasible.len(),
            prefiltered = model.prefiltered.len(),
            "model built"
        );

        if model.feasible.is_empty() {
            // Every case was pre-filtered: no vehicle team covers its skills.
            let unassigned: Vec<Case> = request.cases.clone();
            let analysis = model.skill_gap(&HashSet::new(), &unassigned);
            let mut result = OptimizationResult::failure(
                "guided_search",
                unassigned,
                vec![ConstraintViolation::infeasible(
                    "no case can be served by any vehicle team",
                )],
                "no feasible cases",
            );
            result.skill_gap_analysis = Some(analysis);
            result.optimization_time_seconds = started.elapsed().as_secs_f64();
            return result;
        }

        let deadline =
            started + Duration::from_secs(request.max_optimization_time_secs.max(MIN_TIME_LIMIT_SECS));

        let (state, status) = search(&model, deadline);

        if status == SolveStatus::NoSolution {
            warn!("guided search found no usable assignment");
            let unassigned: Vec<Case> = request.cases.clone();
            let analysis = model.skill_gap(&HashSet::new(), &unassigned);
            let mut result = OptimizationResult::failure(
                "guided_search",
                unassigned,
                vec![ConstraintViolation::infeasible(
                    "no feasible solution found; constraints may be too strict",
                )],
                "no feasible solution found",
            );
            result.skill_gap_analysis = Some(analysis);
            result.optimization_time_seconds = started.elapsed().as_secs_f64();
            return result;
        }

        let mut result = model.extract(&state);
        result.optimization_time_seconds = started.elapsed().as_secs_f64();

        info!(
            routes = result.routes.len(),
            assigned = result.assigned_count(),
            unassigned = result.unassigned_cases.len(),
            status = ?status,
            elapsed = ?started.elapsed(),
            "guided-search optimization complete"
        );

        result
    }
}

// ── Model ───────────────────────────────────────────────────────────────────

struct Model<'a> {
    request: &'a OptimizationRequest,
    /// Offsets into `request.cases` for cases some vehicle team can serve.
    feasible: Vec<usize>,
    /// Cases pre-filtered out: no team covers them.
    prefiltered: Vec<usize>,
    /// Per feasible case (parallel to `feasible`): allowed vehicle indices.
    allowed: Vec<Vec<usize>>,
    /// Permissive capacity bound per vehicle.
    capacity: Vec<usize>,
    /// Meters between matrix nodes `[depots..., all cases...]`.
    distance_m: Vec<Vec<i64>>,
    /// Minutes between the same nodes.
    time_min: Vec<Vec<i64>>,
    teams: HashMap<i64, Vec<crate::optimizer::types::Personnel>>,
}

/// Routes hold positions into `model.feasible`; `dropped` the rest.
#[derive(Clone)]
struct State {
    routes: Vec<Vec<usize>>,
    dropped: BTreeSet<usize>,
}

impl<'a> Model<'a> {
    fn build(request: &'a OptimizationRequest) -> Self {
        let vehicle_count = request.vehicles.len();
        let teams = assign_personnel_to_vehicles(&request.vehicles, &request.personnel);

        let mut feasible = Vec::new();
        let mut prefiltered = Vec::new();
        let mut allowed = Vec::new();

        for (offset, case) in request.cases.iter().enumerate() {
            let vehicles = allowed_vehicles_for_case(case, &request.vehicles, &teams);
            if vehicles.is_empty() {
                warn!(case_id = case.id, "case has no valid vehicles, pre-filtered out");
                prefiltered.push(offset);
            } else {
                feasible.push(offset);
                allowed.push(vehicles);
            }
        }

        // Permissive bound: over-assignment is caught downstream, not here.
        let per_vehicle_floor =
            (request.cases.len() + vehicle_count - 1) / vehicle_count.max(1);
        let capacity = request
            .vehicles
            .iter()
            .map(|v| (v.capacity as usize).max(per_vehicle_floor).max(3))
            .collect();

        let locations: Vec<_> = request
            .vehicles
            .iter()
            .map(|v| v.base_location)
            .chain(request.cases.iter().map(|c| c.location))
            .collect();
        let n = locations.len();

        let mut distance_m = vec![vec![0i64; n]; n];
        let mut time_min = vec![vec![0i64; n]; n];
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    continue;
                }
                let km = match &request.distance_km {
                    Some(matrix) => matrix[i][j],
                    None => geo::haversine(locations[i], locations[j]) / 1000.0,
                };
                distance_m[i][j] = (km * 1000.0).round() as i64;
                time_min[i][j] = match &request.time_minutes {
                    Some(matrix) => matrix[i][j],
                    None => (km / FALLBACK_SPEED_KMH * 60.0) as i64,
                };
            }
        }

        Self {
            request,
            feasible,
            prefiltered,
            allowed,
            capacity,
            distance_m,
            time_min,
            teams,
        }
    }

    fn node(&self, feasible_idx: usize) -> usize {
        self.request.vehicles.len() + self.feasible[feasible_idx]
    }

    fn case(&self, feasible_idx: usize) -> &Case {
        &self.request.cases[self.feasible[feasible_idx]]
    }

    fn arc(&self, from_node: usize, to_node: usize) -> i64 {
        self.distance_m[from_node][to_node]
    }

    /// Arc cost of one route including the return to its depot.
    fn route_cost(&self, vehicle_idx: usize, route: &[usize]) -> i64 {
        let depot = vehicle_idx;
        let mut cost = 0;
        let mut prev = depot;
        for &fi in route {
            let node = self.node(fi);
            cost += self.arc(prev, node);
            prev = node;
        }
        cost + self.arc(prev, depot)
    }

    /// Full objective: arcs plus drop penalties.
    fn cost(&self, state: &State) -> i64 {
        let arcs: i64 = state
            .routes
            .iter()
            .enumerate()
            .map(|(v, route)| self.route_cost(v, route))
            .sum();
        arcs + state.dropped.len() as i64 * DROP_PENALTY_METERS
    }

    fn skill_gap(
        &self,
        assigned_ids: &HashSet<CaseId>,
        unassigned: &[Case],
    ) -> skill_gap::SkillGapAnalysis {
        let available: BTreeSet<String> = self
            .teams
            .values()
            .flat_map(|team| team.iter().flat_map(|p| p.skills.iter().cloned()))
            .collect();
        skill_gap::analyze(&self.request.cases, unassigned, assigned_ids, &available)
    }

    /// Turns a search state into planned routes, arrival times stepped from
    /// 08:00 by accumulated travel and service minutes.
    fn extract(&self, state: &State) -> OptimizationResult {
        let request = self.request;
        let work_start = request
            .date
            .and_time(NaiveTime::from_hms_opt(WORK_START_HOUR, 0, 0).expect("valid time"));

        let mut routes = Vec::new();
        let mut violations = Vec::new();
        let mut assigned_ids: HashSet<CaseId> = HashSet::new();
        let mut total_distance_km = 0.0;
        let mut total_time_minutes = 0;

        for (vehicle_idx, route) in state.routes.iter().enumerate() {
            if route.is_empty() {
                continue;
            }
            let vehicle = &request.vehicles[vehicle_idx];

            let mut visits = Vec::with_capacity(route.len());
            let mut prev = vehicle_idx;
            let mut route_minutes: i64 = 0;
            let mut route_km = 0.0;

            for (sequence, &fi) in route.iter().enumerate() {
                let case = self.case(fi);
                let node = self.node(fi);
                let travel = self.time_min[prev][node];
                let distance_km = self.distance_m[prev][node] as f64 / 1000.0;

                route_minutes += travel;
                let arrival = work_start + TimeDelta::minutes(route_minutes);
                let departure =
                    arrival + TimeDelta::minutes(case.estimated_duration_minutes as i64);
                route_minutes += case.estimated_duration_minutes as i64;
                route_km += distance_km;

                assigned_ids.insert(case.id);
                visits.push(PlannedVisit {
                    case: case.clone(),
                    sequence: sequence as u32,
                    arrival,
                    departure,
                    travel_minutes_from_previous: travel,
                    distance_km_from_previous: distance_km,
                });
                prev = node;
            }

            let personnel = self.teams.get(&vehicle.id).cloned().unwrap_or_default();
            let planned = PlannedRoute {
                vehicle: vehicle.clone(),
                personnel,
                visits,
                date: request.date,
                total_distance_km: route_km,
                total_time_minutes: route_minutes,
            };

            if !planned.skills_covered() {
                violations.push(ConstraintViolation {
                    kind: ConstraintKind::SkillMismatch,
                    description: format!(
                        "route for vehicle {} lacks some required skills",
                        vehicle.identifier
                    ),
                    entity_id: Some(vehicle.id),
                    entity_kind: Some("route"),
                    severity: Severity::Warning,
                });
            }

            total_distance_km += route_km;
            total_time_minutes += route_minutes;
            routes.push(planned);
        }

        let unassigned: Vec<Case> = request
            .cases
            .iter()
            .filter(|c| !assigned_ids.contains(&c.id))
            .cloned()
            .collect();

        // Partial assignment is a valid business outcome.
        let success = !routes.is_empty();
        let analysis = self.skill_gap(&assigned_ids, &unassigned);
        let message = format!(
            "guided search: {} routes, {} assigned, {} unassigned",
            routes.len(),
            assigned_ids.len(),
            unassigned.len()
        );

        OptimizationResult {
            success,
            routes,
            unassigned_cases: unassigned,
            constraint_violations: violations,
            total_distance_km,
            total_time_minutes,
            optimization_time_seconds: 0.0,
            strategy_used: "guided_search",
            skill_gap_analysis: Some(analysis),
            message,
        }
    }
}

// ── Search ──────────────────────────────────────────────────────────────────

struct SearchContext<'m, 'a> {
    model: &'m Model<'a>,
    /// GLS penalties per directed arc.
    penalties: HashMap<(usize, usize), i64>,
    lambda: i64,
    evaluations: u64,
    deadline: Instant,
}

impl<'m, 'a> SearchContext<'m, 'a> {
    fn out_of_budget(&self) -> bool {
        self.evaluations >= EVALUATION_LIMIT || Instant::now() >= self.deadline
    }

    fn penalty(&self, from: usize, to: usize) -> i64 {
        self.penalties.get(&(from, to)).copied().unwrap_or(0)
    }

    /// Objective augmented with GLS penalties on used arcs.
    fn augmented_route_cost(&self, vehicle_idx: usize, route: &[usize]) -> i64 {
        let model = self.model;
        let depot = vehicle_idx;
        let mut cost = 0;
        let mut prev = depot;
        for &fi in route {
            let node = model.node(fi);
            cost += model.arc(prev, node) + self.lambda * self.penalty(prev, node);
            prev = node;
        }
        cost + model.arc(prev, depot) + self.lambda * self.penalty(prev, depot)
    }

    fn augmented_cost(&self, state: &State) -> i64 {
        let arcs: i64 = state
            .routes
            .iter()
            .enumerate()
            .map(|(v, route)| self.augmented_route_cost(v, route))
            .sum();
        arcs + state.dropped.len() as i64 * DROP_PENALTY_METERS
    }

    /// Penalizes the arc with maximum utility in the current solution; the
    /// standard GLS diversification step.
    fn penalize_worst_arc(&mut self, state: &State) {
        let model = self.model;
        let mut worst: Option<((usize, usize), f64)> = None;

        for (vehicle_idx, route) in state.routes.iter().enumerate() {
            let mut prev = vehicle_idx;
            for &fi in route.iter() {
                let node = model.node(fi);
                let utility =
                    model.arc(prev, node) as f64 / (1.0 + self.penalty(prev, node) as f64);
                if worst.map_or(true, |(_, w)| utility > w) {
                    worst = Some(((prev, node), utility));
                }
                prev = node;
            }
        }

        if let Some((arc, _)) = worst {
            *self.penalties.entry(arc).or_insert(0) += 1;
        }
    }
}

/// Parallel cheapest insertion: grow every route at once, always taking the
/// globally cheapest feasible insertion.
fn construct(model: &Model<'_>) -> State {
    let mut state = State {
        routes: vec![Vec::new(); model.request.vehicles.len()],
        dropped: (0..model.feasible.len()).collect(),
    };

    loop {
        let mut best: Option<(usize, usize, usize, i64)> = None; // (fi, vehicle, pos, delta)

        for &fi in state.dropped.iter() {
            for &vehicle_idx in &model.allowed[fi] {
                let route = &state.routes[vehicle_idx];
                if route.len() >= model.capacity[vehicle_idx] {
                    continue;
                }
                let node = model.node(fi);
                for pos in 0..=route.len() {
                    let prev = if pos == 0 {
                        vehicle_idx
                    } else {
                        model.node(route[pos - 1])
                    };
                    let next = if pos == route.len() {
                        vehicle_idx
                    } else {
                        model.node(route[pos])
                    };
                    let delta =
                        model.arc(prev, node) + model.arc(node, next) - model.arc(prev, next);
                    if best.map_or(true, |(_, _, _, d)| delta < d) {
                        best = Some((fi, vehicle_idx, pos, delta));
                    }
                }
            }
        }

        match best {
            Some((fi, vehicle_idx, pos, _)) => {
                state.routes[vehicle_idx].insert(pos, fi);
                state.dropped.remove(&fi);
            }
            None => break,
        }
    }

    state
}

/// First-improvement local search on the augmented objective. Returns true
/// when a move was applied.
fn improve_once(ctx: &mut SearchContext<'_, '_>, state: &mut State) -> bool {
    let model = ctx.model;
    let current = ctx.augmented_cost(state);

    // Reinsert dropped cases: the drop penalty dominates arc costs, so any
    // feasible insertion is usually an improvement.
    let dropped: Vec<usize> = state.dropped.iter().copied().collect();
    for fi in dropped {
        for &vehicle_idx in &model.allowed[fi] {
            if state.routes[vehicle_idx].len() >= model.capacity[vehicle_idx] {
                continue;
            }
            let node = model.node(fi);
            for pos in 0..=state.routes[vehicle_idx].len() {
                ctx.evaluations += 1;
                let route = &state.routes[vehicle_idx];
                let prev = if pos == 0 { vehicle_idx } else { model.node(route[pos - 1]) };
                let next = if pos == route.len() { vehicle_idx } else { model.node(route[pos]) };
                let delta = model.arc(prev, node) + model.arc(node, next) - model.arc(prev, next)
                    + ctx.lambda * (ctx.penalty(prev, node) + ctx.penalty(node, next));
                if delta < DROP_PENALTY_METERS {
                    state.routes[vehicle_idx].insert(pos, fi);
                    state.dropped.remove(&fi);
                    return true;
                }
            }
        }
        if ctx.out_of_budget() {
            return false;
        }
    }

    // Intra-route 2-opt.
    for vehicle_idx in 0..state.routes.len() {
        let len = state.routes[vehicle_idx].len();
        if len < 3 {
            continue;
        }
        for i in 0..len - 1 {
            for j in i + 1..len {
                ctx.evaluations += 1;
                let mut candidate = state.clone();
                candidate.routes[vehicle_idx][i..=j].reverse();
                if ctx.augmented_cost(&candidate) < current {
                    *state = candidate;
                    return true;
                }
            }
        }
        if ctx.out_of_budget() {
            return false;
        }
    }

    // Relocate between routes (respecting allowed vehicles and capacity).
    for from_vehicle in 0..state.routes.len() {
        for visit_pos in 0..state.routes[from_vehicle].len() {
            let fi = state.routes[from_vehicle][visit_pos];
            for &to_vehicle in &model.allowed[fi] {
                if to_vehicle == from_vehicle
                    || state.routes[to_vehicle].len() >= model.capacity[to_vehicle]
                {
                    continue;
                }
                for pos in 0..=state.routes[to_vehicle].len() {
                    ctx.evaluations += 1;
                    let mut candidate = state.clone();
                    let moved = candidate.routes[from_vehicle].remove(visit_pos);
                    candidate.routes[to_vehicle].insert(pos, moved);
                    if ctx.augmented_cost(&candidate) < current {
                        *state = candidate;
                        return true;
                    }
                }
            }
            if ctx.out_of_budget() {
                return false;
            }
        }
    }

    // Swap positions between two routes.
    for a in 0..state.routes.len() {
        for b in a + 1..state.routes.len() {
            for i in 0..state.routes[a].len() {
                for j in 0..state.routes[b].len() {
                    let fa = state.routes[a][i];
                    let fb = state.routes[b][j];
                    if !model.allowed[fa].contains(&b) || !model.allowed[fb].contains(&a) {
                        continue;
                    }
                    ctx.evaluations += 1;
                    let mut candidate = state.clone();
                    candidate.routes[a][i] = fb;
                    candidate.routes[b][j] = fa;
                    if ctx.augmented_cost(&candidate) < current {
                        *state = candidate;
                        return true;
                    }
                }
            }
            if ctx.out_of_budget() {
                return false;
            }
        }
    }

    false
}

fn search(model: &Model<'_>, deadline: Instant) -> (State, SolveStatus) {
    let mut state = construct(model);

    if state.routes.iter().all(|r| r.is_empty()) {
        return (state, SolveStatus::NoSolution);
    }

    // Lambda scales penalties to the solution's average arc cost.
    let arc_count: usize = state
        .routes
        .iter()
        .map(|r| if r.is_empty() { 0 } else { r.len() + 1 })
        .sum();
    let initial_cost = model.cost(&state)
        - state.dropped.len() as i64 * DROP_PENALTY_METERS;
    let lambda = ((initial_cost as f64 * 0.2) / arc_count.max(1) as f64).max(1.0) as i64;

    let mut ctx = SearchContext {
        model,
        penalties: HashMap::new(),
        lambda,
        evaluations: 0,
        deadline,
    };

    let mut best = state.clone();
    let mut best_cost = model.cost(&best);
    let mut stall = 0usize;
    let mut status = SolveStatus::Converged;

    loop {
        // Descend to a local optimum of the augmented objective.
        while improve_once(&mut ctx, &mut state) {
            if ctx.out_of_budget() {
                break;
            }
        }

        let real = model.cost(&state);
        if real < best_cost {
            best = state.clone();
            best_cost = real;
            stall = 0;
        } else {
            stall += 1;
        }

        if ctx.out_of_budget() {
            status = SolveStatus::LimitReached;
            break;
        }
        if stall >= STALL_ROUNDS {
            break;
        }

        ctx.penalize_worst_arc(&state);
    }

    (best, status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Location, Priority, TimeWindow};
    use crate::optimizer::types::{Personnel, Vehicle};
    use chrono::NaiveDate;

    fn tw(start_h: u32, end_h: u32) -> TimeWindow {
        TimeWindow::new(
            NaiveTime::from_hms_opt(start_h, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(end_h, 0, 0).unwrap(),
        )
        .unwrap()
    }

    fn case(id: CaseId, lat: f64, lon: f64, skills: &[&str]) -> Case {
        Case {
            id,
            patient_id: id,
            patient_name: format!("Paciente {id}"),
            location: Location::new(lat, lon).unwrap(),
            required_skills: skills.iter().map(|s| s.to_string()).collect(),
            time_window: tw(8, 17),
            priority: Priority::Medium,
            estimated_duration_minutes: 30,
        }
    }

    fn vehicle(id: i64, lat: f64, lon: f64) -> Vehicle {
        Vehicle {
            id,
            identifier: format!("AMB-{id:02}"),
            capacity: 4,
            base_location: Location::new(lat, lon).unwrap(),
        }
    }

    fn person(id: i64, skills: &[&str]) -> Personnel {
        Personnel {
            id,
            name: format!("Personal {id}"),
            skills: skills.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn request(
        cases: Vec<Case>,
        vehicles: Vec<Vehicle>,
        personnel: Vec<Personnel>,
    ) -> OptimizationRequest {
        OptimizationRequest {
            cases,
            vehicles,
            personnel,
            date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
            distance_km: None,
            time_minutes: None,
            max_optimization_time_secs: 1,
            use_heuristic: false,
        }
    }

    #[test]
    fn assigns_cases_to_the_skilled_vehicle() {
        let req = request(
            vec![
                case(100, -33.4400, -70.6600, &["nurse"]),
                case(101, -33.4450, -70.6550, &["nurse"]),
            ],
            vec![vehicle(1, -33.4489, -70.6693)],
            vec![person(10, &["nurse"])],
        );

        let result = GuidedSearchStrategy::optimize(&req);
        assert!(result.success);
        assert_eq!(result.routes.len(), 1);
        assert_eq!(result.routes[0].visits.len(), 2);
        assert!(result.unassigned_cases.is_empty());

        // Sequences contiguous from zero, legs sum to the route total.
        let route = &result.routes[0];
        let sequences: Vec<u32> = route.visits.iter().map(|v| v.sequence).collect();
        assert_eq!(sequences, vec![0, 1]);
        let legs: f64 = route.visits.iter().map(|v| v.distance_km_from_previous).sum();
        assert!((legs - route.total_distance_km).abs() < 0.01);
    }

    #[test]
    fn uncoverable_case_is_prefiltered_and_reported() {
        let req = request(
            vec![
                case(100, -33.44, -70.66, &["nurse"]),
                case(101, -33.45, -70.65, &["physician"]),
            ],
            vec![vehicle(1, -33.4489, -70.6693)],
            vec![person(10, &["nurse"])],
        );

        let result = GuidedSearchStrategy::optimize(&req);
        assert!(result.success); // partial assignment still succeeds
        assert_eq!(result.assigned_count(), 1);
        assert_eq!(result.unassigned_cases.len(), 1);
        assert_eq!(result.unassigned_cases[0].id, 101);

        let analysis = result.skill_gap_analysis.unwrap();
        assert_eq!(analysis.most_demanded_skills[0].skill, "physician");
        assert_eq!(analysis.hiring_impact_simulation["physician"], 1);
    }

    #[test]
    fn no_coverable_cases_is_infeasible_not_a_panic() {
        let req = request(
            vec![case(100, -33.44, -70.66, &["physician"])],
            vec![vehicle(1, -33.4489, -70.6693)],
            vec![person(10, &["nurse"])],
        );

        let result = GuidedSearchStrategy::optimize(&req);
        assert!(!result.success);
        assert!(result.routes.is_empty());
        assert_eq!(result.unassigned_cases.len(), 1);
        assert!(result
            .constraint_violations
            .iter()
            .any(|v| v.kind == ConstraintKind::Infeasible));
    }

    #[test]
    fn skill_restrictions_route_cases_to_allowed_vehicles_only() {
        // Two vehicles; wound_care personnel land on one of them, so the
        // wound_care case must ride there.
        let req = request(
            vec![
                case(100, -33.44, -70.66, &["wound_care"]),
                case(101, -33.45, -70.65, &["nurse"]),
                case(102, -33.46, -70.64, &["nurse"]),
            ],
            vec![vehicle(1, -33.4489, -70.6693), vehicle(2, -33.4300, -70.6000)],
            vec![person(10, &["wound_care", "nurse"]), person(11, &["nurse"])],
        );

        let result = GuidedSearchStrategy::optimize(&req);
        assert!(result.success);
        assert!(result.unassigned_cases.is_empty());

        for route in &result.routes {
            let team: BTreeSet<&String> = route
                .personnel
                .iter()
                .flat_map(|p| p.skills.iter())
                .collect();
            for visit in &route.visits {
                assert!(
                    visit.case.required_skills.iter().all(|s| team.contains(s)),
                    "case {} landed on a vehicle without its skills",
                    visit.case.id
                );
            }
        }
    }

    #[test]
    fn arrival_times_step_from_work_start() {
        let req = request(
            vec![case(100, -33.4400, -70.6600, &["nurse"])],
            vec![vehicle(1, -33.4489, -70.6693)],
            vec![person(10, &["nurse"])],
        );

        let result = GuidedSearchStrategy::optimize(&req);
        let visit = &result.routes[0].visits[0];
        let work_start = req
            .date
            .and_time(NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert_eq!(
            visit.arrival,
            work_start + TimeDelta::minutes(visit.travel_minutes_from_previous)
        );
        assert_eq!(visit.departure, visit.arrival + TimeDelta::minutes(30));
    }

    #[test]
    fn construction_respects_permissive_capacity() {
        // Six cases, one vehicle with written capacity 4: permissive bound is
        // max(4, 6, 3) = 6, so everything fits on the single vehicle.
        let cases: Vec<Case> = (0..6)
            .map(|i| case(100 + i, -33.44 - 0.002 * i as f64, -70.66, &["nurse"]))
            .collect();
        let req = request(
            cases,
            vec![vehicle(1, -33.4489, -70.6693)],
            vec![person(10, &["nurse"])],
        );

        let result = GuidedSearchStrategy::optimize(&req);
        assert_eq!(result.assigned_count(), 6);
    }
}
