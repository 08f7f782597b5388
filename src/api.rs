//! HTTP surface for the core: optimization, tracking reads, visit status
//! updates and the live WebSocket. Handlers stay thin — they validate, call a
//! component, map domain errors to status codes and fan out live updates.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::distance::DistanceService;
use crate::domain::{
    CaseId, LocationLog, Personnel, Route, RouteId, RouteStatus, Vehicle, VehicleId, Visit,
    VisitId, VisitStatus,
};
use crate::error::{Error, Result};
use crate::live::{handle_socket, ConnectionManager};
use crate::optimizer::types::ConstraintViolation;
use crate::optimizer::OptimizationService;
use crate::store::Store;
use crate::tracking::delay::DelayAlert;
use crate::tracking::eta::EtaDetails;
use crate::tracking::location::NearbyVehicle;
use crate::tracking::route_tracker::RouteProgress;
use crate::tracking::{DelayDetector, EtaCalculator, LocationTracker, RouteTracker};

/// Location ingestion budget per vehicle per minute.
const LOCATION_RATE_LIMIT: u32 = 120;

pub struct AppState {
    pub config: Config,
    pub store: Arc<Store>,
    pub distance: Arc<DistanceService>,
    pub optimizer: OptimizationService,
    pub locations: Arc<LocationTracker>,
    pub tracker: RouteTracker,
    pub eta: Arc<EtaCalculator>,
    pub delays: DelayDetector,
    pub live: Arc<ConnectionManager>,
    /// Fixed-window counters: vehicle → (window minute, count).
    location_rate: Mutex<HashMap<VehicleId, (i64, u32)>>,
}

pub fn build_state(config: Config) -> Arc<AppState> {
    let store = Arc::new(Store::new());
    let distance = Arc::new(DistanceService::new(&config, Arc::clone(&store)));
    let optimizer = OptimizationService::new(Arc::clone(&store), Arc::clone(&distance));
    let locations = Arc::new(LocationTracker::new(Arc::clone(&store)));
    let tracker = RouteTracker::new(Arc::clone(&store));
    let eta = Arc::new(EtaCalculator::new(
        Arc::clone(&store),
        Arc::clone(&distance),
        Arc::clone(&locations),
    ));
    let delays = DelayDetector::new(Arc::clone(&store), Arc::clone(&eta));
    let live = Arc::new(ConnectionManager::new());

    Arc::new(AppState {
        config,
        store,
        distance,
        optimizer,
        locations,
        tracker,
        eta,
        delays,
        live,
        location_rate: Mutex::new(HashMap::new()),
    })
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/routes/optimize", post(optimize_routes))
        .route("/v1/routes", get(list_routes))
        .route("/v1/routes/{id}", get(get_route).delete(delete_route))
        .route("/v1/routes/{id}/status", patch(update_route_status))
        .route("/v1/tracking/location", post(record_location))
        .route("/v1/tracking/vehicle/{id}", get(vehicle_location))
        .route("/v1/tracking/vehicle/{id}/history", get(vehicle_history))
        .route("/v1/tracking/nearby", get(nearby_vehicles))
        .route("/v1/tracking/routes/{id}/progress", get(route_progress))
        .route("/v1/tracking/routes/{id}/delays", get(route_delays))
        .route("/v1/tracking/visits/{id}/eta", get(visit_eta))
        .route("/v1/visits/{id}/status", patch(update_visit_status))
        .route("/v1/tracking/live", get(live_tracking))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
}

async fn health() -> Json<Health> {
    Json(Health { status: "UP" })
}

// ── Optimization ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct OptimizeRequest {
    pub case_ids: Vec<CaseId>,
    pub vehicle_ids: Vec<VehicleId>,
    pub date: NaiveDate,
    #[serde(default)]
    pub use_heuristic: bool,
    #[serde(default = "default_max_time")]
    pub max_optimization_time: u64,
}

fn default_max_time() -> u64 {
    60
}

#[derive(Serialize)]
pub struct OptimizeResponse {
    pub success: bool,
    pub route_ids: Vec<RouteId>,
    pub unassigned_case_ids: Vec<CaseId>,
    pub constraint_violations: Vec<ConstraintViolation>,
    pub optimization_time_seconds: f64,
    pub strategy_used: String,
    pub total_distance_km: f64,
    pub total_time_minutes: i64,
    pub skill_gap_analysis: Option<serde_json::Value>,
}

async fn optimize_routes(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OptimizeRequest>,
) -> Result<Json<OptimizeResponse>> {
    let outcome = state
        .optimizer
        .optimize_routes(
            &body.case_ids,
            &body.vehicle_ids,
            body.date,
            body.use_heuristic,
            body.max_optimization_time,
        )
        .await?;

    let result = outcome.result;
    let skill_gap_analysis = result
        .skill_gap_analysis
        .as_ref()
        .and_then(|a| serde_json::to_value(a).ok());

    Ok(Json(OptimizeResponse {
        success: result.success,
        route_ids: outcome.route_ids,
        unassigned_case_ids: result.unassigned_cases.iter().map(|c| c.id).collect(),
        constraint_violations: result.constraint_violations,
        optimization_time_seconds: result.optimization_time_seconds,
        strategy_used: result.strategy_used.to_string(),
        total_distance_km: result.total_distance_km,
        total_time_minutes: result.total_time_minutes,
        skill_gap_analysis,
    }))
}

// ── Routes ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct RouteDetail {
    #[serde(flatten)]
    pub route: Route,
    pub vehicle: Vehicle,
    pub personnel: Vec<Personnel>,
    pub visits: Vec<Visit>,
}

async fn list_routes(State(state): State<Arc<AppState>>) -> Json<Vec<Route>> {
    Json(state.store.routes())
}

async fn get_route(
    State(state): State<Arc<AppState>>,
    Path(route_id): Path<RouteId>,
) -> Result<Json<RouteDetail>> {
    let route = state.store.route(route_id)?;
    let vehicle = state.store.vehicle(route.vehicle_id)?;
    let personnel = route
        .assigned_personnel
        .iter()
        .map(|&id| state.store.personnel_by_id(id))
        .collect::<Result<Vec<_>>>()?;
    let visits = state.store.visits_of_route(route_id);
    Ok(Json(RouteDetail {
        route,
        vehicle,
        personnel,
        visits,
    }))
}

#[derive(Deserialize)]
struct RouteStatusBody {
    status: RouteStatus,
}

async fn update_route_status(
    State(state): State<Arc<AppState>>,
    Path(route_id): Path<RouteId>,
    Json(body): Json<RouteStatusBody>,
) -> Result<Json<Route>> {
    let route = state.store.route(route_id)?;
    if !route.status.can_transition_to(body.status) {
        return Err(Error::invalid(format!(
            "invalid route status transition from {:?} to {:?}",
            route.status, body.status
        )));
    }
    if body.status == RouteStatus::Cancelled {
        return Ok(Json(state.tracker.cancel_route(route_id, None)?));
    }
    state
        .store
        .with_route_mut(route_id, |r| r.status = body.status)?;
    Ok(Json(state.store.route(route_id)?))
}

/// Soft-cancel of a draft route. Anything already activated must go through
/// the status endpoint; completed routes are untouchable.
async fn delete_route(
    State(state): State<Arc<AppState>>,
    Path(route_id): Path<RouteId>,
) -> Result<Json<Route>> {
    let route = state.store.route(route_id)?;
    if matches!(
        route.status,
        RouteStatus::Active | RouteStatus::InProgress | RouteStatus::Completed
    ) {
        return Err(Error::Forbidden(format!(
            "no se puede eliminar una ruta en estado {:?}",
            route.status
        )));
    }
    Ok(Json(state.tracker.cancel_route(route_id, Some("eliminada"))?))
}

// ── Tracking ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LocationQuery {
    vehicle_id: VehicleId,
}

#[derive(Deserialize)]
pub struct LocationBody {
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: Option<f64>,
    pub heading_degrees: Option<f64>,
    pub accuracy_meters: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

fn over_rate_limit(state: &AppState, vehicle_id: VehicleId) -> bool {
    let minute = Utc::now().timestamp() / 60;
    let mut windows = state.location_rate.lock();
    let entry = windows.entry(vehicle_id).or_insert((minute, 0));
    if entry.0 != minute {
        *entry = (minute, 0);
    }
    entry.1 += 1;
    entry.1 > LOCATION_RATE_LIMIT
}

async fn record_location(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LocationQuery>,
    Json(body): Json<LocationBody>,
) -> Result<axum::response::Response> {
    if over_rate_limit(&state, query.vehicle_id) {
        return Ok((StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded").into_response());
    }

    let log = state.locations.record(
        query.vehicle_id,
        body.latitude,
        body.longitude,
        body.speed_kmh,
        body.heading_degrees,
        body.accuracy_meters,
        body.timestamp,
    )?;

    state.live.broadcast_location_update(
        query.vehicle_id,
        serde_json::to_value(&log).unwrap_or_default(),
    );

    // A fresh sample can move the current visit's projection enough to
    // matter; significant shifts and new delays fan out to route subscribers.
    if let Some(route) = state.store.active_route_for_vehicle(query.vehicle_id) {
        if let Ok(Some(visit)) = state.tracker.current_visit(route.id) {
            if let Ok((true, _)) = state
                .eta
                .significant_change(visit.id, query.vehicle_id)
                .await
            {
                if let Ok(Some(details)) =
                    state.eta.eta_details(visit.id, query.vehicle_id).await
                {
                    state.live.broadcast_eta_update(
                        route.id,
                        visit.id,
                        serde_json::to_value(&details).unwrap_or_default(),
                    );
                }
            }
            if let Ok(Some(alert)) = state
                .delays
                .check_visit(visit.id, query.vehicle_id, false)
                .await
            {
                state.live.broadcast_delay_alert(
                    route.id,
                    serde_json::to_value(&alert).unwrap_or_default(),
                );
            }
        }
    }

    Ok(Json(log).into_response())
}

async fn vehicle_location(
    State(state): State<Arc<AppState>>,
    Path(vehicle_id): Path<VehicleId>,
) -> Result<Json<Option<LocationLog>>> {
    Ok(Json(state.locations.current(vehicle_id)?))
}

#[derive(Deserialize)]
struct HistoryQuery {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    100
}

async fn vehicle_history(
    State(state): State<Arc<AppState>>,
    Path(vehicle_id): Path<VehicleId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<LocationLog>>> {
    Ok(Json(state.locations.history(
        vehicle_id,
        query.start,
        query.end,
        query.limit,
    )?))
}

#[derive(Deserialize)]
struct NearbyQuery {
    latitude: f64,
    longitude: f64,
    #[serde(default = "default_radius")]
    radius_meters: f64,
    #[serde(default = "default_max_age")]
    max_age_minutes: i64,
}

fn default_radius() -> f64 {
    5000.0
}

fn default_max_age() -> i64 {
    10
}

async fn nearby_vehicles(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<Vec<NearbyVehicle>>> {
    Ok(Json(state.locations.nearby(
        query.latitude,
        query.longitude,
        query.radius_meters,
        query.max_age_minutes,
    )?))
}

async fn route_progress(
    State(state): State<Arc<AppState>>,
    Path(route_id): Path<RouteId>,
) -> Result<Json<RouteProgress>> {
    Ok(Json(state.tracker.progress(route_id)?))
}

async fn route_delays(
    State(state): State<Arc<AppState>>,
    Path(route_id): Path<RouteId>,
) -> Result<Json<Vec<DelayAlert>>> {
    let alerts = state.delays.detect_route(route_id).await?;
    for alert in &alerts {
        state
            .live
            .broadcast_delay_alert(route_id, serde_json::to_value(alert).unwrap_or_default());
    }
    Ok(Json(alerts))
}

async fn visit_eta(
    State(state): State<Arc<AppState>>,
    Path(visit_id): Path<VisitId>,
) -> Result<Json<Option<EtaDetails>>> {
    let visit = state.store.visit(visit_id)?;
    let route = state.store.route(visit.route_id)?;
    Ok(Json(
        state.eta.eta_details(visit_id, route.vehicle_id).await?,
    ))
}

// ── Visits ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct VisitStatusBody {
    pub status: VisitStatus,
    pub notes: Option<String>,
}

async fn update_visit_status(
    State(state): State<Arc<AppState>>,
    Path(visit_id): Path<VisitId>,
    Json(body): Json<VisitStatusBody>,
) -> Result<Json<Visit>> {
    let visit = state
        .tracker
        .update_visit_status(visit_id, body.status, body.notes)?;

    state.live.broadcast_visit_status_update(
        visit.route_id,
        visit.id,
        serde_json::to_value(&visit).unwrap_or_default(),
    );

    Ok(Json(visit))
}

// ── Live WebSocket ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LiveQuery {
    token: Option<String>,
}

async fn live_tracking(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LiveQuery>,
    ws: WebSocketUpgrade,
) -> axum::response::Response {
    let manager = Arc::clone(&state.live);
    let secret = state.config.secret_key.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, manager, query.token, secret))
}
