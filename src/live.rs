//! Live-tracking fan-out: a bidirectional session registry over WebSockets.
//!
//! Each session owns an unbounded outbound queue drained by a single writer
//! task, so frames to one connection are delivered in enqueue order. The
//! registry itself is a shared map under a `RwLock`; a background task pings
//! every session each 30 s and evicts those that miss two pongs in a row.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth;
use crate::domain::{RouteId, VehicleId};

pub type ConnectionId = Uuid;

/// Sessions that miss this many pings in a row are disconnected.
const MAX_MISSED_PINGS: u32 = 2;
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket close code for policy violations (bad token).
const CLOSE_POLICY_VIOLATION: u16 = 1008;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionKind {
    Vehicle,
    Route,
}

/// Inbound client frames; anything else elicits an error frame.
#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum ClientFrame {
    Subscribe {
        #[serde(rename = "type")]
        kind: SubscriptionKind,
        id: i64,
    },
    Unsubscribe {
        #[serde(rename = "type")]
        kind: SubscriptionKind,
        id: i64,
    },
    Pong,
}

struct Session {
    tx: mpsc::UnboundedSender<String>,
    #[allow(dead_code)]
    user_id: Option<i64>,
    missed_pings: u32,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<ConnectionId, Session>,
    vehicle_subscriptions: HashMap<VehicleId, HashSet<ConnectionId>>,
    route_subscriptions: HashMap<RouteId, HashSet<ConnectionId>>,
    /// Reverse index for fast disconnect cleanup.
    by_connection: HashMap<ConnectionId, (HashSet<VehicleId>, HashSet<RouteId>)>,
}

#[derive(Default)]
pub struct ConnectionManager {
    registry: RwLock<Registry>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session and emits `connection_established` on its queue.
    pub fn register(
        &self,
        tx: mpsc::UnboundedSender<String>,
        user_id: Option<i64>,
    ) -> ConnectionId {
        let connection_id = Uuid::new_v4();
        let frame = json!({
            "type": "connection_established",
            "connection_id": connection_id,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let _ = tx.send(frame.to_string());

        self.registry.write().sessions.insert(
            connection_id,
            Session {
                tx,
                user_id,
                missed_pings: 0,
            },
        );
        info!(%connection_id, "live session connected");
        connection_id
    }

    /// Removes the session and every subscription it held.
    pub fn disconnect(&self, connection_id: ConnectionId) {
        let mut registry = self.registry.write();
        registry.sessions.remove(&connection_id);
        if let Some((vehicles, routes)) = registry.by_connection.remove(&connection_id) {
            for vehicle_id in vehicles {
                if let Some(subs) = registry.vehicle_subscriptions.get_mut(&vehicle_id) {
                    subs.remove(&connection_id);
                }
            }
            for route_id in routes {
                if let Some(subs) = registry.route_subscriptions.get_mut(&route_id) {
                    subs.remove(&connection_id);
                }
            }
        }
        debug!(%connection_id, "live session disconnected");
    }

    pub fn subscribe(&self, connection_id: ConnectionId, kind: SubscriptionKind, id: i64) {
        let mut registry = self.registry.write();
        let entry = registry.by_connection.entry(connection_id).or_default();
        match kind {
            SubscriptionKind::Vehicle => {
                entry.0.insert(id);
                registry
                    .vehicle_subscriptions
                    .entry(id)
                    .or_default()
                    .insert(connection_id);
            }
            SubscriptionKind::Route => {
                entry.1.insert(id);
                registry
                    .route_subscriptions
                    .entry(id)
                    .or_default()
                    .insert(connection_id);
            }
        }

        if let Some(session) = registry.sessions.get(&connection_id) {
            let frame = match kind {
                SubscriptionKind::Vehicle => json!({
                    "type": "subscription_confirmed",
                    "subscription_type": "vehicle",
                    "vehicle_id": id,
                    "timestamp": Utc::now().to_rfc3339(),
                }),
                SubscriptionKind::Route => json!({
                    "type": "subscription_confirmed",
                    "subscription_type": "route",
                    "route_id": id,
                    "timestamp": Utc::now().to_rfc3339(),
                }),
            };
            let _ = session.tx.send(frame.to_string());
        }
    }

    pub fn unsubscribe(&self, connection_id: ConnectionId, kind: SubscriptionKind, id: i64) {
        let mut registry = self.registry.write();
        match kind {
            SubscriptionKind::Vehicle => {
                if let Some(subs) = registry.vehicle_subscriptions.get_mut(&id) {
                    subs.remove(&connection_id);
                }
                if let Some(entry) = registry.by_connection.get_mut(&connection_id) {
                    entry.0.remove(&id);
                }
            }
            SubscriptionKind::Route => {
                if let Some(subs) = registry.route_subscriptions.get_mut(&id) {
                    subs.remove(&connection_id);
                }
                if let Some(entry) = registry.by_connection.get_mut(&connection_id) {
                    entry.1.remove(&id);
                }
            }
        }

        if let Some(session) = registry.sessions.get(&connection_id) {
            let kind_label = match kind {
                SubscriptionKind::Vehicle => "vehicle",
                SubscriptionKind::Route => "route",
            };
            let frame = json!({
                "type": "unsubscribed",
                "subscription_type": kind_label,
                "id": id,
                "timestamp": Utc::now().to_rfc3339(),
            });
            let _ = session.tx.send(frame.to_string());
        }
    }

    pub fn mark_pong(&self, connection_id: ConnectionId) {
        if let Some(session) = self.registry.write().sessions.get_mut(&connection_id) {
            session.missed_pings = 0;
        }
    }

    // ── Broadcasts ──────────────────────────────────────────────────────────

    pub fn broadcast_location_update(&self, vehicle_id: VehicleId, data: serde_json::Value) {
        self.broadcast_to_vehicle(
            vehicle_id,
            json!({
                "type": "location_update",
                "vehicle_id": vehicle_id,
                "data": data,
                "timestamp": Utc::now().to_rfc3339(),
            }),
        );
    }

    pub fn broadcast_visit_status_update(
        &self,
        route_id: RouteId,
        visit_id: i64,
        data: serde_json::Value,
    ) {
        self.broadcast_to_route(
            route_id,
            json!({
                "type": "visit_status_update",
                "route_id": route_id,
                "visit_id": visit_id,
                "data": data,
                "timestamp": Utc::now().to_rfc3339(),
            }),
        );
    }

    pub fn broadcast_eta_update(&self, route_id: RouteId, visit_id: i64, data: serde_json::Value) {
        self.broadcast_to_route(
            route_id,
            json!({
                "type": "eta_update",
                "route_id": route_id,
                "visit_id": visit_id,
                "data": data,
                "timestamp": Utc::now().to_rfc3339(),
            }),
        );
    }

    pub fn broadcast_delay_alert(&self, route_id: RouteId, data: serde_json::Value) {
        self.broadcast_to_route(
            route_id,
            json!({
                "type": "delay_alert",
                "route_id": route_id,
                "data": data,
                "timestamp": Utc::now().to_rfc3339(),
            }),
        );
    }

    fn broadcast_to_vehicle(&self, vehicle_id: VehicleId, frame: serde_json::Value) {
        let targets: Vec<ConnectionId> = self
            .registry
            .read()
            .vehicle_subscriptions
            .get(&vehicle_id)
            .map(|subs| subs.iter().copied().collect())
            .unwrap_or_default();
        self.send_to(&targets, frame);
    }

    fn broadcast_to_route(&self, route_id: RouteId, frame: serde_json::Value) {
        let targets: Vec<ConnectionId> = self
            .registry
            .read()
            .route_subscriptions
            .get(&route_id)
            .map(|subs| subs.iter().copied().collect())
            .unwrap_or_default();
        self.send_to(&targets, frame);
    }

    fn send_to(&self, targets: &[ConnectionId], frame: serde_json::Value) {
        let text = frame.to_string();
        let mut dead = Vec::new();
        {
            let registry = self.registry.read();
            for connection_id in targets {
                match registry.sessions.get(connection_id) {
                    Some(session) => {
                        if session.tx.send(text.clone()).is_err() {
                            dead.push(*connection_id);
                        }
                    }
                    None => dead.push(*connection_id),
                }
            }
        }
        for connection_id in dead {
            self.disconnect(connection_id);
        }
    }

    /// One keep-alive round: evicts sessions that already missed two pings,
    /// then pings the rest.
    pub fn ping_all(&self) {
        let frame = json!({
            "type": "ping",
            "timestamp": Utc::now().to_rfc3339(),
        })
        .to_string();

        let mut dead = Vec::new();
        {
            let mut registry = self.registry.write();
            for (connection_id, session) in registry.sessions.iter_mut() {
                if session.missed_pings >= MAX_MISSED_PINGS
                    || session.tx.send(frame.clone()).is_err()
                {
                    dead.push(*connection_id);
                } else {
                    session.missed_pings += 1;
                }
            }
        }
        for connection_id in dead {
            warn!(%connection_id, "live session unresponsive, evicting");
            self.disconnect(connection_id);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.registry.read().sessions.len()
    }

    pub fn vehicle_subscriber_count(&self, vehicle_id: VehicleId) -> usize {
        self.registry
            .read()
            .vehicle_subscriptions
            .get(&vehicle_id)
            .map_or(0, |s| s.len())
    }

    pub fn route_subscriber_count(&self, route_id: RouteId) -> usize {
        self.registry
            .read()
            .route_subscriptions
            .get(&route_id)
            .map_or(0, |s| s.len())
    }
}

/// Keep-alive pinger; runs for the life of the server.
pub fn spawn_keepalive(manager: Arc<ConnectionManager>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PING_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            manager.ping_all();
        }
    })
}

/// Drives one WebSocket session: token check, writer task, inbound loop.
pub async fn handle_socket(
    socket: WebSocket,
    manager: Arc<ConnectionManager>,
    token: Option<String>,
    secret: String,
) {
    let mut socket = socket;

    // Optional bearer token; a present-but-invalid one closes the socket.
    let user_id = match token {
        Some(token) => match auth::verify_access_token(&secret, &token) {
            Ok(principal) => Some(principal.user_id),
            Err(_) => {
                let _ = socket
                    .send(Message::Close(Some(CloseFrame {
                        code: CLOSE_POLICY_VIOLATION,
                        reason: "invalid authentication token".into(),
                    })))
                    .await;
                return;
            }
        },
        None => None,
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let connection_id = manager.register(tx, user_id);

    let (mut ws_tx, mut ws_rx) = socket.split();

    // Single writer drains the queue; per-connection ordering follows from it.
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = ws_rx.next().await {
        let message = match message {
            Ok(m) => m,
            Err(_) => break,
        };
        match message {
            Message::Text(text) => {
                handle_client_frame(&manager, connection_id, text.as_str());
            }
            Message::Pong(_) => manager.mark_pong(connection_id),
            Message::Close(_) => break,
            _ => {}
        }
    }

    manager.disconnect(connection_id);
    writer.abort();
}

fn handle_client_frame(manager: &ConnectionManager, connection_id: ConnectionId, text: &str) {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Subscribe { kind, id }) => manager.subscribe(connection_id, kind, id),
        Ok(ClientFrame::Unsubscribe { kind, id }) => manager.unsubscribe(connection_id, kind, id),
        Ok(ClientFrame::Pong) => manager.mark_pong(connection_id),
        Err(e) => {
            debug!(%connection_id, "unparseable client frame: {e}");
            let registry = manager.registry.read();
            if let Some(session) = registry.sessions.get(&connection_id) {
                let frame = json!({
                    "type": "error",
                    "message": "unknown action",
                    "timestamp": Utc::now().to_rfc3339(),
                });
                let _ = session.tx.send(frame.to_string());
            }
        }
    }
}
