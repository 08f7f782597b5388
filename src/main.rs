//! Dispatch core server binary.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use ruteo::api;
use ruteo::config::Config;
use ruteo::demo_data;
use ruteo::live;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("ruteo=info".parse().expect("directive")),
        )
        .init();

    let config = Config::from_env();
    let bind = config.bind_address.clone();
    let state = api::build_state(config);

    // Empty store means a local run; seed the demo scenario so the API has
    // something to optimize and track.
    if state.store.active_personnel().is_empty() {
        let ids = demo_data::seed_santiago(&state.store, 42);
        info!(
            cases = ids.case_ids.len(),
            vehicles = ids.vehicle_ids.len(),
            "seeded demo data"
        );
    }

    live::spawn_keepalive(Arc::clone(&state.live));

    let app = api::create_router(state);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .expect("bind server address");
    info!("listening on http://{bind}");
    axum::serve(listener, app).await.expect("server run");
}
