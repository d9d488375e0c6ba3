//! Uplink monitor server entrypoint.
//! Boots the Axum HTTP server hosting the event store, the write/read
//! endpoints and `/metrics`.

use std::sync::Arc;

use shuttle_axum::ShuttleAxum;

use uplink_monitor::clock::SystemClock;
use uplink_monitor::metrics::Metrics;
use uplink_monitor::{api, config, telemetry, AppState, EventStore};

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    let cfg = config::load_default()?;
    let limits = cfg.store.limits();
    let metrics = Metrics::init(limits)?;

    // One store per process, handed to the routes by Arc.
    let store = Arc::new(EventStore::with_limits(limits));
    let state = AppState::new(store, Arc::new(SystemClock));

    tracing::info!(
        history_capacity = limits.history_capacity,
        cooldown_ms = limits.cooldown_ms,
        "uplink monitor ready"
    );

    let router = api::router(state).merge(metrics.router());
    Ok(router.into())
}
