use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::clock::{Clock, SystemClock};
use crate::error::ApiError;
use crate::event::{Event, RawEvent};
use crate::ingest::{IngestVariant, Ingestor};
use crate::store::{EventStore, Snapshot};

#[derive(Clone)]
pub struct AppState {
    ingestor: Ingestor,
}

impl AppState {
    pub fn new(store: Arc<EventStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            ingestor: Ingestor::new(store, clock),
        }
    }

    /// Fresh, empty store on the system clock.
    pub fn fresh() -> Self {
        Self::new(Arc::new(EventStore::new()), Arc::new(SystemClock))
    }

    pub fn store(&self) -> &Arc<EventStore> {
        self.ingestor.store()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/upload-frame", post(upload_frame).get(read_snapshot))
        .route("/api/detections", post(upload_detection).get(read_history))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(serde::Serialize)]
struct WriteResp {
    success: bool,
    timestamp: i64,
}

#[derive(serde::Serialize)]
struct HistoryResp {
    history: Vec<Event>,
}

async fn upload_frame(
    State(state): State<AppState>,
    body: Result<Json<RawEvent>, JsonRejection>,
) -> Result<Json<WriteResp>, ApiError> {
    write(&state, body, IngestVariant::Frame)
}

async fn upload_detection(
    State(state): State<AppState>,
    body: Result<Json<RawEvent>, JsonRejection>,
) -> Result<Json<WriteResp>, ApiError> {
    write(&state, body, IngestVariant::Metadata)
}

fn write(
    state: &AppState,
    body: Result<Json<RawEvent>, JsonRejection>,
    variant: IngestVariant,
) -> Result<Json<WriteResp>, ApiError> {
    let Json(raw) = body.map_err(|rej| ApiError::Malformed(rej.body_text()))?;
    let receipt = state.ingestor.ingest(raw, variant)?;
    Ok(Json(WriteResp {
        success: true,
        timestamp: receipt.timestamp,
    }))
}

async fn read_snapshot(State(state): State<AppState>) -> Result<Json<Snapshot>, ApiError> {
    Ok(Json(state.store().snapshot()?))
}

async fn read_history(State(state): State<AppState>) -> Result<Json<HistoryResp>, ApiError> {
    let snap = state.store().snapshot()?;
    Ok(Json(HistoryResp {
        history: snap.history,
    }))
}
