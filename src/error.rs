// src/error.rs
//! Typed errors for the write path and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Failures of the in-memory event store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A writer panicked while holding the store lock.
    #[error("event store lock poisoned")]
    Poisoned,
}

/// Failures of a single ingestion.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Frame variant used without an image payload.
    #[error("frameData is required")]
    MissingPayload,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// HTTP-layer error for the ingestion and read routes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// Body was not a JSON object we could read. Loose numeric fields are
    /// coerced rather than rejected; only non-JSON bodies and wrong field
    /// kinds (e.g. a numeric `frameData`) end up here.
    #[error("{0}")]
    Malformed(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Ingest(IngestError::MissingPayload) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ApiError::Malformed(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Ingest(IngestError::Store(e)) | ApiError::Store(e) => {
                tracing::error!(target: "ingest", error = %e, "error processing frame");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to process frame".to_string(),
                )
            }
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn missing_payload_maps_to_400() {
        assert_eq!(
            status_of(IngestError::MissingPayload.into()),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn malformed_body_maps_to_400() {
        assert_eq!(
            status_of(ApiError::Malformed("expected value".into())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn poisoned_store_maps_to_500() {
        assert_eq!(
            status_of(IngestError::Store(StoreError::Poisoned).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(StoreError::Poisoned.into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
