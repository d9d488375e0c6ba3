// src/ingest.rs
//! Single write path into the event store: validate, normalize, record.

use std::sync::Arc;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::clock::Clock;
use crate::error::IngestError;
use crate::event::{Location, RawEvent};
use crate::store::{Admission, EventStore};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_events_total", "Events accepted by the write path.");
        describe_counter!(
            "ingest_rejected_total",
            "Writes rejected for a missing payload."
        );
        describe_counter!(
            "ingest_history_admitted_total",
            "Detections admitted to history."
        );
        describe_counter!(
            "ingest_cooldown_suppressed_total",
            "Detections suppressed by the history cooldown."
        );
        describe_gauge!(
            "ingest_last_event_ts_ms",
            "Timestamp (ms) of the most recently ingested event."
        );
    });
}

/// Which write contract a request uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestVariant {
    /// Payload-bearing: an image is mandatory.
    Frame,
    /// Metadata-only: no mandatory fields.
    Metadata,
}

impl IngestVariant {
    pub fn label(self) -> &'static str {
        match self {
            IngestVariant::Frame => "frame",
            IngestVariant::Metadata => "metadata",
        }
    }
}

/// Outcome of a successful ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestReceipt {
    /// Effective timestamp after defaulting.
    pub timestamp: i64,
    pub admission: Admission,
}

#[derive(Clone)]
pub struct Ingestor {
    store: Arc<EventStore>,
    clock: Arc<dyn Clock>,
}

impl Ingestor {
    pub fn new(store: Arc<EventStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn store(&self) -> &Arc<EventStore> {
        &self.store
    }

    /// Validate `raw`, then record it as latest and offer it to history in one
    /// store critical section. Rejections leave the store untouched.
    ///
    /// Replaying the same event after the cooldown window admits it again;
    /// the cooldown is time-relative, not content-relative.
    pub fn ingest(
        &self,
        raw: RawEvent,
        variant: IngestVariant,
    ) -> Result<IngestReceipt, IngestError> {
        ensure_metrics_described();

        if variant == IngestVariant::Frame && raw.payload().is_none() {
            counter!("ingest_rejected_total").increment(1);
            tracing::debug!(target: "ingest", "rejecting frame without payload");
            return Err(IngestError::MissingPayload);
        }

        let event = raw.into_event(self.clock.now_ms(), Location::SENTINEL);
        let timestamp = event.timestamp;
        let detections = event.detection_count;
        let admission = self.store.apply(event)?;

        counter!("ingest_events_total", "variant" => variant.label()).increment(1);
        gauge!("ingest_last_event_ts_ms").set(timestamp as f64);
        match admission {
            Admission::Admitted => {
                counter!("ingest_history_admitted_total").increment(1);
                tracing::info!(
                    target: "ingest",
                    timestamp,
                    detections,
                    "detection admitted to history"
                );
            }
            Admission::CoolingDown { since_last_ms } => {
                counter!("ingest_cooldown_suppressed_total").increment(1);
                tracing::debug!(target: "ingest", timestamp, since_last_ms, "cooldown");
            }
            Admission::Quiet => {}
        }

        Ok(IngestReceipt {
            timestamp,
            admission,
        })
    }
}
