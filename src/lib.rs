// src/lib.rs
// Public library surface shared by the server, the dashboard and integration tests.

pub mod api;
pub mod bootstrap;
pub mod clock;
pub mod coalescer;
pub mod config;
pub mod display;
pub mod error;
pub mod event;
pub mod ingest;
pub mod metrics;
pub mod store;
pub mod telemetry;
pub mod transport;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::coalescer::{Coalescer, DisplayListener};
pub use crate::event::{Event, Location, RawEvent};
pub use crate::store::{EventStore, Snapshot};
