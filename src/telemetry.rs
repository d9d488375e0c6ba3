//! Tracing subscriber setup shared by both binaries.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "uplink_monitor=info,uplink_dashboard=info,warn";

/// Install a global subscriber.
///
/// Filter comes from `RUST_LOG` (default: crate at info, everything else warn);
/// `UPLINK_LOG_JSON=1` switches to JSON lines. A no-op when a subscriber is
/// already installed (e.g. by the Shuttle runtime).
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json = std::env::var("UPLINK_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };

    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
