//! Console rendering of the dashboard view through `tracing`.

use chrono::{Local, TimeZone};

use crate::coalescer::DisplayListener;
use crate::event::{Event, Location};
use crate::transport::LinkStatus;

/// Headless display: every view change becomes one log line.
#[derive(Debug, Default)]
pub struct ConsoleDisplay;

pub fn format_coordinate(v: f64) -> String {
    format!("{v:.10}")
}

pub fn format_throughput(per_sec: f64) -> String {
    format!("{per_sec:.1} fps")
}

/// One history row: local time plus a 4-decimal fix.
pub fn format_history_row(ev: &Event) -> String {
    let time = Local
        .timestamp_millis_opt(ev.timestamp)
        .single()
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    format!(
        "{time} L:{:.4} O:{:.4} ({} detected)",
        ev.location.lat, ev.location.lng, ev.detection_count
    )
}

impl DisplayListener for ConsoleDisplay {
    fn on_frame(&self, frame: &str) {
        tracing::trace!(target: "display", bytes = frame.len(), "frame painted");
    }

    fn on_position(&self, location: Location) {
        tracing::info!(
            target: "display",
            lat = %format_coordinate(location.lat),
            lng = %format_coordinate(location.lng),
            "position"
        );
    }

    fn on_detections(&self, count: Option<u32>) {
        match count {
            Some(n) => tracing::info!(target: "display", "Detections: {n}"),
            None => tracing::info!(target: "display", "detections cleared"),
        }
    }

    fn on_history(&self, history: &[Event]) {
        if history.is_empty() {
            tracing::info!(target: "display", "registry: Zero_Entries");
            return;
        }
        for (i, ev) in history.iter().enumerate() {
            tracing::info!(target: "display", "registry[{i}] {}", format_history_row(ev));
        }
    }

    fn on_throughput(&self, per_sec: f64) {
        tracing::info!(target: "display", "{}", format_throughput(per_sec));
    }

    fn on_status(&self, status: LinkStatus) {
        tracing::info!(target: "display", status = status.label(), "uplink");
    }

    fn on_no_data(&self) {
        tracing::info!(target: "display", "registry: Zero_Entries (no data yet)");
    }
}
