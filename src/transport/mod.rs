// src/transport/mod.rs
//! Live subscription to the sensor feed.
//!
//! An `EventSource` (MQTT push or HTTP polling) is driven by a reconnecting
//! loop that normalizes each message and fans it out to `EventSink`s in
//! receive order. Link status follows
//! `Connecting -> Live -> Disconnected -> Connecting` until shutdown.

pub mod mqtt;
pub mod persist;
pub mod polling;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::event::{Event, Location, RawEvent};

pub use mqtt::MqttSource;
pub use persist::{PersistPolicy, Persister};
pub use polling::PollingSource;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "transport_messages_total",
            "Messages parsed and forwarded to sinks."
        );
        describe_counter!(
            "transport_malformed_total",
            "Messages dropped because they did not parse."
        );
        describe_counter!(
            "transport_reconnects_total",
            "Subscription attempts after a drop."
        );
    });
}

/// User-visible link state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Connecting,
    Live,
    Disconnected,
}

impl LinkStatus {
    pub fn label(self) -> &'static str {
        match self {
            LinkStatus::Connecting => "CONNECTING",
            LinkStatus::Live => "LIVE",
            LinkStatus::Disconnected => "DISCONNECTED",
        }
    }
}

/// A restartable feed of raw sensor messages.
#[async_trait::async_trait]
pub trait EventSource: Send {
    /// Establish the subscription; returns once it is acknowledged.
    async fn connect(&mut self) -> Result<()>;

    /// Next raw message. `Ok(None)` means the link closed cleanly.
    async fn recv(&mut self) -> Result<Option<Vec<u8>>>;

    /// Release the underlying connection.
    async fn close(&mut self) {}

    fn name(&self) -> &'static str;
}

/// Downstream consumer of normalized events. Must not block.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &Event);

    fn on_status(&self, _status: LinkStatus) {}
}

#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    pub reconnect_delay: Duration,
    /// Location used when a message carries none.
    pub fallback_location: Location,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(1),
            fallback_location: Location::SENTINEL,
        }
    }
}

/// Handle to a running subscription. Dropping it also stops the loop.
pub struct TransportHandle {
    status: watch::Receiver<LinkStatus>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TransportHandle {
    pub fn status(&self) -> LinkStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    /// Tear the subscription down, including any pending reconnect timer, and
    /// wait for the loop to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(target: "transport", error = %e, "transport task ended abnormally");
        }
    }
}

pub struct Transport;

impl Transport {
    pub fn spawn<S>(
        source: S,
        sinks: Vec<Arc<dyn EventSink>>,
        cfg: TransportConfig,
        clock: Arc<dyn Clock>,
    ) -> TransportHandle
    where
        S: EventSource + 'static,
    {
        ensure_metrics_described();

        let (status_tx, status_rx) = watch::channel(LinkStatus::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let link = Link {
            sinks,
            status: status_tx,
            clock,
            cfg,
        };
        let task = tokio::spawn(run(source, link, shutdown_rx));

        TransportHandle {
            status: status_rx,
            shutdown: shutdown_tx,
            task,
        }
    }
}

struct Link {
    sinks: Vec<Arc<dyn EventSink>>,
    status: watch::Sender<LinkStatus>,
    clock: Arc<dyn Clock>,
    cfg: TransportConfig,
}

impl Link {
    fn set_status(&self, status: LinkStatus) {
        let prev = self.status.send_replace(status);
        if prev != status {
            tracing::info!(target: "transport", status = status.label(), "link status");
        }
        for sink in &self.sinks {
            sink.on_status(status);
        }
    }

    fn dispatch(&self, source: &'static str, bytes: &[u8]) {
        match RawEvent::from_slice(bytes) {
            Ok(raw) => {
                let event = raw.into_event(self.clock.now_ms(), self.cfg.fallback_location);
                counter!("transport_messages_total").increment(1);
                for sink in &self.sinks {
                    sink.on_event(&event);
                }
            }
            Err(e) => {
                counter!("transport_malformed_total").increment(1);
                tracing::warn!(
                    target: "transport",
                    source,
                    error = %e,
                    bytes = bytes.len(),
                    "dropping malformed message"
                );
            }
        }
    }
}

enum SessionEnd {
    Dropped,
    Shutdown,
}

/// Resolves once shutdown was requested or the handle was dropped.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

async fn run<S: EventSource>(mut source: S, link: Link, mut shutdown: watch::Receiver<bool>) {
    let mut attempt: u64 = 0;
    loop {
        link.set_status(LinkStatus::Connecting);
        if attempt > 0 {
            counter!("transport_reconnects_total").increment(1);
        }
        attempt += 1;

        match session(&mut source, &link, &mut shutdown).await {
            SessionEnd::Shutdown => break,
            SessionEnd::Dropped => {}
        }

        link.set_status(LinkStatus::Disconnected);
        tokio::select! {
            _ = cancelled(&mut shutdown) => break,
            _ = tokio::time::sleep(link.cfg.reconnect_delay) => {}
        }
    }

    source.close().await;
    tracing::info!(target: "transport", source = source.name(), "subscription closed");
}

async fn session<S: EventSource>(
    source: &mut S,
    link: &Link,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let name = source.name();
    let connected = tokio::select! {
        _ = cancelled(shutdown) => return SessionEnd::Shutdown,
        res = source.connect() => res,
    };
    if let Err(e) = connected {
        tracing::warn!(target: "transport", source = name, error = %e, "subscribe failed");
        return SessionEnd::Dropped;
    }
    link.set_status(LinkStatus::Live);

    loop {
        let msg = tokio::select! {
            _ = cancelled(shutdown) => return SessionEnd::Shutdown,
            msg = source.recv() => msg,
        };
        match msg {
            Ok(Some(bytes)) => link.dispatch(name, &bytes),
            Ok(None) => {
                tracing::info!(target: "transport", source = name, "link closed by peer");
                return SessionEnd::Dropped;
            }
            Err(e) => {
                tracing::warn!(target: "transport", source = name, error = %e, "link lost");
                return SessionEnd::Dropped;
            }
        }
    }
}
