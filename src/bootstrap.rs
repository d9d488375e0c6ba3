// src/bootstrap.rs
//! Pre-populate the dashboard history before the first live message.
//!
//! Sources are tried in order (sensor-local server first, networked read
//! endpoint second); the first that answers seeds the coalescer. The live
//! subscription may race ahead of this; re-seeding is harmless.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::coalescer::Coalescer;
use crate::event::{Location, RawEvent};

/// Anything that can return a read-endpoint history.
#[async_trait::async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_history(&self) -> Result<Vec<RawEvent>>;
    fn label(&self) -> &str;
}

/// Accepts both `{latest, history}` and metadata-only `{history}` bodies.
#[derive(Debug, Deserialize)]
struct SnapshotBody {
    #[serde(default)]
    history: Vec<RawEvent>,
}

pub struct HttpSnapshotSource {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpSnapshotSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch_history(&self) -> Result<Vec<RawEvent>> {
        let resp = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("GET {}", self.url))?
            .error_for_status()
            .with_context(|| format!("GET {}", self.url))?;
        let body: SnapshotBody = resp.json().await.context("parse snapshot JSON")?;
        Ok(body.history)
    }

    fn label(&self) -> &str {
        &self.url
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Loaded { source: String, entries: usize },
    /// Every source failed; listeners were told "no data yet".
    Unavailable,
}

pub async fn bootstrap(
    coalescer: &Coalescer,
    sources: &[Box<dyn SnapshotSource>],
    fallback: Location,
) -> BootstrapOutcome {
    for src in sources {
        match src.fetch_history().await {
            Ok(raw) => {
                let now = coalescer.now_ms();
                let entries: Vec<_> = raw
                    .into_iter()
                    .map(|r| r.into_event(now, fallback))
                    .collect();
                let n = entries.len();
                coalescer.seed_history(entries);
                tracing::info!(target: "bootstrap", source = src.label(), entries = n, "history loaded");
                return BootstrapOutcome::Loaded {
                    source: src.label().to_string(),
                    entries: n,
                };
            }
            Err(e) => {
                tracing::warn!(target: "bootstrap", source = src.label(), error = %e, "history source failed");
            }
        }
    }
    tracing::warn!(target: "bootstrap", "no history source reachable; live stream only");
    coalescer.report_no_data();
    BootstrapOutcome::Unavailable
}
