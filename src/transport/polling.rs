// src/transport/polling.rs
use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::EventSource;

/// Polls the HTTP read endpoint and yields `latest` whenever it changes.
///
/// Interchangeable with the push subscriber for deployments without a broker.
pub struct PollingSource {
    client: Client,
    url: String,
    interval: Duration,
    last_ts: Option<i64>,
    /// `latest` read during `connect`, emitted by the next `recv`.
    pending: Option<Value>,
}

impl PollingSource {
    pub fn new(url: impl Into<String>, interval: Duration) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            interval,
            last_ts: None,
            pending: None,
        }
    }

    async fn fetch_latest(&self) -> Result<Option<Value>> {
        let resp = self
            .client
            .get(&self.url)
            .timeout(self.interval.max(Duration::from_secs(5)))
            .send()
            .await
            .with_context(|| format!("GET {}", self.url))?
            .error_for_status()
            .with_context(|| format!("GET {}", self.url))?;
        let body: Value = resp.json().await.context("parse snapshot JSON")?;
        Ok(body.get("latest").filter(|v| !v.is_null()).cloned())
    }
}

#[async_trait::async_trait]
impl EventSource for PollingSource {
    async fn connect(&mut self) -> Result<()> {
        // A successful read is the subscription "ack".
        self.pending = self.fetch_latest().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            let latest = match self.pending.take() {
                Some(v) => v,
                None => {
                    tokio::time::sleep(self.interval).await;
                    match self.fetch_latest().await? {
                        Some(v) => v,
                        None => continue,
                    }
                }
            };
            let ts = latest.get("timestamp").and_then(Value::as_i64);
            if ts.is_some() && ts == self.last_ts {
                continue;
            }
            self.last_ts = ts;
            return Ok(Some(serde_json::to_vec(&latest)?));
        }
    }

    fn name(&self) -> &'static str {
        "polling"
    }
}
