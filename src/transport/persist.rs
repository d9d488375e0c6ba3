// src/transport/persist.rs
use reqwest::Client;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::EventSink;
use crate::event::Event;
use crate::store::{Admission, CooldownHistory, StoreLimits};

/// What the forwarder sends upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistPolicy {
    /// Send metadata only (no image) to bound network cost.
    pub strip_payload: bool,
    /// Skip quiet frames entirely.
    pub detections_only: bool,
    /// Forward a detection only when it passes the history cooldown, so a
    /// burst costs one POST per cooldown window.
    pub admitted_only: bool,
}

impl Default for PersistPolicy {
    fn default() -> Self {
        Self {
            strip_payload: true,
            detections_only: true,
            admitted_only: true,
        }
    }
}

/// Fire-and-forget write-through to the ingestion endpoint.
///
/// Every POST runs on a detached task; failures are logged at debug and
/// dropped, never retried or queued, and never reach the live view.
/// Clones share one cooldown gate.
#[derive(Clone)]
pub struct Persister {
    client: Client,
    url: String,
    policy: PersistPolicy,
    timeout: Duration,
    gate: Arc<Mutex<CooldownHistory>>,
}

impl Persister {
    pub fn new(url: impl Into<String>, policy: PersistPolicy) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            policy,
            timeout: Duration::from_secs(5),
            gate: Arc::new(Mutex::new(CooldownHistory::new(StoreLimits::default()))),
        }
    }

    /// Cooldown applied by `admitted_only`.
    pub fn with_limits(mut self, limits: StoreLimits) -> Self {
        self.gate = Arc::new(Mutex::new(CooldownHistory::new(limits)));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Body to forward for `event`, or `None` when the policy skips it.
    /// Detections offered here count against the cooldown gate.
    pub fn outbound(&self, event: &Event) -> Option<Event> {
        if self.policy.detections_only && !event.is_detection() {
            return None;
        }
        if self.policy.admitted_only && event.is_detection() {
            let mut gate = self
                .gate
                .lock()
                .unwrap_or_else(|poison| poison.into_inner());
            if gate.admit(event.without_payload()) != Admission::Admitted {
                return None;
            }
        }
        Some(if self.policy.strip_payload {
            event.without_payload()
        } else {
            event.clone()
        })
    }
}

impl EventSink for Persister {
    fn on_event(&self, event: &Event) {
        let Some(body) = self.outbound(event) else {
            return;
        };
        let client = self.client.clone();
        let url = self.url.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            match client.post(&url).timeout(timeout).json(&body).send().await {
                Ok(rsp) if !rsp.status().is_success() => {
                    tracing::debug!(target: "transport", status = %rsp.status(), "persist rejected");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(target: "transport", error = %e, "persist failed");
                }
            }
        });
    }
}
