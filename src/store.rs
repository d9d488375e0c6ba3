//! # Event Store
//! In-memory latest slot + bounded, most-recent-first detection history.
//!
//! The store is an explicit object owned by the service and shared by `Arc`;
//! there is no process-global state. Nothing survives a restart.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::error::StoreError;
use crate::event::Event;

/// Maximum number of history entries kept.
pub const H_MAX: usize = 10;

/// Minimum gap (ms) between consecutive history admissions.
pub const COOLDOWN_MS: i64 = 2_000;

/// Capacity and cooldown of a history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    pub history_capacity: usize,
    pub cooldown_ms: i64,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            history_capacity: H_MAX,
            cooldown_ms: COOLDOWN_MS,
        }
    }
}

/// Result of offering an event to a history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Admission {
    Admitted,
    /// Zero detections; quiet frames never enter history.
    Quiet,
    /// Too close to the newest entry.
    CoolingDown { since_last_ms: i64 },
}

/// Bounded history with the cooldown admission rule.
///
/// The rule only looks at the newest entry (`front`), never at the latest
/// observation: `count > 0 && (empty || ts - front.ts > cooldown)`.
#[derive(Debug, Clone)]
pub struct CooldownHistory {
    entries: VecDeque<Event>,
    limits: StoreLimits,
}

impl CooldownHistory {
    pub fn new(limits: StoreLimits) -> Self {
        let cap = limits.history_capacity;
        Self {
            entries: VecDeque::with_capacity(cap.min(1_000)),
            limits,
        }
    }

    /// Decide admission without mutating.
    pub fn evaluate(&self, event: &Event) -> Admission {
        if !event.is_detection() {
            return Admission::Quiet;
        }
        match self.entries.front() {
            None => Admission::Admitted,
            Some(newest) => {
                let gap = event.timestamp.saturating_sub(newest.timestamp);
                if gap > self.limits.cooldown_ms {
                    Admission::Admitted
                } else {
                    Admission::CoolingDown { since_last_ms: gap }
                }
            }
        }
    }

    /// Prepend `event` if the rule allows it, evicting the oldest entries
    /// beyond capacity.
    pub fn admit(&mut self, event: Event) -> Admission {
        let admission = self.evaluate(&event);
        if admission == Admission::Admitted {
            self.entries.push_front(event);
            self.entries.truncate(self.limits.history_capacity);
        }
        admission
    }

    /// Replace the whole history (bootstrap from a snapshot). Entries are taken
    /// as given, most-recent-first, and cut to capacity.
    pub fn replace(&mut self, entries: Vec<Event>) {
        self.entries = entries
            .into_iter()
            .take(self.limits.history_capacity)
            .collect();
    }

    pub fn front(&self) -> Option<&Event> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    pub fn to_vec(&self) -> Vec<Event> {
        self.entries.iter().cloned().collect()
    }
}

/// Immutable read view of the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// `None` until the first ingestion.
    pub latest: Option<Event>,
    pub history: Vec<Event>,
}

#[derive(Debug)]
struct StoreState {
    latest: Option<Event>,
    history: CooldownHistory,
}

impl StoreState {
    fn record_latest(&mut self, event: Event) {
        self.latest = Some(event);
    }
}

/// The single shared mutable resource of the server.
#[derive(Debug)]
pub struct EventStore {
    state: Mutex<StoreState>,
}

impl Default for EventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore {
    pub fn new() -> Self {
        Self::with_limits(StoreLimits::default())
    }

    pub fn with_limits(limits: StoreLimits) -> Self {
        Self {
            state: Mutex::new(StoreState {
                latest: None,
                history: CooldownHistory::new(limits),
            }),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Unconditionally replace the latest slot.
    pub fn record_latest(&self, event: Event) -> Result<(), StoreError> {
        self.lock()?.record_latest(event);
        Ok(())
    }

    /// Offer `event` to the history under the cooldown rule.
    pub fn maybe_admit_to_history(&self, event: Event) -> Result<Admission, StoreError> {
        Ok(self.lock()?.history.admit(event))
    }

    /// Record latest and evaluate history admission as one critical section,
    /// so the cooldown never reads a stale `history[0]`.
    pub fn apply(&self, event: Event) -> Result<Admission, StoreError> {
        let mut state = self.lock()?;
        if event.is_detection() {
            state.record_latest(event.clone());
            Ok(state.history.admit(event))
        } else {
            state.record_latest(event);
            Ok(Admission::Quiet)
        }
    }

    pub fn snapshot(&self) -> Result<Snapshot, StoreError> {
        let state = self.lock()?;
        Ok(Snapshot {
            latest: state.latest.clone(),
            history: state.history.to_vec(),
        })
    }

    pub fn limits(&self) -> Result<StoreLimits, StoreError> {
        Ok(self.lock()?.history.limits())
    }
}
