//! # Presentation Coalescer
//! Decouples the rate of inbound frames from the rate the display updates.
//!
//! * frames land in a single overwrite slot; a paced drain loop paints at most
//!   one per tick, so intermediate frames are dropped (last-write-wins);
//! * positions are applied at most once per `position_interval_ms`; positions
//!   inside the window overwrite one pending slot that the drain loop flushes
//!   once the window has passed;
//! * the detection badge and link status are published immediately;
//! * detections are offered to a local bounded history under the same
//!   cooldown rule as the server store.
//!
//! Listeners are notified outside of every lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::event::{Event, Location};
use crate::store::{Admission, CooldownHistory, StoreLimits};
use crate::transport::{EventSink, LinkStatus};

/// Observer for everything the display shows. All callbacks default to no-ops.
pub trait DisplayListener: Send + Sync {
    fn on_frame(&self, _frame: &str) {}
    fn on_position(&self, _location: Location) {}
    /// `Some(n)` shows the badge with `n` detections, `None` hides it.
    fn on_detections(&self, _count: Option<u32>) {}
    fn on_history(&self, _history: &[Event]) {}
    /// Frames painted per wall-clock second.
    fn on_throughput(&self, _per_sec: f64) {}
    fn on_status(&self, _status: LinkStatus) {}
    /// No history could be loaded and nothing has been admitted yet.
    fn on_no_data(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy)]
pub struct CoalescerConfig {
    pub position_interval_ms: i64,
    pub throughput_window_ms: i64,
    pub history: StoreLimits,
}

impl Default for CoalescerConfig {
    fn default() -> Self {
        Self {
            position_interval_ms: 500,
            throughput_window_ms: 1_000,
            history: StoreLimits::default(),
        }
    }
}

struct ViewState {
    last_position_at: Option<i64>,
    applied_position: Option<Location>,
    pending_position: Option<Location>,
    badge: Option<u32>,
    history: CooldownHistory,
    window_started_at: i64,
    painted_in_window: u64,
    painted_total: u64,
    throughput: f64,
    status: LinkStatus,
}

/// Notifications collected under the state lock, delivered after it.
#[derive(Default)]
struct Outbox {
    frame: Option<String>,
    position: Option<Location>,
    detections: Option<Option<u32>>,
    history: Option<Vec<Event>>,
    throughput: Option<f64>,
    status: Option<LinkStatus>,
    no_data: bool,
}

impl Outbox {
    fn deliver(self, listeners: &[Arc<dyn DisplayListener>]) {
        for l in listeners {
            if let Some(status) = self.status {
                l.on_status(status);
            }
            if let Some(frame) = self.frame.as_deref() {
                l.on_frame(frame);
            }
            if let Some(loc) = self.position {
                l.on_position(loc);
            }
            if let Some(count) = self.detections {
                l.on_detections(count);
            }
            if let Some(history) = self.history.as_deref() {
                l.on_history(history);
            }
            if let Some(per_sec) = self.throughput {
                l.on_throughput(per_sec);
            }
            if self.no_data {
                l.on_no_data();
            }
        }
    }
}

struct Inner {
    cfg: CoalescerConfig,
    clock: Arc<dyn Clock>,
    frame_slot: Mutex<Option<String>>,
    state: Mutex<ViewState>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn DisplayListener>)>>,
    next_id: AtomicU64,
}

/// Cheap to clone; all clones share one view.
#[derive(Clone)]
pub struct Coalescer {
    inner: Arc<Inner>,
}

impl Coalescer {
    pub fn new(cfg: CoalescerConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        Self {
            inner: Arc::new(Inner {
                cfg,
                clock,
                frame_slot: Mutex::new(None),
                state: Mutex::new(ViewState {
                    last_position_at: None,
                    applied_position: None,
                    pending_position: None,
                    badge: None,
                    history: CooldownHistory::new(cfg.history),
                    window_started_at: now,
                    painted_in_window: 0,
                    painted_total: 0,
                    throughput: 0.0,
                    status: LinkStatus::Connecting,
                }),
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn DisplayListener>) -> ListenerId {
        let id = ListenerId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        write_lock(&self.inner.listeners).push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = write_lock(&self.inner.listeners);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn now_ms(&self) -> i64 {
        self.inner.clock.now_ms()
    }

    /// Feed one live event.
    pub fn push_event(&self, event: &Event) {
        if let Some(frame) = event.payload.as_deref().filter(|f| !f.is_empty()) {
            *lock(&self.inner.frame_slot) = Some(frame.to_owned());
        }

        let now = self.inner.clock.now_ms();
        let mut out = Outbox::default();
        {
            let mut st = lock(&self.inner.state);

            let due = st
                .last_position_at
                .is_none_or(|t| now - t > self.inner.cfg.position_interval_ms);
            if due {
                st.last_position_at = Some(now);
                st.applied_position = Some(event.location);
                st.pending_position = None;
                out.position = Some(event.location);
            } else {
                st.pending_position = Some(event.location);
            }

            let badge = event.is_detection().then_some(event.detection_count);
            if badge != st.badge {
                st.badge = badge;
                out.detections = Some(badge);
            }

            if event.is_detection() && st.history.admit(event.clone()) == Admission::Admitted {
                out.history = Some(st.history.to_vec());
            }
        }
        out.deliver(&self.listeners());
    }

    /// One drain step: paint the pending frame (if any), refresh throughput
    /// once per window and flush a due pending position. Returns whether a
    /// frame was painted.
    pub fn tick(&self) -> bool {
        let frame = lock(&self.inner.frame_slot).take();
        let now = self.inner.clock.now_ms();
        let painted = frame.is_some();

        let mut out = Outbox {
            frame,
            ..Default::default()
        };
        {
            let mut st = lock(&self.inner.state);
            if painted {
                st.painted_in_window += 1;
                st.painted_total += 1;
            }

            let elapsed = now - st.window_started_at;
            if elapsed >= self.inner.cfg.throughput_window_ms && elapsed > 0 {
                let per_sec = st.painted_in_window as f64 * 1_000.0 / elapsed as f64;
                st.throughput = per_sec;
                st.painted_in_window = 0;
                st.window_started_at = now;
                out.throughput = Some(per_sec);
            }

            if let Some(loc) = st.pending_position {
                let due = st
                    .last_position_at
                    .is_none_or(|t| now - t > self.inner.cfg.position_interval_ms);
                if due {
                    st.last_position_at = Some(now);
                    st.applied_position = Some(loc);
                    st.pending_position = None;
                    out.position = Some(loc);
                }
            }
        }
        out.deliver(&self.listeners());
        painted
    }

    pub fn set_status(&self, status: LinkStatus) {
        let changed = {
            let mut st = lock(&self.inner.state);
            let changed = st.status != status;
            st.status = status;
            changed
        };
        if changed {
            Outbox {
                status: Some(status),
                ..Default::default()
            }
            .deliver(&self.listeners());
        }
    }

    /// Replace the local history with bootstrap entries (most-recent-first).
    pub fn seed_history(&self, entries: Vec<Event>) {
        let history = {
            let mut st = lock(&self.inner.state);
            st.history.replace(entries);
            st.history.to_vec()
        };
        Outbox {
            history: Some(history),
            ..Default::default()
        }
        .deliver(&self.listeners());
    }

    /// Publish the "no data yet" state, unless live detections already
    /// populated the history. Returns whether it was published.
    pub fn report_no_data(&self) -> bool {
        let empty = lock(&self.inner.state).history.is_empty();
        if empty {
            Outbox {
                no_data: true,
                ..Default::default()
            }
            .deliver(&self.listeners());
        }
        empty
    }

    pub fn history(&self) -> Vec<Event> {
        lock(&self.inner.state).history.to_vec()
    }

    pub fn applied_position(&self) -> Option<Location> {
        lock(&self.inner.state).applied_position
    }

    pub fn badge(&self) -> Option<u32> {
        lock(&self.inner.state).badge
    }

    pub fn throughput(&self) -> f64 {
        lock(&self.inner.state).throughput
    }

    pub fn frames_painted(&self) -> u64 {
        lock(&self.inner.state).painted_total
    }

    pub fn status(&self) -> LinkStatus {
        lock(&self.inner.state).status
    }

    /// Start the paced drain loop.
    pub fn spawn(&self, interval: Duration) -> DrainHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let this = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    res = stop_rx.changed() => {
                        if res.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        this.tick();
                    }
                }
            }
            tracing::debug!(target: "coalescer", "drain loop stopped");
        });
        DrainHandle {
            stop: stop_tx,
            task,
        }
    }

    fn listeners(&self) -> Vec<Arc<dyn DisplayListener>> {
        read_lock(&self.inner.listeners)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect()
    }
}

impl EventSink for Coalescer {
    fn on_event(&self, event: &Event) {
        self.push_event(event);
    }

    fn on_status(&self, status: LinkStatus) {
        self.set_status(status);
    }
}

/// Handle to the drain loop. Dropping it also stops the loop.
pub struct DrainHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DrainHandle {
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(target: "coalescer", error = %e, "drain loop ended abnormally");
        }
    }
}

// A listener panicking mid-callback must not wedge the display, so poisoned
// locks are recovered rather than propagated.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poison| poison.into_inner())
}

fn read_lock<T>(l: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(|poison| poison.into_inner())
}

fn write_lock<T>(l: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(|poison| poison.into_inner())
}
