//! Presentation pacing: frame coalescing, position rate limit, throughput
//! windows and the spawned drain loop.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use uplink_monitor::clock::ManualClock;
use uplink_monitor::coalescer::{Coalescer, CoalescerConfig, DisplayListener};
use uplink_monitor::event::{Event, Location, RawEvent};
use uplink_monitor::store::StoreLimits;
use uplink_monitor::transport::{EventSink, LinkStatus};

#[derive(Default)]
struct Screen {
    frames: Mutex<Vec<String>>,
    positions: Mutex<Vec<Location>>,
    history: Mutex<Vec<Vec<i64>>>,
    throughput: Mutex<Vec<f64>>,
    status: Mutex<Vec<LinkStatus>>,
}

impl DisplayListener for Screen {
    fn on_frame(&self, frame: &str) {
        self.frames.lock().unwrap().push(frame.to_string());
    }
    fn on_position(&self, location: Location) {
        self.positions.lock().unwrap().push(location);
    }
    fn on_history(&self, history: &[Event]) {
        self.history
            .lock()
            .unwrap()
            .push(history.iter().map(|e| e.timestamp).collect());
    }
    fn on_throughput(&self, per_sec: f64) {
        self.throughput.lock().unwrap().push(per_sec);
    }
    fn on_status(&self, status: LinkStatus) {
        self.status.lock().unwrap().push(status);
    }
}

fn event(frame: &str, ts: i64, detections: i64, lat: f64) -> Event {
    RawEvent {
        frame_data: Some(frame.to_string()),
        timestamp: Some(ts),
        detections: Some(detections),
        location: Some(Location::new(lat, -lat)),
        ..Default::default()
    }
    .into_event(ts, Location::SENTINEL)
}

fn setup() -> (Coalescer, Arc<ManualClock>, Arc<Screen>) {
    let clock = Arc::new(ManualClock::new(0));
    let c = Coalescer::new(CoalescerConfig::default(), clock.clone());
    let screen = Arc::new(Screen::default());
    c.subscribe(screen.clone());
    (c, clock, screen)
}

#[test]
fn burst_between_ticks_paints_only_the_newest_frame() {
    let (c, _clock, screen) = setup();
    for i in 0..3 {
        c.push_event(&event(&format!("A{i}"), 1, 0, 0.0));
    }
    assert!(c.tick());
    c.push_event(&event("B", 2, 0, 0.0));
    c.push_event(&event("C", 3, 0, 0.0));
    assert!(c.tick());
    assert!(!c.tick(), "nothing new to paint");

    assert_eq!(*screen.frames.lock().unwrap(), vec!["A2", "C"]);
    assert_eq!(c.frames_painted(), 2);
}

#[test]
fn positions_are_rate_limited_and_the_last_one_wins() {
    let (c, clock, screen) = setup();
    // 20 events over ~950ms, one every 50ms.
    for i in 0..20 {
        clock.set(i * 50);
        c.push_event(&event("f", i * 50, 0, i as f64));
        c.tick();
    }
    let applied = screen.positions.lock().unwrap().len();
    assert!(applied <= 2, "applied {applied} positions inside ~1s");

    // After the window the trailing position is applied.
    clock.set(2_000);
    c.tick();
    assert_eq!(c.applied_position(), Some(Location::new(19.0, -19.0)));
    assert_eq!(
        screen.positions.lock().unwrap().last().copied(),
        Some(Location::new(19.0, -19.0))
    );
}

#[test]
fn throughput_reports_painted_frames_per_second() {
    let (c, clock, screen) = setup();
    for i in 0..10 {
        c.push_event(&event("f", i, 0, 0.0));
        c.tick();
        clock.advance(100);
    }
    assert!(screen.throughput.lock().unwrap().is_empty());

    c.tick();
    assert_eq!(*screen.throughput.lock().unwrap(), vec![10.0]);
    assert_eq!(c.throughput(), 10.0);

    // A silent window reports zero.
    clock.advance(1_000);
    c.tick();
    assert_eq!(c.throughput(), 0.0);
}

#[test]
fn local_history_follows_the_cooldown_rule() {
    let (c, _clock, screen) = setup();
    c.push_event(&event("a", 1_000, 1, 0.0));
    c.push_event(&event("b", 1_500, 1, 0.0));
    c.push_event(&event("c", 2_000, 0, 0.0));
    c.push_event(&event("d", 3_500, 2, 0.0));

    let ts: Vec<i64> = c.history().iter().map(|e| e.timestamp).collect();
    assert_eq!(ts, vec![3_500, 1_000]);
    assert_eq!(
        *screen.history.lock().unwrap(),
        vec![vec![1_000], vec![3_500, 1_000]]
    );
}

#[test]
fn seeded_history_is_cut_to_capacity() {
    let clock = Arc::new(ManualClock::new(0));
    let cfg = CoalescerConfig {
        history: StoreLimits {
            history_capacity: 2,
            cooldown_ms: 2_000,
        },
        ..Default::default()
    };
    let c = Coalescer::new(cfg, clock);
    c.seed_history(vec![
        event("x", 9_000, 1, 0.0),
        event("y", 6_000, 1, 0.0),
        event("z", 3_000, 1, 0.0),
    ]);
    let ts: Vec<i64> = c.history().iter().map(|e| e.timestamp).collect();
    assert_eq!(ts, vec![9_000, 6_000]);

    // The cooldown continues from the seeded newest entry.
    c.push_event(&event("w", 10_000, 1, 0.0));
    assert_eq!(c.history()[0].timestamp, 9_000);
}

#[test]
fn status_changes_are_published_once() {
    let (c, _clock, screen) = setup();
    let sink: &dyn EventSink = &c;
    sink.on_status(LinkStatus::Connecting);
    sink.on_status(LinkStatus::Live);
    sink.on_status(LinkStatus::Live);
    sink.on_status(LinkStatus::Disconnected);
    assert_eq!(
        *screen.status.lock().unwrap(),
        vec![LinkStatus::Live, LinkStatus::Disconnected]
    );
    assert_eq!(c.status(), LinkStatus::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn spawned_drain_loop_paints_and_stops() {
    let (c, _clock, screen) = setup();
    let drain = c.spawn(Duration::from_millis(16));

    c.push_event(&event("one", 1, 0, 0.0));
    tokio::time::sleep(Duration::from_millis(40)).await;
    c.push_event(&event("two", 2, 0, 0.0));
    c.push_event(&event("three", 3, 0, 0.0));
    tokio::time::sleep(Duration::from_millis(40)).await;

    drain.stop().await;
    assert_eq!(*screen.frames.lock().unwrap(), vec!["one", "three"]);

    // Stopped: nothing else gets painted.
    c.push_event(&event("four", 4, 0, 0.0));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(screen.frames.lock().unwrap().len(), 2);
}
