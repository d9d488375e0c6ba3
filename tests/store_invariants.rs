//! Randomized write sequences against the store invariants.
//! Seeded for determinism.

use rand::{rngs::StdRng, Rng, SeedableRng};

use uplink_monitor::event::{Location, RawEvent};
use uplink_monitor::store::{Admission, EventStore, StoreLimits, COOLDOWN_MS, H_MAX};

fn raw(ts: i64, detections: i64) -> RawEvent {
    RawEvent {
        frame_data: Some(format!("frame-{ts}")),
        timestamp: Some(ts),
        detections: Some(detections),
        ..Default::default()
    }
}

fn check_history(store: &EventStore, limits: StoreLimits) {
    let snap = store.snapshot().expect("snapshot");
    assert!(snap.history.len() <= limits.history_capacity);
    for e in &snap.history {
        assert!(e.detection_count > 0, "quiet frame leaked into history");
    }
    for pair in snap.history.windows(2) {
        assert!(
            pair[0].timestamp - pair[1].timestamp > limits.cooldown_ms,
            "entries {} and {} are within the cooldown",
            pair[0].timestamp,
            pair[1].timestamp
        );
    }
}

#[test]
fn random_sequences_keep_history_bounded_and_spaced() {
    let mut rng = StdRng::seed_from_u64(42);
    let limits = StoreLimits::default();

    for _round in 0..20 {
        let store = EventStore::with_limits(limits);
        let mut ts: i64 = 1_000;
        for _ in 0..300 {
            // Mostly forward, sometimes replayed or out of order.
            ts += if rng.random_bool(0.9) {
                rng.random_range(0..3_500)
            } else {
                -rng.random_range(0..5_000)
            };
            let detections = if rng.random_bool(0.6) {
                rng.random_range(1..6)
            } else {
                0
            };
            let ev = raw(ts, detections).into_event(ts.max(1), Location::SENTINEL);
            let expected_latest = ev.clone();
            store.apply(ev).expect("apply");

            assert_eq!(store.snapshot().unwrap().latest, Some(expected_latest));
            check_history(&store, limits);
        }
    }
}

#[test]
fn steady_detections_fill_to_capacity_then_evict_oldest() {
    let store = EventStore::new();
    for i in 0..(H_MAX as i64 + 5) {
        let ts = 10_000 + i * (COOLDOWN_MS + 1);
        let adm = store
            .apply(raw(ts, 1).into_event(ts, Location::SENTINEL))
            .unwrap();
        assert_eq!(adm, Admission::Admitted);
    }
    let history = store.snapshot().unwrap().history;
    assert_eq!(history.len(), H_MAX);
    let newest = 10_000 + (H_MAX as i64 + 4) * (COOLDOWN_MS + 1);
    assert_eq!(history[0].timestamp, newest);
    assert_eq!(
        history[H_MAX - 1].timestamp,
        newest - (H_MAX as i64 - 1) * (COOLDOWN_MS + 1)
    );
}

#[test]
fn cooldown_is_measured_against_newest_entry_not_latest() {
    // on (admitted), off, on again 1s later: the quiet frame in between does
    // not reset the cooldown.
    let store = EventStore::new();
    let on = |ts| raw(ts, 2).into_event(ts, Location::SENTINEL);
    let off = |ts| raw(ts, 0).into_event(ts, Location::SENTINEL);

    assert_eq!(store.apply(on(1_000)).unwrap(), Admission::Admitted);
    assert_eq!(store.apply(off(1_500)).unwrap(), Admission::Quiet);
    assert_eq!(
        store.apply(on(2_000)).unwrap(),
        Admission::CoolingDown {
            since_last_ms: 1_000
        }
    );
    assert_eq!(store.apply(on(3_001)).unwrap(), Admission::Admitted);
    assert_eq!(store.snapshot().unwrap().history.len(), 2);
}

#[test]
fn custom_limits_are_honoured() {
    let limits = StoreLimits {
        history_capacity: 3,
        cooldown_ms: 0,
    };
    let store = EventStore::with_limits(limits);
    for ts in 1..=5 {
        store
            .apply(raw(ts, 1).into_event(ts, Location::SENTINEL))
            .unwrap();
    }
    let ts: Vec<i64> = store
        .snapshot()
        .unwrap()
        .history
        .iter()
        .map(|e| e.timestamp)
        .collect();
    assert_eq!(ts, vec![5, 4, 3]);
    check_history(&store, limits);
}
