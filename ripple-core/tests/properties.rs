//! Property-based tests for delivery order and semantic agreement.
//!
//! 1. Every listener receives every pushed value, in push order.
//! 2. Within one occurrence listeners run in subscription order.
//! 3. A removed listener gets no further calls; the others are unaffected.
//! 4. `map` delivered through the engine matches its semantic log.
//! 5. `combine` delivered through the engine matches its semantic log,
//!    including occurrences at equal times.
//! 6. Snapshots of a `hold` match their semantic log, in either scheduling
//!    order and even when the trigger was active before the snapshot.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use proptest::prelude::*;

use ripple_core::reactive::{sink_stream, snapshot_with, Value};
use ripple_core::semantic::Time;
use ripple_core::{test_stream_from_array, test_stream_from_object, Replay, Stream};

// ── Helpers ─────────────────────────────────────────────────────────────

/// Strictly increasing times on a half-unit grid, so ties across logs are common.
fn times_strategy(max_len: usize) -> impl Strategy<Value = Vec<Time>> {
    prop::collection::btree_set(0u16..40, 0..max_len)
        .prop_map(|set: BTreeSet<u16>| set.into_iter().map(|t| f64::from(t) / 2.0).collect())
}

fn tagged(times: &[Time], tag: char) -> Vec<(Time, (char, usize))> {
    times
        .iter()
        .enumerate()
        .map(|(i, t)| (*t, (tag, i)))
        .collect()
}

fn collect<A: Value>(stream: &Stream<A>) -> Arc<Mutex<Vec<A>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    stream
        .subscribe(move |v: &A| seen_clone.lock().push(v.clone()))
        .unwrap();
    seen
}

// ═════════════════════════════════════════════════════════════════════════
// 1-2. Fan-out
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn every_listener_sees_every_value(
        values in prop::collection::vec(any::<i32>(), 0..20),
        listeners in 1usize..6,
    ) {
        let s = sink_stream::<i32>();
        let log = Arc::new(Mutex::new(Vec::new()));
        for listener in 0..listeners {
            let log = log.clone();
            s.subscribe(move |v: &i32| log.lock().push((listener, *v))).unwrap();
        }

        for v in &values {
            s.push(*v).unwrap();
        }

        let expected: Vec<(usize, i32)> = values
            .iter()
            .flat_map(|v| (0..listeners).map(move |l| (l, *v)))
            .collect();
        prop_assert_eq!(&*log.lock(), &expected);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. Removal
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn removal_freezes_only_the_removed_count(
        listeners in 1usize..6,
        victim_seed in any::<usize>(),
        before in 0usize..5,
        after in 0usize..5,
    ) {
        let victim = victim_seed % listeners;
        let s = sink_stream::<()>();
        let counts: Vec<Arc<AtomicUsize>> =
            (0..listeners).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let ids: Vec<_> = counts
            .iter()
            .map(|count| {
                let count = count.clone();
                s.subscribe(move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap()
            })
            .collect();

        for _ in 0..before {
            s.push(()).unwrap();
        }
        s.remove_listener(ids[victim]);
        s.remove_listener(ids[victim]);
        for _ in 0..after {
            s.push(()).unwrap();
        }

        for (i, count) in counts.iter().enumerate() {
            let expected = if i == victim { before } else { before + after };
            prop_assert_eq!(count.load(Ordering::SeqCst), expected);
        }
        prop_assert_eq!(s.listener_count(), listeners - 1);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Map agreement
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn map_delivery_matches_semantics(times in times_strategy(12), offset in -100i64..100) {
        let entries: Vec<(Time, i64)> = times.iter().enumerate().map(|(i, t)| (*t, i as i64)).collect();
        let s = test_stream_from_object(entries).unwrap();
        let shifted = s.map(move |n| n + offset);
        let seen = collect(&shifted);

        Replay::new().schedule(&s).unwrap().run();

        let meaning = shifted.semantic().unwrap();
        prop_assert_eq!(meaning.times(), times);
        prop_assert_eq!(&*seen.lock(), &meaning.values());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Combine agreement
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn combine_delivery_matches_semantics(
        left_times in times_strategy(10),
        right_times in times_strategy(10),
    ) {
        let left = test_stream_from_object(tagged(&left_times, 'l')).unwrap();
        let right = test_stream_from_object(tagged(&right_times, 'r')).unwrap();
        let merged = left.combine(&right);
        let seen = collect(&merged);

        let delivered = Replay::new()
            .schedule(&left)
            .unwrap()
            .schedule(&right)
            .unwrap()
            .run();

        let meaning = merged.semantic().unwrap();
        prop_assert_eq!(delivered, left_times.len() + right_times.len());
        prop_assert_eq!(&*seen.lock(), &meaning.values());

        // Times never decrease in the merged log.
        let times = meaning.times();
        prop_assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 6. Snapshot agreement
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn snapshot_of_hold_matches_semantics(
        step_times in times_strategy(8),
        tick_times in times_strategy(8),
        steps_first in any::<bool>(),
    ) {
        let steps = test_stream_from_object(tagged(&step_times, 's')).unwrap();
        let ticks = test_stream_from_object(tagged(&tick_times, 't')).unwrap();
        let held = steps.hold(('-', 0));
        let shot = snapshot_with(|level: &(char, usize), tick: &(char, usize)| (*level, *tick), &held, &ticks);
        let seen = collect(&shot);

        let mut replay = Replay::new();
        if steps_first {
            replay.schedule(&steps).unwrap().schedule(&ticks).unwrap();
        } else {
            replay.schedule(&ticks).unwrap().schedule(&steps).unwrap();
        }
        replay.run();

        let meaning = shot.semantic().unwrap();
        prop_assert_eq!(meaning.times(), tick_times);
        prop_assert_eq!(&*seen.lock(), &meaning.values());
    }
}

proptest! {
    #[test]
    fn snapshot_with_already_active_trigger_matches_semantics(
        values in prop::collection::vec(any::<i16>(), 0..12),
    ) {
        let s = test_stream_from_array(values.clone());
        // Registered on `s` ahead of the hold the snapshot activates later.
        let trigger = s.map(|v| *v);
        trigger.subscribe(|_| {}).unwrap();

        let shot = snapshot_with(|held: &i16, _: &i16| *held, &s.hold(0), &trigger);
        let seen = collect(&shot);

        Replay::new().schedule(&s).unwrap().run();

        let meaning = shot.semantic().unwrap();
        prop_assert_eq!(&meaning.values(), &values);
        prop_assert_eq!(&*seen.lock(), &meaning.values());
    }
}
