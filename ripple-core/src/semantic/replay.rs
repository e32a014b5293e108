//! Driving the push engine from occurrence logs.
//!
//! A [`Replay`] collects the occurrences of one or more test streams and
//! pushes them in global time order. Occurrences that share a time form one
//! logical instant and are delivered in the order their streams were
//! scheduled, matching the left-first tie rule of `combine`.

use std::fmt;

use tracing::{debug, trace};

use super::Time;
use crate::error::{FrpError, Result};
use crate::reactive::{Stream, Transaction, Value};

struct Scheduled {
    time: Time,
    deliver: Box<dyn FnOnce()>,
}

/// Plays test stream logs through the push engine.
///
/// # Example
///
/// ```rust,ignore
/// let left = test_stream_from_array([1, 2]);
/// let right = test_stream_from_object([(0.5, 10)])?;
/// let merged = left.combine(&right);
/// merged.subscribe(|n| println!("{n}"))?;
///
/// Replay::new().schedule(&left)?.schedule(&right)?.run(); // 1, 10, 2
/// ```
#[derive(Default)]
pub struct Replay {
    pending: Vec<Scheduled>,
}

impl Replay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue every occurrence of `stream`'s log.
    ///
    /// Occurrences at equal times are delivered in scheduling order. A
    /// `left.combine(&right)` therefore matches its semantic log only when
    /// `left`'s source is scheduled before `right`'s. Observing both
    /// `a.combine(&b)` and `b.combine(&a)` in one replay cannot match both
    /// logs when `a` and `b` share a time; replay them separately.
    ///
    /// Fails with [`FrpError::NoSemantics`] unless `stream` was built by a
    /// test constructor.
    pub fn schedule<A: Value>(&mut self, stream: &Stream<A>) -> Result<&mut Self> {
        let log = stream.test_log().ok_or(FrpError::NoSemantics {
            node: stream.id(),
            kind: stream.kind(),
        })?;

        for occurrence in log {
            let target = stream.clone();
            let value = occurrence.value.clone();
            self.pending.push(Scheduled {
                time: occurrence.time,
                deliver: Box::new(move || target.emit(value)),
            });
        }
        trace!(node = %stream.id(), occurrences = log.len(), "scheduled");
        Ok(self)
    }

    /// Number of occurrences waiting to be delivered.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Deliver everything scheduled and return how many occurrences were pushed.
    pub fn run(&mut self) -> usize {
        let mut pending = std::mem::take(&mut self.pending);
        // Stable, so equal times keep scheduling order.
        pending.sort_by(|a, b| a.time.total_cmp(&b.time));

        let mut delivered = 0;
        let mut instants = 0;
        let mut queue = pending.into_iter().peekable();
        while let Some(first) = queue.next() {
            let time = first.time;
            let _instant = Transaction::begin();
            trace!(time, "instant");

            (first.deliver)();
            delivered += 1;
            while let Some(next) = queue.next_if(|s| s.time == time) {
                (next.deliver)();
                delivered += 1;
            }
            instants += 1;
        }

        debug!(delivered, instants, "replay finished");
        delivered
    }
}

impl fmt::Debug for Replay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replay")
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{from_function, sink_stream, snapshot};
    use crate::semantic::{test_stream_from_array, test_stream_from_object};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn plays_a_single_log_in_order() {
        let s = test_stream_from_array(["a", "b", "c"]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        s.subscribe(move |v: &&str| seen_clone.lock().push(*v)).unwrap();

        let delivered = Replay::new().schedule(&s).unwrap().run();
        assert_eq!(delivered, 3);
        assert_eq!(*seen.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn interleaves_logs_by_time() {
        let left = test_stream_from_array([0, 2, 4]);
        let right = test_stream_from_object([(0.5, 1), (1.5, 3)]).unwrap();
        let merged = left.combine(&right);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        merged.subscribe(move |v: &i32| seen_clone.lock().push(*v)).unwrap();

        let mut replay = Replay::new();
        replay.schedule(&left).unwrap().schedule(&right).unwrap();
        assert_eq!(replay.len(), 5);
        replay.run();

        assert!(replay.is_empty());
        assert_eq!(*seen.lock(), merged.semantic().unwrap().values());
    }

    #[test]
    fn ties_follow_scheduling_order() {
        let left = test_stream_from_array(['l', 'm']);
        let right = test_stream_from_array(['r', 's']);
        let merged = left.combine(&right);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        merged.subscribe(move |v: &char| seen_clone.lock().push(*v)).unwrap();

        Replay::new()
            .schedule(&left)
            .unwrap()
            .schedule(&right)
            .unwrap()
            .run();
        assert_eq!(*seen.lock(), vec!['l', 'r', 'm', 's']);
        assert_eq!(merged.semantic().unwrap().values(), vec!['l', 'r', 'm', 's']);
    }

    #[test]
    fn reversed_combine_needs_reversed_scheduling() {
        let a = test_stream_from_array(['a', 'b']);
        let b = test_stream_from_array(['x', 'y']);
        let merged = b.combine(&a);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        merged.subscribe(move |v: &char| seen_clone.lock().push(*v)).unwrap();

        // Left operand first, as the semantic log orders ties.
        Replay::new().schedule(&b).unwrap().schedule(&a).unwrap().run();
        assert_eq!(*seen.lock(), merged.semantic().unwrap().values());
        assert_eq!(*seen.lock(), vec!['x', 'a', 'y', 'b']);
    }

    #[test]
    fn equal_times_share_an_instant() {
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        let b = from_function(move || calls_clone.fetch_add(1, Ordering::SeqCst));

        let left = test_stream_from_array([(), ()]);
        let right = test_stream_from_array([(), ()]);
        let shot = snapshot(&b, &left.combine(&right));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        shot.subscribe(move |v: &i32| seen_clone.lock().push(*v)).unwrap();

        Replay::new()
            .schedule(&left)
            .unwrap()
            .schedule(&right)
            .unwrap()
            .run();

        // One pull per instant, shared by both occurrences at that time.
        assert_eq!(*seen.lock(), vec![0, 0, 1, 1]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn rejects_streams_without_a_log() {
        let s = sink_stream::<i32>();
        let err = Replay::new().schedule(&s).unwrap_err();
        assert!(matches!(err, FrpError::NoSemantics { .. }));
    }
}
