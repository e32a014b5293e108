//! Sampling a behavior whenever a stream occurs.
//!
//! `snapshot_with(f, b, s)` occurs exactly when `s` occurs, with value
//! `f(b.at(), a)`. While the snapshot is active it keeps the behavior active
//! too, so a `hold` or a producer behind `b` stays up to date.
//!
//! # Sampling order
//!
//! An occurrence of `s` does not sample `b` right away. The sample is
//! deferred to the end of the instant, so every behavior update made in that
//! instant is visible to it, whatever order the listeners were registered
//! in. Snapshots deferred in the same instant sample in rank order: one
//! whose behavior is fed by another snapshot samples after that snapshot
//! has emitted.

use std::sync::Arc;

use parking_lot::Mutex;

use super::behavior::Behavior;
use super::listener::ListenerId;
use super::node::NodeKind;
use super::stream::{Stream, StreamUpstream};
use super::traits::Value;
use super::transaction::Transaction;
use crate::error::Result;
use crate::semantic::SemanticLog;

type SampleFn<A, B, C> = Arc<dyn Fn(&B, &A) -> C + Send + Sync>;

struct SnapshotStream<A: Value, B: Value, C: Value> {
    behavior: Behavior<B>,
    stream: Stream<A>,
    f: SampleFn<A, B, C>,
    listeners: Mutex<Option<(ListenerId, ListenerId)>>,
}

impl<A: Value, B: Value, C: Value> StreamUpstream<C> for SnapshotStream<A, B, C> {
    fn kind(&self) -> NodeKind {
        NodeKind::Snapshot
    }

    fn rank(&self) -> usize {
        self.behavior.rank().max(self.stream.rank()) + 1
    }

    fn attach(&self, target: &Stream<C>) -> Result<()> {
        // Only keeps the behavior active; values are sampled on demand.
        let behavior_id = self.behavior.subscribe(|_| {})?;

        let behavior = self.behavior.clone();
        let f = Arc::clone(&self.f);
        let forward = target.clone();
        let rank = target.rank();
        let stream_id = match self.stream.subscribe(move |a: &A| {
            let (behavior, f, forward, a) = (behavior.clone(), Arc::clone(&f), forward.clone(), a.clone());
            Transaction::defer(rank, move || forward.emit(f(&behavior.at(), &a)));
        }) {
            Ok(id) => id,
            Err(err) => {
                self.behavior.remove_listener(behavior_id);
                return Err(err);
            }
        };

        *self.listeners.lock() = Some((behavior_id, stream_id));
        Ok(())
    }

    fn detach(&self) {
        let ids = self.listeners.lock().take();
        if let Some((behavior_id, stream_id)) = ids {
            self.stream.remove_listener(stream_id);
            self.behavior.remove_listener(behavior_id);
        }
    }

    fn semantic(&self) -> Result<SemanticLog<C>> {
        let log = self.stream.semantic()?;
        let behavior = self.behavior.semantic()?;
        Ok(log.map_timed(|a, t| (self.f)(&behavior(t), a)))
    }
}

/// A stream that occurs whenever `stream` does, carrying `f(b, a)` where `b`
/// is the behavior's value at that moment and `a` the stream's value.
pub fn snapshot_with<A, B, C, F>(f: F, behavior: &Behavior<B>, stream: &Stream<A>) -> Stream<C>
where
    A: Value,
    B: Value,
    C: Value,
    F: Fn(&B, &A) -> C + Send + Sync + 'static,
{
    Stream::derived(SnapshotStream {
        behavior: behavior.clone(),
        stream: stream.clone(),
        f: Arc::new(f),
        listeners: Mutex::new(None),
    })
}

/// A stream carrying the behavior's value whenever `stream` occurs.
pub fn snapshot<A, B>(behavior: &Behavior<B>, stream: &Stream<A>) -> Stream<B>
where
    A: Value,
    B: Value,
{
    snapshot_with(|b: &B, _: &A| b.clone(), behavior, stream)
}
