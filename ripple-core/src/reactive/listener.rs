//! Listener registry and delivery.
//!
//! A listener is a callback registered on a stream or behavior. Listeners are
//! kept in registration order and identified by a [`ListenerId`] that stays
//! valid no matter what else is added or removed.
//!
//! # Delivery
//!
//! [`Dispatcher::dispatch`] hands a value to every listener registered when
//! the delivery starts, in registration order:
//!
//! - Listeners added during a delivery are first called for the next value.
//! - Listeners removed during a delivery are not called again, including for
//!   the value currently being delivered.
//! - Values dispatched while a delivery is already running on the same
//!   dispatcher are queued and delivered after it, in arrival order.
//!
//! No lock is held while a callback runs, so callbacks may freely subscribe,
//! unsubscribe, or push.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use smallvec::SmallVec;

use super::transaction::Transaction;

/// Unique identifier for a registered listener.
///
/// Returned by `subscribe` and accepted by `remove_listener`. IDs increase
/// monotonically, so registration order and ID order agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generate a new unique listener ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered callback.
pub(crate) type Callback<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Ordered set of callbacks.
pub(crate) struct ListenerRegistry<A> {
    entries: IndexMap<ListenerId, Callback<A>>,
}

impl<A> ListenerRegistry<A> {
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    pub fn insert(&mut self, callback: Callback<A>) -> ListenerId {
        let id = ListenerId::new();
        self.entries.insert(id, callback);
        id
    }

    /// Remove a listener. Unknown IDs are ignored.
    pub fn remove(&mut self, id: ListenerId) -> bool {
        // shift_remove keeps the remaining entries in registration order.
        self.entries.shift_remove(&id).is_some()
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy out the current listeners so they can be called without the lock.
    pub fn snapshot(&self) -> SmallVec<[(ListenerId, Callback<A>); 4]> {
        self.entries
            .iter()
            .map(|(id, callback)| (*id, Arc::clone(callback)))
            .collect()
    }
}

impl<A> Default for ListenerRegistry<A> {
    fn default() -> Self {
        Self::new()
    }
}

struct DeliveryQueue<A> {
    delivering: bool,
    pending: VecDeque<A>,
}

/// Resets the queue if a callback panics mid-delivery.
struct DeliveryGuard<'a, A> {
    queue: &'a Mutex<DeliveryQueue<A>>,
}

impl<A> Drop for DeliveryGuard<'_, A> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut queue = self.queue.lock();
            queue.delivering = false;
            queue.pending.clear();
        }
    }
}

/// A listener registry plus the queue that serializes deliveries into it.
pub(crate) struct Dispatcher<A> {
    listeners: Mutex<ListenerRegistry<A>>,
    queue: Mutex<DeliveryQueue<A>>,
}

impl<A> Dispatcher<A> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(ListenerRegistry::new()),
            queue: Mutex::new(DeliveryQueue {
                delivering: false,
                pending: VecDeque::new(),
            }),
        }
    }

    /// Register a callback, returning its ID and the new listener count.
    pub fn add(&self, callback: Callback<A>) -> (ListenerId, usize) {
        let mut listeners = self.listeners.lock();
        let id = listeners.insert(callback);
        (id, listeners.len())
    }

    /// Unregister a callback. Returns the new listener count if it was present.
    pub fn remove(&self, id: ListenerId) -> Option<usize> {
        let mut listeners = self.listeners.lock();
        listeners.remove(id).then(|| listeners.len())
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }

    /// Deliver a value to every listener, or queue it behind the running delivery.
    pub fn dispatch(&self, value: A) {
        {
            let mut queue = self.queue.lock();
            if queue.delivering {
                queue.pending.push_back(value);
                return;
            }
            queue.delivering = true;
        }

        let _tx = Transaction::begin();
        let _guard = DeliveryGuard { queue: &self.queue };

        let mut next = Some(value);
        while let Some(value) = next.take() {
            self.fan_out(&value);

            let mut queue = self.queue.lock();
            match queue.pending.pop_front() {
                Some(value) => next = Some(value),
                None => queue.delivering = false,
            }
        }
    }

    fn fan_out(&self, value: &A) {
        let snapshot = self.listeners.lock().snapshot();
        for (id, callback) in snapshot {
            // A listener removed by an earlier callback in this round is skipped.
            let registered = self.listeners.lock().contains(id);
            if registered {
                callback(value);
            }
        }
    }
}

impl<A> Default for Dispatcher<A> {
    fn default() -> Self {
        Self::new()
    }
}
