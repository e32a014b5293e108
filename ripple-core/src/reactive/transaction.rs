//! Logical instants
//!
//! A transaction marks one logical instant. Every delivery runs inside a
//! transaction: the outermost `push` opens it, and everything that push
//! causes (derived occurrences, behavior updates, nested pushes) happens at
//! the same instant.
//!
//! # Implementation
//!
//! Each thread keeps a depth counter and the current [`Tick`]. Entering a
//! transaction at depth zero draws a fresh tick from a process-wide counter;
//! nested entries reuse it. Pull-mode behaviors key their cache on the tick,
//! so every observer within an instant samples the same value, and no two
//! instants share a tick even on different threads.
//!
//! # Deferred work
//!
//! Snapshots sample behaviors only after the instant's behavior updates have
//! run. They register that work with [`Transaction::defer`], and the
//! outermost transaction runs it just before it closes, lowest rank first.
//! A node's rank is one more than the highest rank of its upstream nodes, so
//! a snapshot whose behavior depends on another snapshot samples after it.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

type Job = Box<dyn FnOnce()>;

static NEXT_TICK: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static TICK: Cell<u64> = const { Cell::new(0) };
    static SEQ: Cell<u64> = const { Cell::new(0) };
    static DEFERRED: RefCell<BTreeMap<(usize, u64), Job>> = const { RefCell::new(BTreeMap::new()) };
}

/// Identifier of a logical instant. Unique across threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tick(u64);

/// Guard that closes the transaction when dropped.
///
/// Not `Send`: a transaction belongs to the thread that opened it.
pub struct Transaction {
    _thread_bound: PhantomData<*const ()>,
}

impl Transaction {
    /// Enter a transaction, starting a new instant if none is open.
    pub fn begin() -> Self {
        DEPTH.with(|depth| {
            if depth.get() == 0 {
                let tick = NEXT_TICK.fetch_add(1, Ordering::Relaxed);
                TICK.with(|current| current.set(tick));
            }
            depth.set(depth.get() + 1);
        });

        Self {
            _thread_bound: PhantomData,
        }
    }

    /// Run `f` inside a transaction.
    pub fn run<R>(f: impl FnOnce() -> R) -> R {
        let _tx = Self::begin();
        f()
    }

    /// The current instant, if a transaction is open.
    pub fn current() -> Option<Tick> {
        if Self::is_open() {
            Some(Tick(TICK.with(Cell::get)))
        } else {
            None
        }
    }

    /// Check if a transaction is open on this thread.
    pub fn is_open() -> bool {
        DEPTH.with(|depth| depth.get() > 0)
    }

    /// Run `job` at the end of the current instant, after lower ranks.
    ///
    /// Jobs of equal rank run in the order they were deferred. Outside a
    /// transaction the job runs immediately.
    pub(crate) fn defer(rank: usize, job: impl FnOnce() + 'static) {
        if !Self::is_open() {
            job();
            return;
        }
        let seq = SEQ.with(|seq| {
            let next = seq.get();
            seq.set(next + 1);
            next
        });
        DEFERRED.with(|queue| queue.borrow_mut().insert((rank, seq), Box::new(job)));
    }

    fn run_deferred() {
        // Jobs may defer more work; keep going until the queue is dry.
        while let Some(job) = DEFERRED.with(|queue| queue.borrow_mut().pop_first().map(|(_, job)| job)) {
            job();
        }
    }
}

/// Leaves one transaction level, even if a deferred job panics.
struct Exit;

impl Drop for Exit {
    fn drop(&mut self) {
        let remaining = DEPTH.with(|depth| {
            debug_assert!(depth.get() > 0, "transaction depth underflow");
            let remaining = depth.get().saturating_sub(1);
            depth.set(remaining);
            remaining
        });
        if remaining == 0 && std::thread::panicking() {
            DEFERRED.with(|queue| queue.borrow_mut().clear());
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        let _exit = Exit;
        // Deferred jobs still belong to this instant, so they run before the
        // outermost level closes.
        if DEPTH.with(Cell::get) == 1 && !std::thread::panicking() {
            Self::run_deferred();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn no_instant_outside_transaction() {
        assert!(!Transaction::is_open());
        assert!(Transaction::current().is_none());
    }

    #[test]
    fn nested_transactions_share_an_instant() {
        let outer = Transaction::begin();
        let tick = Transaction::current();
        assert!(tick.is_some());

        {
            let _inner = Transaction::begin();
            assert_eq!(Transaction::current(), tick);
        }

        // Closing the inner one leaves the outer open.
        assert_eq!(Transaction::current(), tick);
        drop(outer);
        assert!(Transaction::current().is_none());
    }

    #[test]
    fn sequential_transactions_get_new_instants() {
        let first = Transaction::run(Transaction::current);
        let second = Transaction::run(Transaction::current);

        assert!(first.is_some());
        assert!(second > first);
    }

    #[test]
    fn threads_never_share_a_tick() {
        let spawn = || std::thread::spawn(|| Transaction::run(Transaction::current));
        let a = spawn().join().unwrap();
        let b = spawn().join().unwrap();
        let here = Transaction::run(Transaction::current);

        assert!(a.is_some() && b.is_some());
        assert_ne!(a, b);
        assert_ne!(a, here);
        assert_ne!(b, here);
    }

    #[test]
    fn deferred_jobs_run_at_end_of_instant_by_rank() {
        let log = Rc::new(RefCell::new(Vec::new()));

        Transaction::run(|| {
            let tick = Transaction::current();
            for (rank, tag) in [(2, "c"), (1, "a"), (1, "b")] {
                let log = log.clone();
                Transaction::defer(rank, move || {
                    // Still inside the same instant.
                    assert_eq!(Transaction::current(), tick);
                    log.borrow_mut().push(tag);
                });
            }
            // Nested levels do not flush.
            Transaction::run(|| {});
            assert!(log.borrow().is_empty());
        });

        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
        assert!(!Transaction::is_open());
    }

    #[test]
    fn jobs_deferred_while_flushing_also_run() {
        let log = Rc::new(RefCell::new(Vec::new()));

        Transaction::run(|| {
            let outer_log = log.clone();
            Transaction::defer(0, move || {
                outer_log.borrow_mut().push(1);
                let inner_log = outer_log.clone();
                Transaction::defer(0, move || inner_log.borrow_mut().push(2));
            });
        });

        assert_eq!(*log.borrow(), vec![1, 2]);
    }

    #[test]
    fn defer_outside_transaction_runs_immediately() {
        let ran = Rc::new(Cell::new(false));
        let ran_clone = ran.clone();
        Transaction::defer(0, move || ran_clone.set(true));
        assert!(ran.get());
    }
}
