//! Behavior Implementation
//!
//! A Behavior is a value that exists at every instant. It is evaluated in
//! one of two modes, fixed when the behavior is built:
//!
//! - **Push**: the value arrives by delivery (a sink, a producer, a stream
//!   held with `hold`) and is cached in `last`. Listeners are told about
//!   every update.
//! - **Pull**: the value is computed on demand by a function. Nothing drives
//!   it, so listeners are never called; queries always re-run the function,
//!   except that within one logical instant the result is reused.
//!
//! `map` keeps the parent's mode: over a pull behavior it composes
//! functions, over a push behavior it maps each pushed value.
//!
//! # Activation
//!
//! Like streams, behaviors attach to their upstream only while demanded:
//! subscribed directly, sampled by an active snapshot, or read through an
//! active map chain. An inactive push-mode map computes its value from its
//! parent when queried, so it is never stale. A `hold` only follows its
//! stream while active.

use std::fmt::{self, Debug};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{trace, warn};

use super::lifecycle::{Activation, Emitter, Lifecycle, Phase, Producer, PushTarget};
use super::listener::{Dispatcher, ListenerId};
use super::node::{NodeId, NodeKind};
use super::stream::Stream;
use super::traits::{Reactive, Value};
use super::transaction::{Tick, Transaction};
use crate::error::{FrpError, Result};
use crate::semantic::TimeFn;

/// How a behavior's value is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Updated by delivery; queries return the cached value.
    Push,

    /// Computed on demand by a function.
    Pull,
}

type PullFn<A> = Arc<dyn Fn() -> A + Send + Sync>;

enum Evaluation<A> {
    Push {
        last: RwLock<A>,
    },
    Pull {
        pull: PullFn<A>,
        /// Value pulled during the current instant, if any.
        cache: Mutex<Option<(Tick, A)>>,
    },
}

/// Upstream wiring of a derived behavior.
pub(crate) trait BehaviorUpstream<A: Value>: Send + Sync {
    fn kind(&self) -> NodeKind;

    fn rank(&self) -> usize;

    fn attach(&self, target: &Behavior<A>) -> Result<()>;

    fn detach(&self);

    /// A fresh value for an inactive push-mode node, if one can be computed.
    fn pull(&self) -> Option<A>;

    fn semantic(&self) -> Result<TimeFn<A>>;
}

enum BehaviorSource<A: Value> {
    Constant,
    Sink,
    Function,
    Producer(Arc<dyn Producer<A>>),
    Derived(Box<dyn BehaviorUpstream<A>>),
}

impl<A: Value> BehaviorSource<A> {
    fn kind(&self) -> NodeKind {
        match self {
            BehaviorSource::Constant => NodeKind::Constant,
            BehaviorSource::Sink => NodeKind::Sink,
            BehaviorSource::Function => NodeKind::Function,
            BehaviorSource::Producer(_) => NodeKind::Producer,
            BehaviorSource::Derived(upstream) => upstream.kind(),
        }
    }

    fn rank(&self) -> usize {
        match self {
            BehaviorSource::Derived(upstream) => upstream.rank(),
            _ => 0,
        }
    }
}

pub(crate) struct BehaviorCore<A: Value> {
    id: NodeId,
    rank: usize,
    this: Weak<BehaviorCore<A>>,
    eval: Evaluation<A>,
    dispatcher: Dispatcher<A>,
    lifecycle: Lifecycle,
    source: BehaviorSource<A>,
}

impl<A: Value> BehaviorCore<A> {
    fn handle(&self) -> Result<Behavior<A>> {
        self.this
            .upgrade()
            .map(|core| Behavior { core })
            .ok_or(FrpError::Dropped { node: self.id })
    }

    fn emitter(&self) -> Emitter<A> {
        let target: Weak<dyn PushTarget<A>> = self.this.clone();
        Emitter::new(self.id, target)
    }

    /// Store a new value and tell listeners about it.
    fn update(&self, value: A) {
        if let Evaluation::Push { last } = &self.eval {
            *last.write() = value.clone();
            trace!(node = %self.id, listeners = self.dispatcher.len(), "update");
            self.dispatcher.dispatch(value);
        }
    }

    /// Store a new value without notifying anyone.
    fn set_last(&self, value: A) {
        if let Evaluation::Push { last } = &self.eval {
            *last.write() = value;
        }
    }

    fn sample(&self) -> A {
        match &self.eval {
            Evaluation::Pull { pull, cache } => {
                let Some(tick) = Transaction::current() else {
                    return pull();
                };
                if let Some((cached_at, value)) = &*cache.lock() {
                    if *cached_at == tick {
                        return value.clone();
                    }
                }
                // The pull function may sample other behaviors, so it runs
                // without the cache lock held.
                let value = pull();
                *cache.lock() = Some((tick, value.clone()));
                value
            }
            Evaluation::Push { last } => {
                if self.lifecycle.phase() != Phase::Active {
                    if let BehaviorSource::Derived(upstream) = &self.source {
                        if let Some(value) = upstream.pull() {
                            return value;
                        }
                    }
                }
                last.read().clone()
            }
        }
    }
}

impl<A: Value> PushTarget<A> for BehaviorCore<A> {
    fn push(&self, value: A) -> Result<()> {
        match &self.source {
            BehaviorSource::Sink => {}
            BehaviorSource::Producer(_) => {
                let phase = self.lifecycle.phase();
                if !phase.accepts_push() {
                    warn!(node = %self.id, ?phase, "push rejected: producer is not active");
                    return Err(FrpError::InactiveProducer { node: self.id });
                }
            }
            BehaviorSource::Constant | BehaviorSource::Function | BehaviorSource::Derived(_) => {
                let kind = self.source.kind();
                warn!(node = %self.id, %kind, "push rejected: behavior is read-only");
                return Err(FrpError::ReadOnly { node: self.id, kind });
            }
        }
        self.update(value);
        Ok(())
    }
}

impl<A: Value> Activation for BehaviorCore<A> {
    fn node_id(&self) -> NodeId {
        self.id
    }

    fn node_kind(&self) -> NodeKind {
        self.source.kind()
    }

    fn demanded(&self) -> bool {
        !self.dispatcher.is_empty()
    }

    fn activate(&self) -> Result<()> {
        match &self.source {
            BehaviorSource::Constant | BehaviorSource::Sink | BehaviorSource::Function => Ok(()),
            BehaviorSource::Producer(producer) => producer.activate(self.emitter()),
            BehaviorSource::Derived(upstream) => upstream.attach(&self.handle()?),
        }
    }

    fn deactivate(&self) {
        match &self.source {
            BehaviorSource::Constant | BehaviorSource::Sink | BehaviorSource::Function => {}
            BehaviorSource::Producer(producer) => producer.deactivate(),
            BehaviorSource::Derived(upstream) => upstream.detach(),
        }
    }
}

/// A value that exists at every instant.
///
/// # Example
///
/// ```rust,ignore
/// let celsius = sink_behavior(20.0);
/// let fahrenheit = celsius.map(|c| c * 9.0 / 5.0 + 32.0);
///
/// assert_eq!(fahrenheit.at(), 68.0);
/// celsius.push(100.0)?;
/// assert_eq!(fahrenheit.at(), 212.0);
/// ```
pub struct Behavior<A: Value> {
    core: Arc<BehaviorCore<A>>,
}

impl<A: Value> Behavior<A> {
    fn from_parts(eval: Evaluation<A>, source: BehaviorSource<A>) -> Self {
        let rank = source.rank();
        let core = Arc::new_cyclic(|this| BehaviorCore {
            id: NodeId::new(),
            rank,
            this: this.clone(),
            eval,
            dispatcher: Dispatcher::new(),
            lifecycle: Lifecycle::new(),
            source,
        });
        Self { core }
    }

    fn push_mode(initial: A, source: BehaviorSource<A>) -> Self {
        Self::from_parts(
            Evaluation::Push {
                last: RwLock::new(initial),
            },
            source,
        )
    }

    fn pull_mode(pull: PullFn<A>, source: BehaviorSource<A>) -> Self {
        Self::from_parts(
            Evaluation::Pull {
                pull,
                cache: Mutex::new(None),
            },
            source,
        )
    }

    /// A behavior that always has `value`.
    pub fn of(value: A) -> Self {
        Self::push_mode(value, BehaviorSource::Constant)
    }

    /// A pull-mode behavior whose value is `f()` at the time of each query.
    pub fn from_function<F>(f: F) -> Self
    where
        F: Fn() -> A + Send + Sync + 'static,
    {
        Self::pull_mode(Arc::new(f), BehaviorSource::Function)
    }

    /// A push-mode behavior updated by `push` at any time.
    pub fn sink(initial: A) -> Self {
        Self::push_mode(initial, BehaviorSource::Sink)
    }

    /// A push-mode behavior fed by an external producer while demanded.
    ///
    /// Holds `initial` until the producer pushes something.
    pub fn from_producer<P>(initial: A, producer: P) -> Self
    where
        P: Producer<A>,
    {
        Self::push_mode(initial, BehaviorSource::Producer(Arc::new(producer)))
    }

    /// Get the behavior's unique ID.
    pub fn id(&self) -> NodeId {
        self.core.id
    }

    /// Where this behavior's values come from.
    pub fn kind(&self) -> NodeKind {
        self.core.source.kind()
    }

    /// How the value is obtained.
    pub fn mode(&self) -> Mode {
        match self.core.eval {
            Evaluation::Push { .. } => Mode::Push,
            Evaluation::Pull { .. } => Mode::Pull,
        }
    }

    /// Current activation state.
    pub fn phase(&self) -> Phase {
        self.core.lifecycle.phase()
    }

    pub(crate) fn rank(&self) -> usize {
        self.core.rank
    }

    /// Check if the behavior is active.
    pub fn is_active(&self) -> bool {
        self.phase() == Phase::Active
    }

    /// Get the number of listeners.
    pub fn listener_count(&self) -> usize {
        self.core.dispatcher.len()
    }

    /// The current value.
    ///
    /// Pull mode runs the pull function, reusing its result within one
    /// logical instant. Push mode returns the cached value.
    pub fn at(&self) -> A {
        self.core.sample()
    }

    /// The most recently known value, without pulling.
    ///
    /// For pull mode this is the last value pulled inside a transaction.
    pub fn last(&self) -> Option<A> {
        match &self.core.eval {
            Evaluation::Push { last } => Some(last.read().clone()),
            Evaluation::Pull { cache, .. } => cache.lock().as_ref().map(|(_, value)| value.clone()),
        }
    }

    /// Register a listener for updates, activating the behavior if it is the first.
    pub fn subscribe<F>(&self, f: F) -> Result<ListenerId>
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        let (id, count) = self.core.dispatcher.add(Arc::new(f));
        trace!(node = %self.core.id, listeners = count, "listener added");

        if let Err(err) = self.core.lifecycle.reconcile(&*self.core) {
            self.core.dispatcher.remove(id);
            return Err(err);
        }
        Ok(id)
    }

    /// Remove a listener, deactivating the behavior if it was the last.
    pub fn remove_listener(&self, id: ListenerId) {
        let Some(count) = self.core.dispatcher.remove(id) else {
            return;
        };
        trace!(node = %self.core.id, listeners = count, "listener removed");
        let _ = self.core.lifecycle.reconcile(&*self.core);
    }

    /// Push a new value.
    ///
    /// Sinks accept pushes at any time; producers only while activating or
    /// active. Everything else is read-only.
    pub fn push(&self, value: A) -> Result<()> {
        self.core.push(value)
    }

    /// Apply `f` to the behavior's value.
    pub fn map<B, F>(&self, f: F) -> Behavior<B>
    where
        B: Value,
        F: Fn(&A) -> B + Send + Sync + 'static,
    {
        let f: Arc<dyn Fn(&A) -> B + Send + Sync> = Arc::new(f);
        let upstream = Box::new(MapBehavior {
            parent: self.clone(),
            f: Arc::clone(&f),
            listener: Mutex::new(None),
        });

        match self.mode() {
            Mode::Pull => {
                let parent = self.clone();
                let pull = Arc::new(move || f(&parent.at()));
                Behavior::pull_mode(pull, BehaviorSource::Derived(upstream))
            }
            Mode::Push => Behavior::push_mode(f(&self.at()), BehaviorSource::Derived(upstream)),
        }
    }

    /// The behavior's meaning as a function of time.
    ///
    /// Defined for constants and for `map` and `hold` chains over test
    /// streams. Sinks, producers, and pull functions have none.
    pub fn semantic(&self) -> Result<TimeFn<A>> {
        match &self.core.source {
            BehaviorSource::Constant => {
                let value = self.at();
                Ok(Arc::new(move |_| value.clone()))
            }
            BehaviorSource::Derived(upstream) => upstream.semantic(),
            BehaviorSource::Sink | BehaviorSource::Function | BehaviorSource::Producer(_) => {
                Err(FrpError::NoSemantics {
                    node: self.core.id,
                    kind: self.kind(),
                })
            }
        }
    }
}

impl<A: Value> Clone for Behavior<A> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<A: Value> Debug for Behavior<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Behavior")
            .field("id", &self.core.id)
            .field("kind", &self.kind())
            .field("mode", &self.mode())
            .field("phase", &self.phase())
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

impl<A: Value> Reactive<A> for Behavior<A> {
    type Mapped<B: Value> = Behavior<B>;

    fn id(&self) -> NodeId {
        Behavior::id(self)
    }

    fn subscribe<F>(&self, f: F) -> Result<ListenerId>
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        Behavior::subscribe(self, f)
    }

    fn remove_listener(&self, id: ListenerId) {
        Behavior::remove_listener(self, id)
    }

    fn map<B, F>(&self, f: F) -> Behavior<B>
    where
        B: Value,
        F: Fn(&A) -> B + Send + Sync + 'static,
    {
        Behavior::map(self, f)
    }
}

impl<A: Value> Stream<A> {
    /// A push-mode behavior holding the latest occurrence of this stream.
    ///
    /// Starts at `initial` and follows the stream while the behavior is
    /// active.
    ///
    /// Occurrences pushed while the behavior is inactive are not seen. After
    /// such a gap `at()` keeps the value from before it until the stream
    /// occurs again, whereas [`Behavior::semantic`] always reports the latest
    /// occurrence of the log.
    pub fn hold(&self, initial: A) -> Behavior<A> {
        Behavior::push_mode(
            initial.clone(),
            BehaviorSource::Derived(Box::new(Hold {
                stream: self.clone(),
                initial,
                listener: Mutex::new(None),
            })),
        )
    }
}

// ----------------------------------------------------------------------------
// Derived behaviors
// ----------------------------------------------------------------------------

struct MapBehavior<A: Value, B: Value> {
    parent: Behavior<A>,
    f: Arc<dyn Fn(&A) -> B + Send + Sync>,
    listener: Mutex<Option<ListenerId>>,
}

impl<A: Value, B: Value> BehaviorUpstream<B> for MapBehavior<A, B> {
    fn kind(&self) -> NodeKind {
        NodeKind::Map
    }

    fn rank(&self) -> usize {
        self.parent.rank() + 1
    }

    fn attach(&self, target: &Behavior<B>) -> Result<()> {
        let id = match self.parent.mode() {
            Mode::Push => {
                let f = Arc::clone(&self.f);
                let forward = target.clone();
                let id = self.parent.subscribe(move |a| forward.core.update(f(a)))?;
                // Catch up with updates the parent saw while we were detached.
                target.core.set_last((self.f)(&self.parent.at()));
                id
            }
            // Nothing to forward; the listener only keeps the parent active.
            Mode::Pull => self.parent.subscribe(|_| {})?,
        };
        *self.listener.lock() = Some(id);
        Ok(())
    }

    fn detach(&self) {
        let id = self.listener.lock().take();
        if let Some(id) = id {
            self.parent.remove_listener(id);
        }
    }

    fn pull(&self) -> Option<B> {
        Some((self.f)(&self.parent.at()))
    }

    fn semantic(&self) -> Result<TimeFn<B>> {
        let parent = self.parent.semantic()?;
        let f = Arc::clone(&self.f);
        Ok(Arc::new(move |t| f(&parent(t))))
    }
}

struct Hold<A: Value> {
    stream: Stream<A>,
    initial: A,
    listener: Mutex<Option<ListenerId>>,
}

impl<A: Value> BehaviorUpstream<A> for Hold<A> {
    fn kind(&self) -> NodeKind {
        NodeKind::Hold
    }

    fn rank(&self) -> usize {
        self.stream.rank() + 1
    }

    fn attach(&self, target: &Behavior<A>) -> Result<()> {
        let forward = target.clone();
        let id = self.stream.subscribe(move |a| forward.core.update(a.clone()))?;
        *self.listener.lock() = Some(id);
        Ok(())
    }

    fn detach(&self) {
        let id = self.listener.lock().take();
        if let Some(id) = id {
            self.stream.remove_listener(id);
        }
    }

    fn pull(&self) -> Option<A> {
        None
    }

    fn semantic(&self) -> Result<TimeFn<A>> {
        let log = self.stream.semantic()?;
        let initial = self.initial.clone();
        Ok(Arc::new(move |t| {
            log.latest_at(t).cloned().unwrap_or_else(|| initial.clone())
        }))
    }
}

/// A pull-mode behavior whose value is `f()` at the time of each query.
pub fn from_function<A, F>(f: F) -> Behavior<A>
where
    A: Value,
    F: Fn() -> A + Send + Sync + 'static,
{
    Behavior::from_function(f)
}

/// A push-mode behavior updated by `push` at any time.
pub fn sink_behavior<A: Value>(initial: A) -> Behavior<A> {
    Behavior::sink(initial)
}

/// A push-mode behavior fed by an external producer while demanded.
pub fn producer_behavior<A, P>(initial: A, producer: P) -> Behavior<A>
where
    A: Value,
    P: Producer<A>,
{
    Behavior::from_producer(initial, producer)
}

/// A behavior holding the latest occurrence of `stream`, starting at `initial`.
pub fn stepper<A: Value>(initial: A, stream: &Stream<A>) -> Behavior<A> {
    stream.hold(initial)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
