//! Stream Implementation
//!
//! A Stream is a discrete sequence of occurrences. Values are pushed into it
//! and delivered synchronously to every listener before `push` returns.
//!
//! # Kinds of Streams
//!
//! - **Sink**: accepts `push` at any time. The usual way to inject values.
//! - **Producer**: backed by an external resource ([`Producer`]) that is
//!   only attached while the stream has listeners. Pushing while inactive is
//!   an error.
//! - **Test**: carries an explicit occurrence log for the denotational model
//!   and otherwise behaves like a sink.
//! - **Empty**: never occurs. One shared instance per payload type.
//! - **Derived**: built by `map`, `combine`, or `snapshot`. Derived streams
//!   subscribe to their upstream only while they have listeners themselves.
//!
//! # Memory
//!
//! A stream is a cheap handle over shared state; clones refer to the same
//! stream. While a derived stream is active its upstream holds a listener
//! that references it, so an active chain stays alive as long as its source
//! does. Removing the last listener releases the chain.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt::{self, Debug};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{trace, warn};

use super::lifecycle::{Activation, Emitter, Lifecycle, Phase, Producer, PushTarget};
use super::listener::{Dispatcher, ListenerId};
use super::node::{NodeId, NodeKind};
use super::traits::{Reactive, Value};
use crate::error::{FrpError, Result};
use crate::semantic::SemanticLog;

/// Upstream wiring of a derived stream.
pub(crate) trait StreamUpstream<A: Value>: Send + Sync {
    fn kind(&self) -> NodeKind;

    /// One more than the highest rank among the upstream nodes.
    fn rank(&self) -> usize;

    /// Subscribe to the upstream nodes, forwarding into `target`.
    fn attach(&self, target: &Stream<A>) -> Result<()>;

    /// Remove the listeners installed by `attach`.
    fn detach(&self);

    fn semantic(&self) -> Result<SemanticLog<A>>;
}

pub(crate) enum StreamSource<A: Value> {
    Sink,
    Empty,
    Test(SemanticLog<A>),
    Producer(Arc<dyn Producer<A>>),
    Derived(Box<dyn StreamUpstream<A>>),
}

impl<A: Value> StreamSource<A> {
    fn kind(&self) -> NodeKind {
        match self {
            StreamSource::Sink => NodeKind::Sink,
            StreamSource::Empty => NodeKind::Empty,
            StreamSource::Test(_) => NodeKind::Test,
            StreamSource::Producer(_) => NodeKind::Producer,
            StreamSource::Derived(upstream) => upstream.kind(),
        }
    }

    fn rank(&self) -> usize {
        match self {
            StreamSource::Derived(upstream) => upstream.rank(),
            _ => 0,
        }
    }
}

pub(crate) struct StreamCore<A: Value> {
    id: NodeId,
    rank: usize,
    this: Weak<StreamCore<A>>,
    dispatcher: Dispatcher<A>,
    lifecycle: Lifecycle,
    source: StreamSource<A>,
}

impl<A: Value> StreamCore<A> {
    fn handle(&self) -> Result<Stream<A>> {
        self.this
            .upgrade()
            .map(|core| Stream { core })
            .ok_or(FrpError::Dropped { node: self.id })
    }

    fn emitter(&self) -> Emitter<A> {
        let target: Weak<dyn PushTarget<A>> = self.this.clone();
        Emitter::new(self.id, target)
    }

    fn emit(&self, value: A) {
        trace!(node = %self.id, listeners = self.dispatcher.len(), "occurrence");
        self.dispatcher.dispatch(value);
    }
}

impl<A: Value> PushTarget<A> for StreamCore<A> {
    fn push(&self, value: A) -> Result<()> {
        match &self.source {
            StreamSource::Sink | StreamSource::Test(_) => {}
            StreamSource::Producer(_) => {
                let phase = self.lifecycle.phase();
                if !phase.accepts_push() {
                    warn!(node = %self.id, ?phase, "push rejected: producer is not active");
                    return Err(FrpError::InactiveProducer { node: self.id });
                }
            }
            StreamSource::Empty | StreamSource::Derived(_) => {
                let kind = self.source.kind();
                warn!(node = %self.id, %kind, "push rejected: stream is read-only");
                return Err(FrpError::ReadOnly { node: self.id, kind });
            }
        }
        self.emit(value);
        Ok(())
    }
}

impl<A: Value> Activation for StreamCore<A> {
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
            StreamSource::Sink | StreamSource::Empty | StreamSource::Test(_) => Ok(()),
            StreamSource::Producer(producer) => producer.activate(self.emitter()),
            StreamSource::Derived(upstream) => upstream.attach(&self.handle()?),
        }
    }

    fn deactivate(&self) {
        match &self.source {
            StreamSource::Sink | StreamSource::Empty | StreamSource::Test(_) => {}
            StreamSource::Producer(producer) => producer.deactivate(),
            StreamSource::Derived(upstream) => upstream.detach(),
        }
    }
}

/// A discrete, push-delivered sequence of occurrences.
///
/// # Example
///
/// ```rust,ignore
/// let clicks = sink_stream::<u32>();
/// let doubled = clicks.map(|n| n * 2);
///
/// doubled.subscribe(|n| println!("got {n}"))?;
/// clicks.push(21)?; // prints "got 42"
/// ```
pub struct Stream<A: Value> {
    core: Arc<StreamCore<A>>,
}

impl<A: Value> Stream<A> {
    pub(crate) fn from_source(source: StreamSource<A>) -> Self {
        register_stream_type::<A>();
        let rank = source.rank();
        let core = Arc::new_cyclic(|this| StreamCore {
            id: NodeId::new(),
            rank,
            this: this.clone(),
            dispatcher: Dispatcher::new(),
            lifecycle: Lifecycle::new(),
            source,
        });
        Self { core }
    }

    pub(crate) fn derived<U>(upstream: U) -> Self
    where
        U: StreamUpstream<A> + 'static,
    {
        Self::from_source(StreamSource::Derived(Box::new(upstream)))
    }

    pub(crate) fn from_log(log: SemanticLog<A>) -> Self {
        Self::from_source(StreamSource::Test(log))
    }

    /// Create a stream that accepts `push` at any time.
    pub fn sink() -> Self {
        Self::from_source(StreamSource::Sink)
    }

    /// Create a stream fed by an external producer.
    ///
    /// The producer is activated when the stream gains its first listener and
    /// deactivated when it loses its last.
    pub fn from_producer<P>(producer: P) -> Self
    where
        P: Producer<A>,
    {
        Self::from_source(StreamSource::Producer(Arc::new(producer)))
    }

    /// Get the stream's unique ID.
    pub fn id(&self) -> NodeId {
        self.core.id
    }

    /// Where this stream's occurrences come from.
    pub fn kind(&self) -> NodeKind {
        self.core.source.kind()
    }

    /// Current activation state.
    pub fn phase(&self) -> Phase {
        self.core.lifecycle.phase()
    }

    /// Depth in the graph: zero for sources, otherwise above every upstream node.
    pub(crate) fn rank(&self) -> usize {
        self.core.rank
    }

    /// Check if the stream is active (has listeners and is attached upstream).
    pub fn is_active(&self) -> bool {
        self.phase() == Phase::Active
    }

    /// Get the number of listeners.
    pub fn listener_count(&self) -> usize {
        self.core.dispatcher.len()
    }

    /// Check if two handles refer to the same stream.
    pub fn ptr_eq(&self, other: &Stream<A>) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }

    /// Register a listener, activating the stream if it is the first.
    ///
    /// If activation fails the listener is not registered and the error is
    /// returned.
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

    /// Remove a listener, deactivating the stream if it was the last.
    ///
    /// Removing an unknown or already removed listener does nothing.
    pub fn remove_listener(&self, id: ListenerId) {
        let Some(count) = self.core.dispatcher.remove(id) else {
            return;
        };
        trace!(node = %self.core.id, listeners = count, "listener removed");

        // A failed activation has already been logged and reported to the
        // subscriber that triggered it.
        let _ = self.core.lifecycle.reconcile(&*self.core);
    }

    /// Push an occurrence.
    ///
    /// Sinks and test streams accept pushes at any time; producers only while
    /// activating or active. Derived and empty streams reject all pushes.
    pub fn push(&self, value: A) -> Result<()> {
        self.core.push(value)
    }

    /// Deliver an occurrence without checking who is pushing.
    pub(crate) fn emit(&self, value: A) {
        self.core.emit(value);
    }

    /// Apply `f` to every occurrence.
    pub fn map<B, F>(&self, f: F) -> Stream<B>
    where
        B: Value,
        F: Fn(&A) -> B + Send + Sync + 'static,
    {
        Stream::derived(MapStream {
            parent: self.clone(),
            f: Arc::new(f),
            listener: Mutex::new(None),
        })
    }

    /// Replace every occurrence's value with `value`.
    pub fn map_to<B: Value>(&self, value: B) -> Stream<B> {
        self.map(move |_| value.clone())
    }

    /// Interleave this stream's occurrences with `other`'s.
    ///
    /// Occurrences are forwarded as they happen, with no buffering. In the
    /// denotational model occurrences at equal times keep `self` first.
    pub fn combine(&self, other: &Stream<A>) -> Stream<A> {
        Stream::derived(CombineStream {
            left: self.clone(),
            right: other.clone(),
            listeners: Mutex::new(None),
        })
    }

    /// The stream's meaning as a time-ordered occurrence log.
    ///
    /// Defined for test streams, the empty stream, and anything derived from
    /// them. Sinks and producers are driven from outside and have none.
    pub fn semantic(&self) -> Result<SemanticLog<A>> {
        match &self.core.source {
            StreamSource::Empty => Ok(SemanticLog::empty()),
            StreamSource::Test(log) => Ok(log.clone()),
            StreamSource::Derived(upstream) => upstream.semantic(),
            StreamSource::Sink | StreamSource::Producer(_) => Err(FrpError::NoSemantics {
                node: self.core.id,
                kind: self.kind(),
            }),
        }
    }

    /// The explicit log of a test stream.
    pub(crate) fn test_log(&self) -> Option<&SemanticLog<A>> {
        match &self.core.source {
            StreamSource::Test(log) => Some(log),
            _ => None,
        }
    }
}

impl<A: Value> Clone for Stream<A> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<A: Value> Debug for Stream<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.core.id)
            .field("kind", &self.kind())
            .field("phase", &self.phase())
            .field("listener_count", &self.listener_count())
            .finish()
    }
}

impl<A: Value> Reactive<A> for Stream<A> {
    type Mapped<B: Value> = Stream<B>;

    fn id(&self) -> NodeId {
        Stream::id(self)
    }

    fn subscribe<F>(&self, f: F) -> Result<ListenerId>
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        Stream::subscribe(self, f)
    }

    fn remove_listener(&self, id: ListenerId) {
        Stream::remove_listener(self, id)
    }

    fn map<B, F>(&self, f: F) -> Stream<B>
    where
        B: Value,
        F: Fn(&A) -> B + Send + Sync + 'static,
    {
        Stream::map(self, f)
    }
}

// ----------------------------------------------------------------------------
// Combinators
// ----------------------------------------------------------------------------

struct MapStream<A: Value, B: Value> {
    parent: Stream<A>,
    f: Arc<dyn Fn(&A) -> B + Send + Sync>,
    listener: Mutex<Option<ListenerId>>,
}

impl<A: Value, B: Value> StreamUpstream<B> for MapStream<A, B> {
    fn kind(&self) -> NodeKind {
        NodeKind::Map
    }

    fn rank(&self) -> usize {
        self.parent.rank() + 1
    }

    fn attach(&self, target: &Stream<B>) -> Result<()> {
        let f = Arc::clone(&self.f);
        let target = target.clone();
        let id = self.parent.subscribe(move |a| target.emit(f(a)))?;
        *self.listener.lock() = Some(id);
        Ok(())
    }

    fn detach(&self) {
        let id = self.listener.lock().take();
        if let Some(id) = id {
            self.parent.remove_listener(id);
        }
    }

    fn semantic(&self) -> Result<SemanticLog<B>> {
        Ok(self.parent.semantic()?.map(|a| (self.f)(a)))
    }
}

struct CombineStream<A: Value> {
    left: Stream<A>,
    right: Stream<A>,
    listeners: Mutex<Option<(ListenerId, ListenerId)>>,
}

impl<A: Value> StreamUpstream<A> for CombineStream<A> {
    fn kind(&self) -> NodeKind {
        NodeKind::Combine
    }

    fn rank(&self) -> usize {
        self.left.rank().max(self.right.rank()) + 1
    }

    fn attach(&self, target: &Stream<A>) -> Result<()> {
        let forward = |target: &Stream<A>| {
            let target = target.clone();
            move |a: &A| target.emit(a.clone())
        };

        let left = self.left.subscribe(forward(target))?;
        let right = match self.right.subscribe(forward(target)) {
            Ok(id) => id,
            Err(err) => {
                self.left.remove_listener(left);
                return Err(err);
            }
        };
        *self.listeners.lock() = Some((left, right));
        Ok(())
    }

    fn detach(&self) {
        let ids = self.listeners.lock().take();
        if let Some((left, right)) = ids {
            self.left.remove_listener(left);
            self.right.remove_listener(right);
        }
    }

    fn semantic(&self) -> Result<SemanticLog<A>> {
        Ok(self.left.semantic()?.merge(&self.right.semantic()?))
    }
}

// ----------------------------------------------------------------------------
// Stream capability
// ----------------------------------------------------------------------------

// Every `Stream<A>` type that has been instantiated. Only this module
// constructs streams, so membership is exactly the stream capability.
static STREAM_TYPES: OnceLock<RwLock<HashSet<TypeId>>> = OnceLock::new();

// One empty stream per payload type, created on first use and never mutated.
static EMPTY_STREAMS: OnceLock<RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>> =
    OnceLock::new();

fn stream_types() -> &'static RwLock<HashSet<TypeId>> {
    STREAM_TYPES.get_or_init(|| RwLock::new(HashSet::new()))
}

fn register_stream_type<A: Value>() {
    let id = TypeId::of::<Stream<A>>();
    if stream_types().read().contains(&id) {
        return;
    }
    stream_types().write().insert(id);
}

/// Check whether `value` is a stream.
///
/// True for any `Stream<A>`, false for everything else: collections of
/// streams, records, strings, numbers, and functions included.
pub fn is_stream(value: &dyn Any) -> bool {
    stream_types().read().contains(&value.type_id())
}

/// The stream that never occurs. Its semantic log is empty.
///
/// All calls for the same payload type return handles to one shared stream.
pub fn empty<A: Value>() -> Stream<A> {
    let table = EMPTY_STREAMS.get_or_init(|| RwLock::new(HashMap::new()));
    let key = TypeId::of::<A>();

    if let Some(stream) = table
        .read()
        .get(&key)
        .and_then(|entry| entry.downcast_ref::<Stream<A>>())
    {
        return stream.clone();
    }

    let mut table = table.write();
    let entry = table
        .entry(key)
        .or_insert_with(|| {
            Box::new(Stream::<A>::from_source(StreamSource::Empty)) as Box<dyn Any + Send + Sync>
        });
    match entry.downcast_ref::<Stream<A>>() {
        Some(stream) => stream.clone(),
        None => Stream::from_source(StreamSource::Empty),
    }
}

/// Create a stream that accepts `push` at any time.
pub fn sink_stream<A: Value>() -> Stream<A> {
    Stream::sink()
}

/// Create a stream fed by an external producer.
pub fn producer_stream<A, P>(producer: P) -> Stream<A>
where
    A: Value,
    P: Producer<A>,
{
    Stream::from_producer(producer)
}

/// Push `value` into `stream`.
pub fn publish<A: Value>(value: A, stream: &Stream<A>) -> Result<()> {
    stream.push(value)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
