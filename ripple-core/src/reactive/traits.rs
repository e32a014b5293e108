//! Traits shared by streams and behaviors.

use super::listener::ListenerId;
use super::node::NodeId;
use crate::error::Result;

/// Bound for anything carried by a stream or behavior.
pub trait Value: Clone + Send + Sync + 'static {}

impl<T> Value for T where T: Clone + Send + Sync + 'static {}

/// Operations every reactive node supports.
///
/// Lets [`map`] and [`subscribe`] work on streams and behaviors alike.
pub trait Reactive<A: Value>: Clone {
    /// The same kind of node carrying `B` instead of `A`.
    type Mapped<B: Value>;

    /// The node's unique ID.
    fn id(&self) -> NodeId;

    /// Register a listener. The first listener activates the node.
    fn subscribe<F>(&self, f: F) -> Result<ListenerId>
    where
        F: Fn(&A) + Send + Sync + 'static;

    /// Unregister a listener. Removing the last one deactivates the node.
    fn remove_listener(&self, id: ListenerId);

    /// Derive a node by applying `f` to every value.
    fn map<B, F>(&self, f: F) -> Self::Mapped<B>
    where
        B: Value,
        F: Fn(&A) -> B + Send + Sync + 'static;
}

/// Derive a node by applying `f` to every value of `source`.
pub fn map<A, B, R, F>(f: F, source: &R) -> R::Mapped<B>
where
    A: Value,
    B: Value,
    R: Reactive<A>,
    F: Fn(&A) -> B + Send + Sync + 'static,
{
    source.map(f)
}

/// Register `f` as a listener on `source`.
pub fn subscribe<A, R, F>(f: F, source: &R) -> Result<ListenerId>
where
    A: Value,
    R: Reactive<A>,
    F: Fn(&A) + Send + Sync + 'static,
{
    source.subscribe(f)
}
