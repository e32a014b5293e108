//! Reactive Primitives
//!
//! This module implements the push engine: streams, behaviors, and the
//! combinators that connect them.
//!
//! # Concepts
//!
//! ## Streams
//!
//! A Stream is a discrete sequence of occurrences. Listeners registered with
//! `subscribe` receive every value pushed after they subscribe, in
//! subscription order, synchronously inside the `push` call.
//!
//! ## Behaviors
//!
//! A Behavior has a value at every instant. Push-mode behaviors are updated
//! by delivery and cache their latest value; pull-mode behaviors compute
//! theirs on demand.
//!
//! ## Producers
//!
//! External sources (timers, sockets, UI events) implement [`Producer`]. A
//! producer-backed node activates its producer when it gains its first
//! listener and deactivates it when it loses its last.
//!
//! ## Instants
//!
//! Everything a single top-level push causes happens in one logical
//! instant ([`Transaction`]). Pull-mode behaviors return the same value to
//! every observer within an instant.
//!
//! # Implementation Notes
//!
//! Nodes are cheap handles over shared state. Derived nodes hold their
//! upstream and subscribe to it only while active, so an unobserved chain
//! costs nothing at delivery time and holds no external resources.

mod behavior;
mod lifecycle;
mod listener;
mod node;
mod snapshot;
mod stream;
mod traits;
mod transaction;

pub use behavior::{from_function, producer_behavior, sink_behavior, stepper, Behavior, Mode};
pub use lifecycle::{Emitter, Phase, Producer};
pub use listener::ListenerId;
pub use node::{NodeId, NodeKind};
pub use snapshot::{snapshot, snapshot_with};
pub use stream::{empty, is_stream, producer_stream, publish, sink_stream, Stream};
pub use traits::{map, subscribe, Reactive, Value};
pub use transaction::{Tick, Transaction};
