//! Error types for the reactive engine.

use thiserror::Error;

use crate::reactive::{NodeId, NodeKind};
use crate::semantic::Time;

/// Result type for reactive operations.
pub type Result<T> = std::result::Result<T, FrpError>;

/// Errors raised synchronously to the caller that misused a node.
///
/// Subscribers never see these: delivery itself cannot fail.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FrpError {
    /// `push` was called on a producer that is not activating or active.
    #[error("push on inactive producer {node}")]
    InactiveProducer { node: NodeId },

    /// `push` was called on a node whose occurrences come from its upstream.
    #[error("{kind} node {node} does not accept pushed values")]
    ReadOnly { node: NodeId, kind: NodeKind },

    /// `semantic` was requested from a node driven by the outside world.
    #[error("{kind} node {node} has no denotational semantics")]
    NoSemantics { node: NodeId, kind: NodeKind },

    /// A test stream was given a time that does not follow its predecessor.
    #[error("occurrence times must strictly increase: {next} follows {previous}")]
    UnorderedTimes { previous: Time, next: Time },

    /// A test stream was given a NaN or infinite time.
    #[error("occurrence time {0} is not finite")]
    InvalidTime(Time),

    /// A producer could not acquire its external resource.
    #[error("activation of {node} failed: {reason}")]
    Activation { node: NodeId, reason: String },

    /// An emitter was used after its node was dropped.
    #[error("node {node} was dropped")]
    Dropped { node: NodeId },
}
