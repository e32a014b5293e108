//! Node identity
//!
//! Every stream and behavior is a node in the reactive graph. Nodes carry an
//! id for logging and error reporting and a kind describing where their
//! values come from.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a stream or behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a node's values come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Accepts pushes at any time, no external resource.
    Sink,

    /// Backed by an external resource acquired while demanded.
    Producer,

    /// Never occurs.
    Empty,

    /// Carries an explicit occurrence log.
    Test,

    /// A behavior that never changes.
    Constant,

    /// A behavior computed on demand from a function.
    Function,

    /// Derived by applying a function to each upstream value.
    Map,

    /// Interleaves two upstream streams.
    Combine,

    /// Samples a behavior at each upstream occurrence.
    Snapshot,

    /// A behavior holding the latest occurrence of a stream.
    Hold,
}

impl NodeKind {
    /// Short lowercase name used in logs and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Sink => "sink",
            NodeKind::Producer => "producer",
            NodeKind::Empty => "empty",
            NodeKind::Test => "test",
            NodeKind::Constant => "constant",
            NodeKind::Function => "function",
            NodeKind::Map => "map",
            NodeKind::Combine => "combine",
            NodeKind::Snapshot => "snapshot",
            NodeKind::Hold => "hold",
        }
    }

    /// Whether values for this kind arrive from upstream nodes.
    pub fn is_derived(&self) -> bool {
        matches!(
            self,
            NodeKind::Map | NodeKind::Combine | NodeKind::Snapshot | NodeKind::Hold
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
        assert!(id2.raw() > id1.raw());
    }

    #[test]
    fn node_id_displays_with_hash() {
        assert_eq!(NodeId::from(42).to_string(), "#42");
    }

    #[test]
    fn derived_kinds() {
        assert!(NodeKind::Map.is_derived());
        assert!(NodeKind::Hold.is_derived());
        assert!(!NodeKind::Sink.is_derived());
        assert!(!NodeKind::Producer.is_derived());
        assert_eq!(NodeKind::Snapshot.to_string(), "snapshot");
    }
}
