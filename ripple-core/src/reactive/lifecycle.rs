//! Demand-driven activation
//!
//! Streams and behaviors only hold on to upstream subscriptions and external
//! resources while somebody listens to them. The [`Lifecycle`] state machine
//! decides when to activate and deactivate a node:
//!
//! ```text
//!            listeners 0 -> 1                 activate() ok
//! Inactive ------------------> Activating ----------------> Active
//!    ^                             |                          |
//!    |      activate() failed      |        listeners -> 0    |
//!    +-----------------------------+                          |
//!    |                                                        v
//!    +------------------------ Deactivating <-----------------+
//!              deactivate()
//! ```
//!
//! Only one transition is ever in flight per node. If listeners come and go
//! while a transition runs (for example a producer's `activate` pushes a value
//! and a listener unsubscribes in response), the running transition re-checks
//! demand once it finishes and performs any follow-up transition itself.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, error};

use super::node::{NodeId, NodeKind};
use crate::error::{FrpError, Result};

/// Activation state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No listeners; no upstream subscriptions or external resources held.
    Inactive,

    /// `activate` is running.
    Activating,

    /// At least one listener; upstream subscriptions are in place.
    Active,

    /// `deactivate` is running.
    Deactivating,
}

impl Phase {
    /// Whether a producer in this phase may push values.
    pub fn accepts_push(&self) -> bool {
        matches!(self, Phase::Activating | Phase::Active)
    }
}

/// Hooks the lifecycle manager drives. Implemented by stream and behavior cores.
pub(crate) trait Activation {
    fn node_id(&self) -> NodeId;
    fn node_kind(&self) -> NodeKind;
    fn demanded(&self) -> bool;
    fn activate(&self) -> Result<()>;
    fn deactivate(&self);
}

enum Step {
    Activate,
    Deactivate,
}

/// Serializes activation state changes for one node.
pub(crate) struct Lifecycle {
    phase: Mutex<Phase>,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::Inactive),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    /// Bring the phase in line with current demand.
    ///
    /// Called after every listener addition and removal. Returns the error of
    /// a failed activation; the node is left inactive in that case.
    pub fn reconcile<T: Activation + ?Sized>(&self, node: &T) -> Result<()> {
        loop {
            let step = {
                let mut phase = self.phase.lock();
                match (*phase, node.demanded()) {
                    (Phase::Inactive, true) => {
                        *phase = Phase::Activating;
                        Step::Activate
                    }
                    (Phase::Active, false) => {
                        *phase = Phase::Deactivating;
                        Step::Deactivate
                    }
                    // A transition is already running further up the stack;
                    // it loops back here when it finishes.
                    _ => return Ok(()),
                }
            };

            match step {
                Step::Activate => {
                    debug!(node = %node.node_id(), kind = %node.node_kind(), "activating");
                    if let Err(err) = node.activate() {
                        error!(node = %node.node_id(), kind = %node.node_kind(), %err, "activation failed");
                        *self.phase.lock() = Phase::Inactive;
                        return Err(err);
                    }
                    *self.phase.lock() = Phase::Active;
                }
                Step::Deactivate => {
                    debug!(node = %node.node_id(), kind = %node.node_kind(), "deactivating");
                    node.deactivate();
                    *self.phase.lock() = Phase::Inactive;
                }
            }
        }
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

// ----------------------------------------------------------------------------
// Producers
// ----------------------------------------------------------------------------

/// An external source of values, attached only while demanded.
///
/// Timers, UI events, and sockets implement this. The engine calls
/// `activate` when the node gains its first listener and `deactivate` when it
/// loses its last one; the producer owns its resource in between.
///
/// # Example
///
/// ```rust,ignore
/// struct Ticker { handle: Mutex<Option<TimerHandle>> }
///
/// impl Producer<u64> for Ticker {
///     fn activate(&self, emitter: Emitter<u64>) -> Result<()> {
///         let timer = start_timer(move |n| { let _ = emitter.push(n); });
///         *self.handle.lock() = Some(timer);
///         Ok(())
///     }
///
///     fn deactivate(&self) {
///         self.handle.lock().take();
///     }
/// }
/// ```
pub trait Producer<A>: Send + Sync + 'static {
    /// Acquire the resource. May push an initial value through `emitter`.
    fn activate(&self, emitter: Emitter<A>) -> Result<()>;

    /// Release the resource. Pushes after this returns are rejected.
    fn deactivate(&self);
}

/// Push entry point of a node, as seen by an [`Emitter`].
pub(crate) trait PushTarget<A>: Send + Sync {
    fn push(&self, value: A) -> Result<()>;
}

/// Handle a producer uses to push values into its node.
///
/// Holds only a weak reference, so a producer keeping its emitter does not
/// keep the node alive.
pub struct Emitter<A> {
    node: NodeId,
    target: Weak<dyn PushTarget<A>>,
}

impl<A> Emitter<A> {
    pub(crate) fn new(node: NodeId, target: Weak<dyn PushTarget<A>>) -> Self {
        Self { node, target }
    }

    /// Push a value into the node.
    ///
    /// Fails with [`FrpError::InactiveProducer`] once the node has been
    /// deactivated, and with [`FrpError::Dropped`] once it is gone.
    pub fn push(&self, value: A) -> Result<()> {
        let target: Arc<dyn PushTarget<A>> = self
            .target
            .upgrade()
            .ok_or(FrpError::Dropped { node: self.node })?;
        target.push(value)
    }

    /// The node this emitter feeds.
    pub fn node(&self) -> NodeId {
        self.node
    }
}

impl<A> Clone for Emitter<A> {
    fn clone(&self) -> Self {
        Self {
            node: self.node,
            target: Weak::clone(&self.target),
        }
    }
}

impl<A> fmt::Debug for Emitter<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("node", &self.node)
            .field("alive", &(self.target.strong_count() > 0))
            .finish()
    }
}
