//! Ripple Core
//!
//! A push-based functional reactive programming engine. It implements:
//!
//! - Streams of discrete occurrences with ordered, synchronous delivery
//! - Behaviors (time-varying values) in push and pull modes
//! - Demand-driven activation of external producers
//! - `map`, `combine`, and `snapshot` combinators
//! - A denotational model for checking the combinators against their meaning
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `reactive`: Streams, behaviors, producers, and the delivery engine
//! - `semantic`: Occurrence logs, test stream constructors, and replay
//! - `error`: The crate error type
//!
//! # Example
//!
//! ```rust,ignore
//! use ripple_core::reactive::{sink_stream, snapshot};
//!
//! let clicks = sink_stream::<()>();
//! let count = clicks.map(|_| 1).hold(0);
//! let reports = snapshot(&count, &clicks);
//!
//! reports.subscribe(|n| println!("count is {n}"))?;
//! clicks.push(())?;
//! ```
//!
//! The library emits `tracing` events but never installs a subscriber; log
//! output is configured by the embedding application.

pub mod error;
pub mod reactive;
pub mod semantic;

pub use error::{FrpError, Result};
pub use reactive::{Behavior, Emitter, ListenerId, Producer, Stream};
pub use semantic::{test_stream_from_array, test_stream_from_object, Replay, SemanticLog};
