//! Denotational Model
//!
//! A pure description of what a stream means: the time-ordered list of its
//! occurrences. Combinator laws are stated against this model without
//! running the push engine, and the [`Replay`] driver feeds the same
//! occurrences through the engine so both can be compared.
//!
//! # Meaning of the combinators
//!
//! - `map(f)` applies `f` to every value and keeps its time.
//! - `combine` merges two logs by ascending time. Occurrences at equal times
//!   keep the left operand's before the right's.
//! - `snapshot_with(f, b, s)` pairs every occurrence `(v, t)` of `s` with
//!   `b(t)`. For a behavior built with `hold`, `b(t)` is the last occurrence
//!   at a time `<= t`: an update at `t` is visible to a snapshot at `t`.

mod replay;

pub use replay::Replay;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{FrpError, Result};
use crate::reactive::{Stream, Value};

/// Logical time of an occurrence.
pub type Time = f64;

/// A behavior's meaning: its value at every time.
pub type TimeFn<A> = Arc<dyn Fn(Time) -> A + Send + Sync>;

/// A single occurrence of a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence<A> {
    pub value: A,
    pub time: Time,
}

impl<A> Occurrence<A> {
    pub fn new(value: A, time: Time) -> Self {
        Self { value, time }
    }
}

/// Time-ordered occurrences of a stream. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SemanticLog<A> {
    occurrences: Vec<Occurrence<A>>,
}

impl<A> SemanticLog<A> {
    /// The log of a stream that never occurs.
    pub fn empty() -> Self {
        Self {
            occurrences: Vec::new(),
        }
    }

    /// Assign times `0, 1, 2, …` to successive values.
    pub fn from_values(values: impl IntoIterator<Item = A>) -> Self {
        let occurrences = values
            .into_iter()
            .enumerate()
            .map(|(i, value)| Occurrence::new(value, i as Time))
            .collect();
        Self { occurrences }
    }

    /// Build a log from `(time, value)` entries in emission order.
    ///
    /// Times must be finite and strictly increasing; entries are never
    /// re-sorted.
    pub fn from_timed(entries: impl IntoIterator<Item = (Time, A)>) -> Result<Self> {
        let mut occurrences: Vec<Occurrence<A>> = Vec::new();
        for (time, value) in entries {
            if !time.is_finite() {
                return Err(FrpError::InvalidTime(time));
            }
            if let Some(last) = occurrences.last() {
                if time <= last.time {
                    return Err(FrpError::UnorderedTimes {
                        previous: last.time,
                        next: time,
                    });
                }
            }
            occurrences.push(Occurrence::new(value, time));
        }
        Ok(Self { occurrences })
    }

    pub fn occurrences(&self) -> &[Occurrence<A>] {
        &self.occurrences
    }

    pub fn len(&self) -> usize {
        self.occurrences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occurrences.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Occurrence<A>> {
        self.occurrences.iter()
    }

    pub fn times(&self) -> Vec<Time> {
        self.occurrences.iter().map(|o| o.time).collect()
    }

    /// Apply `f` to every value, keeping times.
    pub fn map<B>(&self, f: impl Fn(&A) -> B) -> SemanticLog<B> {
        SemanticLog {
            occurrences: self
                .occurrences
                .iter()
                .map(|o| Occurrence::new(f(&o.value), o.time))
                .collect(),
        }
    }

    /// Apply `f` to every value together with its time, keeping times.
    pub fn map_timed<B>(&self, f: impl Fn(&A, Time) -> B) -> SemanticLog<B> {
        SemanticLog {
            occurrences: self
                .occurrences
                .iter()
                .map(|o| Occurrence::new(f(&o.value, o.time), o.time))
                .collect(),
        }
    }

    /// Value of the last occurrence at or before `time`.
    pub fn latest_at(&self, time: Time) -> Option<&A> {
        // Occurrences are sorted, so the ones at or before `time` form a prefix.
        let idx = self.occurrences.partition_point(|o| o.time <= time);
        idx.checked_sub(1).map(|i| &self.occurrences[i].value)
    }
}

impl<A: Clone> SemanticLog<A> {
    /// Values in occurrence order.
    pub fn values(&self) -> Vec<A> {
        self.occurrences.iter().map(|o| o.value.clone()).collect()
    }

    /// Merge two logs by ascending time; ties keep `self` first.
    pub fn merge(&self, other: &SemanticLog<A>) -> SemanticLog<A> {
        let mut merged = Vec::with_capacity(self.len() + other.len());
        let (mut left, mut right) = (self.occurrences.iter().peekable(), other.occurrences.iter().peekable());

        loop {
            let take_left = match (left.peek(), right.peek()) {
                (Some(l), Some(r)) => l.time <= r.time,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if take_left { left.next() } else { right.next() };
            if let Some(occurrence) = next {
                merged.push(occurrence.clone());
            }
        }

        SemanticLog { occurrences: merged }
    }
}

impl<A> Default for SemanticLog<A> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<'a, A> IntoIterator for &'a SemanticLog<A> {
    type Item = &'a Occurrence<A>;
    type IntoIter = std::slice::Iter<'a, Occurrence<A>>;

    fn into_iter(self) -> Self::IntoIter {
        self.occurrences.iter()
    }
}

// ----------------------------------------------------------------------------
// Test stream constructors
// ----------------------------------------------------------------------------

/// A stream whose occurrences are `values` at times `0, 1, 2, …`.
///
/// The stream also works with the push engine: it accepts `push` like a sink,
/// and [`Replay`] can play its log.
pub fn test_stream_from_array<A: Value>(values: impl IntoIterator<Item = A>) -> Stream<A> {
    Stream::from_log(SemanticLog::from_values(values))
}

/// A stream whose occurrences are the given `(time, value)` entries.
///
/// Entries are taken in the order supplied and must have finite, strictly
/// increasing times; anything else is rejected rather than re-sorted.
pub fn test_stream_from_object<A: Value>(
    entries: impl IntoIterator<Item = (Time, A)>,
) -> Result<Stream<A>> {
    Ok(Stream::from_log(SemanticLog::from_timed(entries)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_values_assigns_increasing_integer_times() {
        let log = SemanticLog::from_values([0, 1, 2, 3]);
        assert_eq!(
            serde_json::to_value(&log).unwrap(),
            json!([
                { "value": 0, "time": 0.0 },
                { "value": 1, "time": 1.0 },
                { "value": 2, "time": 2.0 },
                { "value": 3, "time": 3.0 },
            ])
        );
    }

    #[test]
    fn from_timed_keeps_fractional_times() {
        let log = SemanticLog::from_timed([(2.0, "one"), (4.0, "two"), (5.5, "three")]).unwrap();
        assert_eq!(log.times(), vec![2.0, 4.0, 5.5]);
        assert_eq!(log.values(), vec!["one", "two", "three"]);
    }

    #[test]
    fn from_timed_rejects_unordered_times() {
        let err = SemanticLog::from_timed([(2.0, 'a'), (1.0, 'b')]).unwrap_err();
        assert_eq!(err, FrpError::UnorderedTimes { previous: 2.0, next: 1.0 });

        let err = SemanticLog::from_timed([(1.0, 'a'), (1.0, 'b')]).unwrap_err();
        assert!(matches!(err, FrpError::UnorderedTimes { .. }));
    }

    #[test]
    fn from_timed_rejects_non_finite_times() {
        let err = SemanticLog::from_timed([(f64::NAN, 'a')]).unwrap_err();
        assert!(matches!(err, FrpError::InvalidTime(t) if t.is_nan()));
        assert!(SemanticLog::from_timed([(f64::INFINITY, 'a')]).is_err());
    }

    #[test]
    fn merge_interleaves_by_time_left_first_on_ties() {
        let left = SemanticLog::from_timed([(0.0, "l0"), (2.0, "l2"), (3.0, "l3")]).unwrap();
        let right = SemanticLog::from_timed([(1.0, "r1"), (2.0, "r2")]).unwrap();

        assert_eq!(left.merge(&right).values(), vec!["l0", "r1", "l2", "r2", "l3"]);
        assert_eq!(right.merge(&left).values(), vec!["l0", "r1", "r2", "l2", "l3"]);
    }

    #[test]
    fn latest_at_includes_equal_time() {
        let log = SemanticLog::from_timed([(1.0, 'a'), (3.0, 'b')]).unwrap();
        assert_eq!(log.latest_at(0.5), None);
        assert_eq!(log.latest_at(1.0), Some(&'a'));
        assert_eq!(log.latest_at(2.9), Some(&'a'));
        assert_eq!(log.latest_at(3.0), Some(&'b'));
    }

    #[test]
    fn log_round_trips_through_json() {
        let log = SemanticLog::from_timed([(0.5, "x".to_string())]).unwrap();
        let text = serde_json::to_string(&log).unwrap();
        let back: SemanticLog<String> = serde_json::from_str(&text).unwrap();
        assert_eq!(back, log);
    }
}
