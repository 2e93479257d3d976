//! Vector clocks for causal ordering of replicated writes.
//!
//! Each node owns one counter inside the clock; counters are monotonically
//! non-decreasing and absent entries read as zero. Comparing two clocks
//! yields a strict partial order over write histories.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Result of comparing two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Causality {
    /// Both clocks describe the same history.
    Equal,
    /// The local clock causally precedes the other.
    Before,
    /// The local clock causally follows the other.
    After,
    /// Neither clock dominates; the histories diverged.
    Concurrent,
}

/// A vector clock mapping node ids to logical counters.
///
/// Merge is pointwise maximum, so merging is commutative, associative,
/// and idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    counters: HashMap<Uuid, u64>,
}

impl VectorClock {
    /// Create an empty clock (all counters implicitly zero).
    #[must_use]
    pub fn new() -> Self {
        Self {
            counters: HashMap::new(),
        }
    }

    /// Get the counter for a node, zero if absent.
    #[must_use]
    pub fn get(&self, node: &Uuid) -> u64 {
        self.counters.get(node).copied().unwrap_or(0)
    }

    /// Advance the counter for the owning node by one.
    ///
    /// Only the owning node may call this for its own id; remote history
    /// enters the clock exclusively through [`VectorClock::merge`].
    pub fn increment(&mut self, node: Uuid) -> u64 {
        let counter = self.counters.entry(node).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Merge another clock into this one, taking the pointwise maximum.
    pub fn merge(&mut self, other: &Self) {
        for (node, &counter) in &other.counters {
            let current = self.counters.entry(*node).or_insert(0);
            *current = (*current).max(counter);
        }
    }

    /// Compare this clock against another.
    ///
    /// Walks every node appearing in either clock and tracks whether each
    /// side has observed history the other has not. Both ahead means the
    /// histories are concurrent.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Causality {
        let mut local_ahead = false;
        let mut remote_ahead = false;

        let mut nodes = HashSet::new();
        nodes.extend(self.counters.keys());
        nodes.extend(other.counters.keys());

        for node in nodes {
            let ours = self.get(node);
            let theirs = other.get(node);
            if ours > theirs {
                local_ahead = true;
            } else if ours < theirs {
                remote_ahead = true;
            }
        }

        match (local_ahead, remote_ahead) {
            (false, false) => Causality::Equal,
            (false, true) => Causality::Before,
            (true, false) => Causality::After,
            (true, true) => Causality::Concurrent,
        }
    }

    /// Whether this clock causally precedes the other.
    #[must_use]
    pub fn happens_before(&self, other: &Self) -> bool {
        self.compare(other) == Causality::Before
    }

    /// Whether the two clocks are concurrent.
    #[must_use]
    pub fn is_concurrent(&self, other: &Self) -> bool {
        self.compare(other) == Causality::Concurrent
    }

    /// Iterate over the nodes with a non-zero counter.
    pub fn nodes(&self) -> impl Iterator<Item = &Uuid> {
        self.counters.keys()
    }

    /// Snapshot the counters for wire transfer.
    #[must_use]
    pub fn to_map(&self) -> HashMap<Uuid, u64> {
        self.counters.clone()
    }

    /// Rebuild a clock from a wire snapshot.
    #[must_use]
    pub fn from_map(counters: HashMap<Uuid, u64>) -> Self {
        Self { counters }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: u8) -> Uuid {
        Uuid::from_bytes([n; 16])
    }

    #[test]
    fn empty_clocks_are_equal() {
        let a = VectorClock::new();
        let b = VectorClock::new();
        assert_eq!(a.compare(&b), Causality::Equal);
    }

    #[test]
    fn compare_is_reflexive() {
        let mut a = VectorClock::new();
        a.increment(node(1));
        a.increment(node(2));
        assert_eq!(a.compare(&a), Causality::Equal);
    }

    #[test]
    fn before_and_after_are_symmetric() {
        let mut a = VectorClock::new();
        a.increment(node(1));

        let mut b = a.clone();
        b.increment(node(1));

        assert_eq!(a.compare(&b), Causality::Before);
        assert_eq!(b.compare(&a), Causality::After);
    }

    #[test]
    fn divergent_clocks_are_concurrent() {
        let mut a = VectorClock::new();
        let mut b = VectorClock::new();
        a.increment(node(1));
        b.increment(node(2));

        assert_eq!(a.compare(&b), Causality::Concurrent);
        assert_eq!(b.compare(&a), Causality::Concurrent);
    }

    #[test]
    fn merge_takes_pointwise_max() {
        let mut a = VectorClock::new();
        let mut b = VectorClock::new();
        a.increment(node(1));
        a.increment(node(1));
        b.increment(node(1));
        b.increment(node(2));

        a.merge(&b);
        assert_eq!(a.get(&node(1)), 2);
        assert_eq!(a.get(&node(2)), 1);
        assert_eq!(a.compare(&b), Causality::After);
    }

    #[test]
    fn merge_is_idempotent() {
        let mut a = VectorClock::new();
        a.increment(node(1));
        a.increment(node(2));

        let snapshot = a.clone();
        a.merge(&snapshot);
        assert_eq!(a, snapshot);
    }

    #[test]
    fn map_roundtrip() {
        let mut a = VectorClock::new();
        a.increment(node(1));
        a.increment(node(2));
        a.increment(node(2));

        let rebuilt = VectorClock::from_map(a.to_map());
        assert_eq!(a, rebuilt);
    }
}
