//! Convergent counters.
//!
//! `GCounter` only grows; `PnCounter` pairs two grow-only counters so it
//! can move in both directions while keeping the same merge guarantees.

use crate::error::CrdtError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A grow-only counter.
///
/// Each node accumulates its own contribution; the counter value is the
/// sum of all contributions. Merge takes the pointwise maximum per node,
/// which makes it commutative, associative, and idempotent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GCounter {
    contributions: HashMap<Uuid, u64>,
}

impl GCounter {
    /// Create a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            contributions: HashMap::new(),
        }
    }

    /// Current value: the sum of every node's contribution.
    #[must_use]
    pub fn value(&self) -> i64 {
        self.contributions
            .values()
            .map(|&c| i64::try_from(c).unwrap_or(i64::MAX))
            .sum()
    }

    /// Add `amount` to this node's contribution.
    ///
    /// # Errors
    ///
    /// Returns [`CrdtError::InvalidAmount`] for negative amounts; the
    /// counter is left untouched.
    pub fn increment(&mut self, node: Uuid, amount: i64) -> Result<(), CrdtError> {
        let amount = u64::try_from(amount).map_err(|_| CrdtError::InvalidAmount {
            amount,
            operation: "increment",
        })?;
        *self.contributions.entry(node).or_insert(0) += amount;
        Ok(())
    }

    /// Merge another counter into this one, pointwise max per node.
    pub fn merge(&mut self, other: &Self) {
        for (node, &contribution) in &other.contributions {
            let current = self.contributions.entry(*node).or_insert(0);
            *current = (*current).max(contribution);
        }
    }
}

/// A counter supporting both increments and decrements.
///
/// Internally two `GCounter`s: one for increments, one for decrements.
/// The value is their difference; each half merges independently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnCounter {
    increments: GCounter,
    decrements: GCounter,
}

impl PnCounter {
    /// Create a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            increments: GCounter::new(),
            decrements: GCounter::new(),
        }
    }

    /// Current value: increments minus decrements.
    #[must_use]
    pub fn value(&self) -> i64 {
        self.increments.value() - self.decrements.value()
    }

    /// Add `amount` to the counter.
    ///
    /// # Errors
    ///
    /// Returns [`CrdtError::InvalidAmount`] for negative amounts.
    pub fn increment(&mut self, node: Uuid, amount: i64) -> Result<(), CrdtError> {
        self.increments.increment(node, amount)
    }

    /// Subtract `amount` from the counter.
    ///
    /// # Errors
    ///
    /// Returns [`CrdtError::InvalidAmount`] for negative amounts.
    pub fn decrement(&mut self, node: Uuid, amount: i64) -> Result<(), CrdtError> {
        self.decrements
            .increment(node, amount)
            .map_err(|_| CrdtError::InvalidAmount {
                amount,
                operation: "decrement",
            })
    }

    /// Merge another counter into this one, each half independently.
    pub fn merge(&mut self, other: &Self) {
        self.increments.merge(&other.increments);
        self.decrements.merge(&other.decrements);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: u8) -> Uuid {
        Uuid::from_bytes([n; 16])
    }

    #[test]
    fn gcounter_sums_contributions() {
        let mut counter = GCounter::new();
        counter.increment(node(1), 3).unwrap();
        counter.increment(node(2), 4).unwrap();
        counter.increment(node(1), 1).unwrap();
        assert_eq!(counter.value(), 8);
    }

    #[test]
    fn gcounter_rejects_negative_amount() {
        let mut counter = GCounter::new();
        counter.increment(node(1), 5).unwrap();

        let err = counter.increment(node(1), -1).unwrap_err();
        assert_eq!(
            err,
            CrdtError::InvalidAmount {
                amount: -1,
                operation: "increment"
            }
        );
        assert_eq!(counter.value(), 5);
    }

    #[test]
    fn gcounter_merge_is_commutative() {
        let mut a = GCounter::new();
        let mut b = GCounter::new();
        a.increment(node(1), 2).unwrap();
        b.increment(node(2), 7).unwrap();

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);

        assert_eq!(ab.value(), 9);
        assert_eq!(ab, ba);
    }

    #[test]
    fn gcounter_merge_is_idempotent() {
        let mut a = GCounter::new();
        a.increment(node(1), 2).unwrap();

        let snapshot = a.clone();
        a.merge(&snapshot);
        assert_eq!(a, snapshot);
    }

    #[test]
    fn pncounter_moves_both_ways() {
        let mut counter = PnCounter::new();
        counter.increment(node(1), 10).unwrap();
        counter.decrement(node(1), 4).unwrap();
        assert_eq!(counter.value(), 6);
    }

    #[test]
    fn pncounter_rejects_negative_decrement() {
        let mut counter = PnCounter::new();
        counter.increment(node(1), 2).unwrap();

        assert!(counter.decrement(node(1), -3).is_err());
        assert_eq!(counter.value(), 2);
    }

    #[test]
    fn pncounter_merge_converges() {
        let mut a = PnCounter::new();
        let mut b = PnCounter::new();
        a.increment(node(1), 5).unwrap();
        b.decrement(node(2), 2).unwrap();

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);

        assert_eq!(ab.value(), 3);
        assert_eq!(ba.value(), 3);
    }
}
