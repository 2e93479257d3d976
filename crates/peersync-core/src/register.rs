//! Convergent registers: last-writer-wins and multi-value.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use uuid::Uuid;

/// A last-writer-wins register.
///
/// Holds one value stamped with the writer's wall clock and node id. Merge
/// keeps the operand with the larger timestamp; on an exact timestamp tie
/// the higher node id wins. The tie-break is applied identically in `set`
/// and `merge` so that merge stays commutative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LwwRegister<T> {
    /// The stored value.
    pub value: T,
    /// Wall-clock milliseconds of the last write.
    pub timestamp_ms: u64,
    /// Node that performed the last write.
    pub node: Uuid,
}

impl<T: Clone> LwwRegister<T> {
    /// Create a register with an initial value.
    #[must_use]
    pub fn new(value: T, timestamp_ms: u64, node: Uuid) -> Self {
        Self {
            value,
            timestamp_ms,
            node,
        }
    }

    /// Write a value if the (timestamp, node) pair wins.
    ///
    /// Returns `true` if the value was updated.
    pub fn set(&mut self, value: T, timestamp_ms: u64, node: Uuid) -> bool {
        if (timestamp_ms, node) > (self.timestamp_ms, self.node) {
            self.value = value;
            self.timestamp_ms = timestamp_ms;
            self.node = node;
            true
        } else {
            false
        }
    }

    /// Merge with another register, keeping the winning write.
    pub fn merge(&mut self, other: &Self) {
        if (other.timestamp_ms, other.node) > (self.timestamp_ms, self.node) {
            self.value = other.value.clone();
            self.timestamp_ms = other.timestamp_ms;
            self.node = other.node;
        }
    }
}

impl<T: Default> Default for LwwRegister<T> {
    fn default() -> Self {
        Self {
            value: T::default(),
            timestamp_ms: 0,
            node: Uuid::nil(),
        }
    }
}

/// A map of last-writer-wins registers with tombstoned removal.
///
/// Each key owns one register holding `Option<V>`; `None` is the
/// tombstone. Live keys are the keys whose register holds `Some`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LwwMap<K, V>
where
    K: Eq + Hash,
{
    entries: HashMap<K, LwwRegister<Option<V>>>,
}

impl<K, V> LwwMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Get the live value for a key. Tombstoned keys read as absent.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key).and_then(|reg| reg.value.as_ref())
    }

    /// Insert or update a key.
    pub fn insert(&mut self, key: K, value: V, timestamp_ms: u64, node: Uuid) {
        self.entries
            .entry(key)
            .and_modify(|reg| {
                reg.set(Some(value.clone()), timestamp_ms, node);
            })
            .or_insert_with(|| LwwRegister::new(Some(value), timestamp_ms, node));
    }

    /// Remove a key by writing a tombstone.
    pub fn remove(&mut self, key: &K, timestamp_ms: u64, node: Uuid) {
        self.entries
            .entry(key.clone())
            .and_modify(|reg| {
                reg.set(None, timestamp_ms, node);
            })
            .or_insert_with(|| LwwRegister::new(None, timestamp_ms, node));
    }

    /// Whether a key is live.
    #[must_use]
    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Iterate over live entries.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries
            .iter()
            .filter_map(|(key, reg)| reg.value.as_ref().map(|value| (key, value)))
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.values().filter(|reg| reg.value.is_some()).count()
    }

    /// Whether there are no live keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge per key: each register merges independently.
    pub fn merge(&mut self, other: &Self) {
        for (key, other_reg) in &other.entries {
            self.entries
                .entry(key.clone())
                .and_modify(|reg| reg.merge(other_reg))
                .or_insert_with(|| other_reg.clone());
        }
    }
}

/// A multi-value register.
///
/// Keeps every surviving concurrent value; `set` replaces the local view,
/// merge unions the value sets de-duplicated. Readers see all candidates
/// and decide for themselves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MvRegister<T>
where
    T: Eq + Hash,
{
    values: HashSet<T>,
}

impl<T> MvRegister<T>
where
    T: Eq + Hash + Clone,
{
    /// Create an empty register.
    #[must_use]
    pub fn new() -> Self {
        Self {
            values: HashSet::new(),
        }
    }

    /// Overwrite the local view with a single value.
    pub fn set(&mut self, value: T) {
        self.values.clear();
        self.values.insert(value);
    }

    /// All surviving values.
    #[must_use]
    pub fn value(&self) -> &HashSet<T> {
        &self.values
    }

    /// Merge by union, de-duplicated.
    pub fn merge(&mut self, other: &Self) {
        for value in &other.values {
            self.values.insert(value.clone());
        }
    }
}
