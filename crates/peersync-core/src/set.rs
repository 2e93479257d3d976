//! Convergent sets: grow-only, two-phase, and observed-remove.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use uuid::Uuid;

/// A grow-only set. Elements can never be removed; merge is union.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GSet<T>
where
    T: Eq + Hash,
{
    elements: HashSet<T>,
}

impl<T> GSet<T>
where
    T: Eq + Hash + Clone,
{
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            elements: HashSet::new(),
        }
    }

    /// Insert an element. Returns `true` if it was not already present.
    pub fn insert(&mut self, element: T) -> bool {
        self.elements.insert(element)
    }

    /// Whether the set contains an element.
    #[must_use]
    pub fn contains(&self, element: &T) -> bool {
        self.elements.contains(element)
    }

    /// The current elements.
    #[must_use]
    pub fn value(&self) -> &HashSet<T> {
        &self.elements
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Merge by union.
    pub fn merge(&mut self, other: &Self) {
        for element in &other.elements {
            self.elements.insert(element.clone());
        }
    }
}

/// A set with permanent removal.
///
/// Removed elements leave a tombstone in the remove-set; once removed, an
/// element can never come back, even if a later merge re-adds it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TwoPhaseSet<T>
where
    T: Eq + Hash,
{
    added: HashSet<T>,
    removed: HashSet<T>,
}

impl<T> TwoPhaseSet<T>
where
    T: Eq + Hash + Clone,
{
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            added: HashSet::new(),
            removed: HashSet::new(),
        }
    }

    /// Insert an element. A tombstoned element stays removed.
    pub fn insert(&mut self, element: T) {
        self.added.insert(element);
    }

    /// Remove an element, permanently.
    pub fn remove(&mut self, element: &T) {
        if self.added.contains(element) {
            self.removed.insert(element.clone());
        }
    }

    /// Whether the element is present and not tombstoned.
    #[must_use]
    pub fn contains(&self, element: &T) -> bool {
        self.added.contains(element) && !self.removed.contains(element)
    }

    /// The live elements: add-set minus remove-set.
    #[must_use]
    pub fn value(&self) -> HashSet<T> {
        self.added.difference(&self.removed).cloned().collect()
    }

    /// Merge by union of both sub-sets.
    pub fn merge(&mut self, other: &Self) {
        for element in &other.added {
            self.added.insert(element.clone());
        }
        for element in &other.removed {
            self.removed.insert(element.clone());
        }
    }
}

/// A unique tag attached to one logical add operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    /// The node that performed the add.
    pub node: Uuid,
    /// Monotonic per-node sequence number.
    pub counter: u64,
}

/// An observed-remove set.
///
/// Every add allocates a fresh tag, and removal only tombstones the tags
/// observed at removal time. A concurrent add therefore always survives a
/// remove of an older tag: add wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrSet<T>
where
    T: Eq + Hash,
{
    entries: HashMap<T, HashSet<Tag>>,
    removed: HashSet<Tag>,
    tag_counters: HashMap<Uuid, u64>,
}

impl<T> OrSet<T>
where
    T: Eq + Hash + Clone,
{
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            removed: HashSet::new(),
            tag_counters: HashMap::new(),
        }
    }

    /// Add an element on behalf of `node`, allocating a fresh tag.
    ///
    /// Re-adding an element after removal allocates a new tag, so the
    /// element becomes visible again.
    pub fn add(&mut self, node: Uuid, element: T) -> Tag {
        let counter = self.tag_counters.entry(node).or_insert(0);
        *counter += 1;
        let tag = Tag {
            node,
            counter: *counter,
        };
        self.entries.entry(element).or_default().insert(tag);
        tag
    }

    /// Remove an element by tombstoning every currently observed tag.
    pub fn remove(&mut self, element: &T) {
        if let Some(tags) = self.entries.get(element) {
            self.removed.extend(tags.iter().copied());
        }
    }

    /// Whether the element has at least one live tag.
    #[must_use]
    pub fn contains(&self, element: &T) -> bool {
        self.entries
            .get(element)
            .is_some_and(|tags| tags.iter().any(|tag| !self.removed.contains(tag)))
    }

    /// The live elements.
    #[must_use]
    pub fn value(&self) -> HashSet<T> {
        self.entries
            .iter()
            .filter(|(_, tags)| tags.iter().any(|tag| !self.removed.contains(tag)))
            .map(|(element, _)| element.clone())
            .collect()
    }

    /// Merge by union of add-tags and removed-tags.
    pub fn merge(&mut self, other: &Self) {
        for (element, tags) in &other.entries {
            self.entries
                .entry(element.clone())
                .or_default()
                .extend(tags.iter().copied());
        }
        self.removed.extend(other.removed.iter().copied());
        // Keep tag allocation ahead of everything observed so far.
        for (node, &counter) in &other.tag_counters {
            let current = self.tag_counters.entry(*node).or_insert(0);
            *current = (*current).max(counter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(n: u8) -> Uuid {
        Uuid::from_bytes([n; 16])
    }

    #[test]
    fn gset_union_merge() {
        let mut a = GSet::new();
        let mut b = GSet::new();
        a.insert("x");
        b.insert("y");

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);

        assert_eq!(ab.value(), ba.value());
        assert_eq!(ab.len(), 2);
    }

    #[test]
    fn two_phase_removal_is_permanent() {
        let mut set = TwoPhaseSet::new();
        set.insert("x");
        set.remove(&"x");
        assert!(!set.contains(&"x"));

        // Re-adding cannot resurrect a tombstoned element.
        set.insert("x");
        assert!(!set.contains(&"x"));
    }

    #[test]
    fn two_phase_merge_propagates_tombstones() {
        let mut a = TwoPhaseSet::new();
        let mut b = TwoPhaseSet::new();
        a.insert("x");
        b.insert("x");
        b.remove(&"x");

        a.merge(&b);
        assert!(!a.contains(&"x"));
    }

    #[test]
    fn orset_add_then_remove() {
        let mut set = OrSet::new();
        set.add(node(1), "x");
        assert!(set.contains(&"x"));

        set.remove(&"x");
        assert!(!set.contains(&"x"));
    }

    #[test]
    fn orset_readd_after_remove_is_visible() {
        let mut set = OrSet::new();
        set.add(node(1), "x");
        set.remove(&"x");
        set.add(node(1), "x");
        assert!(set.contains(&"x"));
    }

    #[test]
    fn orset_concurrent_add_wins_over_remove() {
        let mut a = OrSet::new();
        a.add(node(1), "x");

        // Replica observes the add, then both act concurrently.
        let mut b = a.clone();
        a.remove(&"x");
        b.add(node(2), "x");

        a.merge(&b);
        b.merge(&a);

        assert!(a.contains(&"x"));
        assert!(b.contains(&"x"));
    }

    #[test]
    fn orset_merge_is_idempotent() {
        let mut a = OrSet::new();
        a.add(node(1), "x");
        a.remove(&"x");
        a.add(node(1), "y");

        let snapshot = a.clone();
        a.merge(&snapshot);
        assert_eq!(a, snapshot);
    }

    #[test]
    fn orset_fresh_tags_never_collide() {
        let mut a = OrSet::new();
        let t1 = a.add(node(1), "x");
        let t2 = a.add(node(1), "x");
        assert_ne!(t1, t2);

        // Tag allocation stays ahead after observing a merge.
        let mut b = OrSet::new();
        b.merge(&a);
        let t3 = b.add(node(1), "x");
        assert_ne!(t3, t1);
        assert_ne!(t3, t2);
    }
}
