//! The local entry store.
//!
//! Owns the replicated key/value entries and the node's vector clock.
//! All remote state enters through [`EntryStore::merge_entry`]; callers
//! cannot reach the underlying map, so merge invariants cannot be
//! bypassed.

use peersync_core::{Causality, Change, ResolveStrategy, VectorClock};
use peersync_proto::SyncEntry;
use std::collections::HashMap;
use uuid::Uuid;

/// Outcome of merging one remote entry.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// No local entry existed; the remote entry was adopted.
    Added,
    /// The remote entry causally superseded ours and was adopted.
    Updated,
    /// Our entry causally supersedes the remote one, or they are equal.
    KeptLocal,
    /// The writes were concurrent; the resolution strategy picked a side.
    Conflict {
        /// Whether resolution changed the local entry.
        remote_won: bool,
        /// The winning value after resolution.
        winner: serde_json::Value,
        /// The node that authored the winning value.
        winning_node: Uuid,
    },
}

impl MergeOutcome {
    /// Whether the local store changed.
    #[must_use]
    pub fn changed(&self) -> bool {
        matches!(
            self,
            Self::Added | Self::Updated | Self::Conflict { remote_won: true, .. }
        )
    }
}

/// The local replicated store: entries plus the owning vector clock.
#[derive(Debug)]
pub struct EntryStore {
    node: Uuid,
    entries: HashMap<String, SyncEntry>,
    clock: VectorClock,
    strategy: ResolveStrategy,
}

impl EntryStore {
    /// Create an empty store owned by `node`, resolving concurrent writes
    /// by last-write-wins.
    #[must_use]
    pub fn new(node: Uuid) -> Self {
        Self::with_strategy(node, ResolveStrategy::default())
    }

    /// Create an empty store with a custom conflict-resolution strategy.
    #[must_use]
    pub fn with_strategy(node: Uuid, strategy: ResolveStrategy) -> Self {
        Self {
            node,
            entries: HashMap::new(),
            clock: VectorClock::new(),
            strategy,
        }
    }

    /// The owning node.
    #[must_use]
    pub fn node(&self) -> Uuid {
        self.node
    }

    /// Snapshot of the node's vector clock.
    #[must_use]
    pub fn clock(&self) -> VectorClock {
        self.clock.clone()
    }

    /// Write a value locally, advancing the node's clock.
    pub fn set(&mut self, key: &str, value: serde_json::Value, timestamp_ms: u64) {
        self.clock.increment(self.node);
        let entry = SyncEntry {
            key: key.to_string(),
            value,
            clock: self.clock.clone(),
            timestamp_ms,
            writer: self.node,
        };
        self.entries.insert(key.to_string(), entry);
    }

    /// Delete a key locally, advancing the node's clock.
    ///
    /// Returns `true` if the key existed.
    pub fn delete(&mut self, key: &str) -> bool {
        self.clock.increment(self.node);
        self.entries.remove(key).is_some()
    }

    /// Read a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Read a full entry.
    #[must_use]
    pub fn entry(&self, key: &str) -> Option<&SyncEntry> {
        self.entries.get(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All keys, unsorted.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// Entries with keys inside `[start, end]`, inclusive on both ends.
    #[must_use]
    pub fn entries_in_range(&self, start: &str, end: &str) -> Vec<SyncEntry> {
        self.entries
            .values()
            .filter(|entry| entry.key.as_str() >= start && entry.key.as_str() <= end)
            .cloned()
            .collect()
    }

    /// Entries for explicitly named keys; unknown keys are skipped.
    #[must_use]
    pub fn entries_for_keys(&self, keys: &[String]) -> Vec<SyncEntry> {
        keys.iter()
            .filter_map(|key| self.entries.get(key).cloned())
            .collect()
    }

    /// All entries, cloned.
    #[must_use]
    pub fn all_entries(&self) -> Vec<SyncEntry> {
        self.entries.values().cloned().collect()
    }

    /// (key, serialized value) pairs for digest generation.
    #[must_use]
    pub fn digest_entries(&self) -> Vec<(String, Vec<u8>)> {
        self.entries
            .iter()
            .map(|(key, entry)| {
                let bytes = serde_json::to_vec(&entry.value).unwrap_or_default();
                (key.clone(), bytes)
            })
            .collect()
    }

    /// Merge one remote entry into the store.
    ///
    /// Unknown keys are adopted unconditionally. Otherwise the entry
    /// clocks decide: causally newer remote state replaces ours, older or
    /// equal state is a no-op, and concurrent writes go to the store's
    /// resolution strategy (last-write-wins by default: strictly greater
    /// remote timestamp wins, ties keep local). Entry clocks and the node
    /// clock absorb the remote history in every accepting branch, so both
    /// sides converge on identical entries.
    pub fn merge_entry(&mut self, remote: &SyncEntry) -> MergeOutcome {
        let Some(local) = self.entries.get_mut(&remote.key) else {
            self.clock.merge(&remote.clock);
            self.entries.insert(remote.key.clone(), remote.clone());
            return MergeOutcome::Added;
        };

        match local.clock.compare(&remote.clock) {
            Causality::Before => {
                let mut merged_clock = local.clock.clone();
                merged_clock.merge(&remote.clock);
                *local = SyncEntry {
                    clock: merged_clock.clone(),
                    ..remote.clone()
                };
                self.clock.merge(&merged_clock);
                MergeOutcome::Updated
            }
            Causality::After | Causality::Equal => MergeOutcome::KeptLocal,
            Causality::Concurrent => {
                let ours = Change::new(local.value.clone(), local.timestamp_ms, local.writer);
                let theirs = Change::new(remote.value.clone(), remote.timestamp_ms, remote.writer);
                let resolved = self.strategy.resolve(&ours, &theirs);
                let remote_won = resolved != ours;

                local.clock.merge(&remote.clock);
                if remote_won {
                    local.value = resolved.value.clone();
                    local.timestamp_ms = resolved.timestamp_ms;
                    local.writer = resolved.node;
                }
                let entry_clock = local.clock.clone();
                self.clock.merge(&entry_clock);
                MergeOutcome::Conflict {
                    remote_won,
                    winner: resolved.value,
                    winning_node: resolved.node,
                }
            }
        }
    }
}
