//! Conflict resolution for causally concurrent writes.
//!
//! When two writes to the same key have concurrent vector clocks there is
//! no causal winner, so a strategy picks one deterministically. All
//! strategies are pure: the same pair of changes always resolves the same
//! way on every node.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One side of a conflict: a value with its write metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// The written value.
    pub value: serde_json::Value,
    /// Wall-clock milliseconds of the write.
    pub timestamp_ms: u64,
    /// Node that performed the write.
    pub node: Uuid,
}

impl Change {
    /// Create a change record.
    #[must_use]
    pub fn new(value: serde_json::Value, timestamp_ms: u64, node: Uuid) -> Self {
        Self {
            value,
            timestamp_ms,
            node,
        }
    }
}

/// A function combining two conflicting values into one.
pub type MergeFn = dyn Fn(&serde_json::Value, &serde_json::Value) -> serde_json::Value + Send + Sync;

/// Strategy for reducing two concurrent changes to one.
pub enum ResolveStrategy {
    /// Keep the change with the greater timestamp; ties favor local.
    LastWriteWins,
    /// Keep the change with the smaller timestamp; ties favor local.
    FirstWriteWins,
    /// Keep the change from the highest-ranked node. Nodes absent from
    /// the ranking lose to any ranked node; if neither is ranked, fall
    /// back to last-write-wins.
    PriorityNode(Vec<Uuid>),
    /// Combine both values with a caller-supplied function; the resulting
    /// timestamp is the max of both inputs.
    CustomMerge(Box<MergeFn>),
}

impl Default for ResolveStrategy {
    fn default() -> Self {
        Self::LastWriteWins
    }
}

impl std::fmt::Debug for ResolveStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LastWriteWins => write!(f, "LastWriteWins"),
            Self::FirstWriteWins => write!(f, "FirstWriteWins"),
            Self::PriorityNode(nodes) => f.debug_tuple("PriorityNode").field(nodes).finish(),
            Self::CustomMerge(_) => write!(f, "CustomMerge(..)"),
        }
    }
}

impl ResolveStrategy {
    /// Resolve a conflict between a local and a remote change.
    #[must_use]
    pub fn resolve(&self, local: &Change, remote: &Change) -> Change {
        match self {
            Self::LastWriteWins => {
                if remote.timestamp_ms > local.timestamp_ms {
                    remote.clone()
                } else {
                    local.clone()
                }
            }
            Self::FirstWriteWins => {
                if remote.timestamp_ms < local.timestamp_ms {
                    remote.clone()
                } else {
                    local.clone()
                }
            }
            Self::PriorityNode(ranking) => {
                let local_rank = ranking.iter().position(|node| *node == local.node);
                let remote_rank = ranking.iter().position(|node| *node == remote.node);
                match (local_rank, remote_rank) {
                    (Some(l), Some(r)) => {
                        if r < l {
                            remote.clone()
                        } else {
                            local.clone()
                        }
                    }
                    (Some(_), None) => local.clone(),
                    (None, Some(_)) => remote.clone(),
                    (None, None) => Self::LastWriteWins.resolve(local, remote),
                }
            }
            Self::CustomMerge(combine) => Change {
                value: combine(&local.value, &remote.value),
                timestamp_ms: local.timestamp_ms.max(remote.timestamp_ms),
                node: local.node.max(remote.node),
            },
        }
    }
}
