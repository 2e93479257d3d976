//! A named registry of CRDT instances.
//!
//! A document owns one instance per (kind, name) pair, created lazily with
//! a default value on first access. Documents merge pairwise and adopt
//! instances only the other side has; nothing is ever silently dropped.

use crate::counter::{GCounter, PnCounter};
use crate::error::CrdtError;
use crate::register::{LwwMap, LwwRegister, MvRegister};
use crate::set::{GSet, OrSet, TwoPhaseSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// The eight CRDT kinds a document can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CrdtKind {
    /// Grow-only counter.
    GCounter,
    /// Increment/decrement counter.
    PnCounter,
    /// Grow-only set.
    GSet,
    /// Two-phase set with permanent tombstones.
    TwoPhaseSet,
    /// Observed-remove set.
    OrSet,
    /// Last-writer-wins register.
    LwwRegister,
    /// Map of last-writer-wins registers.
    LwwMap,
    /// Multi-value register.
    MvRegister,
}

impl FromStr for CrdtKind {
    type Err = CrdtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "g-counter" => Ok(Self::GCounter),
            "pn-counter" => Ok(Self::PnCounter),
            "g-set" => Ok(Self::GSet),
            "2p-set" => Ok(Self::TwoPhaseSet),
            "or-set" => Ok(Self::OrSet),
            "lww-register" => Ok(Self::LwwRegister),
            "lww-map" => Ok(Self::LwwMap),
            "mv-register" => Ok(Self::MvRegister),
            other => Err(CrdtError::UnknownKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for CrdtKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::GCounter => "g-counter",
            Self::PnCounter => "pn-counter",
            Self::GSet => "g-set",
            Self::TwoPhaseSet => "2p-set",
            Self::OrSet => "or-set",
            Self::LwwRegister => "lww-register",
            Self::LwwMap => "lww-map",
            Self::MvRegister => "mv-register",
        };
        write!(f, "{name}")
    }
}

/// One concrete CRDT instance, tagged by kind.
///
/// Sets hold strings, registers and maps hold JSON values, and the
/// multi-value register holds serialized values so candidates stay
/// comparable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CrdtInstance {
    /// Grow-only counter.
    GCounter(GCounter),
    /// Increment/decrement counter.
    PnCounter(PnCounter),
    /// Grow-only set of strings.
    GSet(GSet<String>),
    /// Two-phase set of strings.
    TwoPhaseSet(TwoPhaseSet<String>),
    /// Observed-remove set of strings.
    OrSet(OrSet<String>),
    /// Last-writer-wins register of JSON values.
    LwwRegister(LwwRegister<serde_json::Value>),
    /// Map of last-writer-wins registers.
    LwwMap(LwwMap<String, serde_json::Value>),
    /// Multi-value register of serialized values.
    MvRegister(MvRegister<String>),
}

impl CrdtInstance {
    /// Build a default instance of the given kind.
    #[must_use]
    pub fn default_for(kind: CrdtKind) -> Self {
        match kind {
            CrdtKind::GCounter => Self::GCounter(GCounter::new()),
            CrdtKind::PnCounter => Self::PnCounter(PnCounter::new()),
            CrdtKind::GSet => Self::GSet(GSet::new()),
            CrdtKind::TwoPhaseSet => Self::TwoPhaseSet(TwoPhaseSet::new()),
            CrdtKind::OrSet => Self::OrSet(OrSet::new()),
            CrdtKind::LwwRegister => Self::LwwRegister(LwwRegister::default()),
            CrdtKind::LwwMap => Self::LwwMap(LwwMap::new()),
            CrdtKind::MvRegister => Self::MvRegister(MvRegister::new()),
        }
    }

    /// The kind tag of this instance.
    #[must_use]
    pub fn kind(&self) -> CrdtKind {
        match self {
            Self::GCounter(_) => CrdtKind::GCounter,
            Self::PnCounter(_) => CrdtKind::PnCounter,
            Self::GSet(_) => CrdtKind::GSet,
            Self::TwoPhaseSet(_) => CrdtKind::TwoPhaseSet,
            Self::OrSet(_) => CrdtKind::OrSet,
            Self::LwwRegister(_) => CrdtKind::LwwRegister,
            Self::LwwMap(_) => CrdtKind::LwwMap,
            Self::MvRegister(_) => CrdtKind::MvRegister,
        }
    }

    /// Merge a same-kind instance into this one.
    ///
    /// Instances are registered under (kind, name), so the kinds always
    /// line up; a mismatch would mean registry corruption and is a no-op.
    pub fn merge(&mut self, other: &Self) {
        match (self, other) {
            (Self::GCounter(a), Self::GCounter(b)) => a.merge(b),
            (Self::PnCounter(a), Self::PnCounter(b)) => a.merge(b),
            (Self::GSet(a), Self::GSet(b)) => a.merge(b),
            (Self::TwoPhaseSet(a), Self::TwoPhaseSet(b)) => a.merge(b),
            (Self::OrSet(a), Self::OrSet(b)) => a.merge(b),
            (Self::LwwRegister(a), Self::LwwRegister(b)) => a.merge(b),
            (Self::LwwMap(a), Self::LwwMap(b)) => a.merge(b),
            (Self::MvRegister(a), Self::MvRegister(b)) => a.merge(b),
            (mine, theirs) => {
                tracing::warn!(
                    local_kind = %mine.kind(),
                    remote_kind = %theirs.kind(),
                    "Refusing to merge mismatched CRDT kinds"
                );
            }
        }
    }
}

/// A named collection of CRDT instances that merges as a unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrdtDocument {
    instances: HashMap<(CrdtKind, String), CrdtInstance>,
}

impl CrdtDocument {
    /// Create an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self {
            instances: HashMap::new(),
        }
    }

    fn instance(&mut self, kind: CrdtKind, name: &str) -> &mut CrdtInstance {
        self.instances
            .entry((kind, name.to_string()))
            .or_insert_with(|| CrdtInstance::default_for(kind))
    }

    /// Get or create the named counter.
    pub fn counter(&mut self, name: &str) -> &mut PnCounter {
        match self.instance(CrdtKind::PnCounter, name) {
            CrdtInstance::PnCounter(counter) => counter,
            _ => unreachable!("registry key carries the kind"),
        }
    }

    /// Get or create the named grow-only counter.
    pub fn gcounter(&mut self, name: &str) -> &mut GCounter {
        match self.instance(CrdtKind::GCounter, name) {
            CrdtInstance::GCounter(counter) => counter,
            _ => unreachable!("registry key carries the kind"),
        }
    }

    /// Get or create the named observed-remove set.
    pub fn set(&mut self, name: &str) -> &mut OrSet<String> {
        match self.instance(CrdtKind::OrSet, name) {
            CrdtInstance::OrSet(set) => set,
            _ => unreachable!("registry key carries the kind"),
        }
    }

    /// Get or create the named grow-only set.
    pub fn gset(&mut self, name: &str) -> &mut GSet<String> {
        match self.instance(CrdtKind::GSet, name) {
            CrdtInstance::GSet(set) => set,
            _ => unreachable!("registry key carries the kind"),
        }
    }

    /// Get or create the named two-phase set.
    pub fn two_phase_set(&mut self, name: &str) -> &mut TwoPhaseSet<String> {
        match self.instance(CrdtKind::TwoPhaseSet, name) {
            CrdtInstance::TwoPhaseSet(set) => set,
            _ => unreachable!("registry key carries the kind"),
        }
    }

    /// Get or create the named last-writer-wins register.
    pub fn register(&mut self, name: &str) -> &mut LwwRegister<serde_json::Value> {
        match self.instance(CrdtKind::LwwRegister, name) {
            CrdtInstance::LwwRegister(register) => register,
            _ => unreachable!("registry key carries the kind"),
        }
    }

    /// Get or create the named last-writer-wins map.
    pub fn map(&mut self, name: &str) -> &mut LwwMap<String, serde_json::Value> {
        match self.instance(CrdtKind::LwwMap, name) {
            CrdtInstance::LwwMap(map) => map,
            _ => unreachable!("registry key carries the kind"),
        }
    }

    /// Get or create the named multi-value register.
    pub fn mv_register(&mut self, name: &str) -> &mut MvRegister<String> {
        match self.instance(CrdtKind::MvRegister, name) {
            CrdtInstance::MvRegister(register) => register,
            _ => unreachable!("registry key carries the kind"),
        }
    }

    /// Look up an existing instance without creating one.
    #[must_use]
    pub fn get(&self, kind: CrdtKind, name: &str) -> Option<&CrdtInstance> {
        self.instances.get(&(kind, name.to_string()))
    }

    /// Number of registered instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the document holds no instances.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Merge another document into this one.
    ///
    /// Same-named instances merge pairwise; instances present only in
    /// `other` are adopted by deep copy.
    pub fn merge(&mut self, other: &Self) {
        for (key, other_instance) in &other.instances {
            self.instances
                .entry(key.clone())
                .and_modify(|instance| instance.merge(other_instance))
                .or_insert_with(|| other_instance.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn node(n: u8) -> Uuid {
        Uuid::from_bytes([n; 16])
    }

    #[test]
    fn kind_parse_roundtrip() {
        for kind in [
            CrdtKind::GCounter,
            CrdtKind::PnCounter,
            CrdtKind::GSet,
            CrdtKind::TwoPhaseSet,
            CrdtKind::OrSet,
            CrdtKind::LwwRegister,
            CrdtKind::LwwMap,
            CrdtKind::MvRegister,
        ] {
            assert_eq!(kind.to_string().parse::<CrdtKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let err = "tree-doc".parse::<CrdtKind>().unwrap_err();
        assert_eq!(err, CrdtError::UnknownKind("tree-doc".to_string()));
    }

    #[test]
    fn accessors_are_idempotent() {
        let mut doc = CrdtDocument::new();
        doc.counter("hits").increment(node(1), 2).unwrap();
        doc.counter("hits").increment(node(1), 3).unwrap();

        assert_eq!(doc.counter("hits").value(), 5);
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn same_name_different_kind_coexist() {
        let mut doc = CrdtDocument::new();
        doc.counter("x").increment(node(1), 1).unwrap();
        doc.set("x").add(node(1), "a".to_string());

        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn merge_adopts_missing_instances() {
        let mut a = CrdtDocument::new();
        let mut b = CrdtDocument::new();

        a.counter("hits").increment(node(1), 2).unwrap();
        b.counter("hits").increment(node(2), 3).unwrap();
        b.set("tags").add(node(2), "new".to_string());

        a.merge(&b);
        assert_eq!(a.counter("hits").value(), 5);
        assert!(a.set("tags").contains(&"new".to_string()));
    }

    #[test]
    fn clone_is_deep() {
        let mut doc = CrdtDocument::new();
        doc.counter("hits").increment(node(1), 1).unwrap();

        let mut copy = doc.clone();
        copy.counter("hits").increment(node(1), 10).unwrap();

        assert_eq!(doc.counter("hits").value(), 1);
        assert_eq!(copy.counter("hits").value(), 11);
    }
}
