//! # PeerSync Core
//!
//! Convergent replication primitives for PeerSync.
//!
//! This crate provides:
//! - Vector clocks for causal comparison of write histories
//! - CRDT primitives (counters, sets, registers) with commutative,
//!   associative, idempotent merge laws
//! - A document registry owning named CRDT instances
//! - Deterministic conflict-resolution strategies for concurrent writes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod counter;
pub mod document;
pub mod error;
pub mod register;
pub mod resolve;
pub mod set;
pub mod vclock;

pub use counter::{GCounter, PnCounter};
pub use document::{CrdtDocument, CrdtInstance, CrdtKind};
pub use error::CrdtError;
pub use register::{LwwMap, LwwRegister, MvRegister};
pub use resolve::{Change, ResolveStrategy};
pub use set::{GSet, OrSet, Tag, TwoPhaseSet};
pub use vclock::{Causality, VectorClock};

/// Current wall-clock time in milliseconds since the UNIX epoch.
#[must_use]
pub fn wall_clock_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
