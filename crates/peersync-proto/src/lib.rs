//! # PeerSync Protocol
//!
//! Wire protocol for PeerSync anti-entropy reconciliation: the five-kind
//! message envelope with CBOR encoding, state digests over partitioned key
//! ranges, and Merkle-root fingerprinting.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod digest;
pub mod message;

pub use digest::{
    build_digest, compare_digests, empty_root, flat_root, merkle_root, sha256_hex,
    DigestComparison, DigestRange, HashFn, StateDigest,
};
pub use message::{KeyRange, MessageError, MessageKind, MessagePayload, SyncEntry, SyncMessage};
