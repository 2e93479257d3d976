//! State digests: range fingerprints and Merkle roots.
//!
//! A digest summarizes an entire key/value store compactly enough to ship
//! in one message. Keys are sorted and split into contiguous ranges, each
//! range's content is fingerprinted, and a single root hash over the range
//! hashes decides whether two stores differ at all.
//!
//! The hash is a fingerprint for change detection, not a security
//! primitive; it is swappable behind [`HashFn`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

/// Pluggable fingerprint function: bytes in, lowercase hex out.
pub type HashFn = fn(&[u8]) -> String;

/// Default fingerprint: SHA-256, hex encoded.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Fingerprint of one contiguous key range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigestRange {
    /// First key in the range (inclusive).
    pub start_key: String,
    /// Last key in the range (inclusive).
    pub end_key: String,
    /// Content hash over the range's keys and serialized values.
    pub hash: String,
    /// Number of entries in the range.
    pub count: usize,
}

/// A compact fingerprint of a node's entire store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateDigest {
    /// Node the digest describes.
    pub node: Uuid,
    /// Total number of entries in the store.
    pub entry_count: usize,
    /// Ordered range fingerprints.
    pub ranges: Vec<DigestRange>,
    /// Root hash over the ordered range hashes.
    pub root: String,
}

/// Outcome of comparing a local digest against a remote one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DigestComparison {
    /// Whether any reconciliation is needed at all.
    pub needs_sync: bool,
    /// Remote ranges whose start key is unknown locally.
    pub missing_ranges: Vec<DigestRange>,
    /// Remote ranges present locally with a different hash.
    pub conflict_ranges: Vec<DigestRange>,
}

/// Build a digest over `entries` as (key, serialized value) pairs.
///
/// Keys are sorted, split into at most `range_count` contiguous chunks
/// (the last chunk may be smaller), and each chunk is fingerprinted over
/// its keys and values. With `merkle` set the root is a Merkle root over
/// the range hashes; otherwise it is a flat hash of their concatenation.
#[must_use]
pub fn build_digest(
    node: Uuid,
    entries: &[(String, Vec<u8>)],
    range_count: usize,
    merkle: bool,
    hash: HashFn,
) -> StateDigest {
    let mut sorted: Vec<&(String, Vec<u8>)> = entries.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let range_count = range_count.max(1);
    let chunk_size = sorted.len().div_ceil(range_count).max(1);

    let mut ranges = Vec::new();
    for chunk in sorted.chunks(chunk_size) {
        let mut content = Vec::new();
        for (key, value) in chunk {
            content.extend_from_slice(key.as_bytes());
            content.push(0);
            content.extend_from_slice(value);
            content.push(0);
        }
        ranges.push(DigestRange {
            start_key: chunk[0].0.clone(),
            end_key: chunk[chunk.len() - 1].0.clone(),
            hash: hash(&content),
            count: chunk.len(),
        });
    }

    let range_hashes: Vec<String> = ranges.iter().map(|r| r.hash.clone()).collect();
    let root = if merkle {
        merkle_root(&range_hashes, hash)
    } else {
        flat_root(&range_hashes, hash)
    };

    StateDigest {
        node,
        entry_count: sorted.len(),
        ranges,
        root,
    }
}

/// Merkle root over an ordered list of hashes.
///
/// Adjacent hashes are paired and hashed together, duplicating the last
/// element when the count is odd, until one hash remains. An empty list
/// yields the well-known empty root.
#[must_use]
pub fn merkle_root(hashes: &[String], hash: HashFn) -> String {
    if hashes.is_empty() {
        return empty_root(hash);
    }

    let mut level: Vec<String> = hashes.to_vec();
    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = &pair[0];
            let right = pair.get(1).unwrap_or(left);
            next.push(hash(format!("{left}{right}").as_bytes()));
        }
        level = next;
    }
    level.remove(0)
}

/// Flat root: one hash over the concatenation of all range hashes.
#[must_use]
pub fn flat_root(hashes: &[String], hash: HashFn) -> String {
    if hashes.is_empty() {
        return empty_root(hash);
    }
    hash(hashes.concat().as_bytes())
}

/// The root of an empty store.
#[must_use]
pub fn empty_root(hash: HashFn) -> String {
    hash(b"")
}

/// Compare a local digest against a remote one.
///
/// Identical roots mean the stores hold identical content and no sync is
/// needed. Otherwise remote ranges are indexed by start key: unknown start
/// keys are missing, known start keys with differing hashes conflict.
#[must_use]
pub fn compare_digests(local: &StateDigest, remote: &StateDigest) -> DigestComparison {
    if local.root == remote.root {
        return DigestComparison::default();
    }

    let local_by_start: HashMap<&str, &DigestRange> = local
        .ranges
        .iter()
        .map(|range| (range.start_key.as_str(), range))
        .collect();

    let mut missing = Vec::new();
    let mut conflicting = Vec::new();
    for range in &remote.ranges {
        match local_by_start.get(range.start_key.as_str()) {
            None => missing.push(range.clone()),
            Some(ours) if ours.hash != range.hash => conflicting.push(range.clone()),
            Some(_) => {}
        }
    }

    DigestComparison {
        needs_sync: true,
        missing_ranges: missing,
        conflict_ranges: conflicting,
    }
}
