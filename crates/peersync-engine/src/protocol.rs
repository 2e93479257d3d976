//! The anti-entropy gossip engine.
//!
//! One [`AntiEntropyProtocol`] instance per node. It owns the entry store
//! and the session table, generates and compares state digests, and drives
//! the digest → request → response → ack reconciliation exchange. It never
//! touches the network: gossip rounds and handlers return the messages to
//! send, and the transport collaborator delivers them.

use crate::config::{ConfigError, SyncConfig};
use crate::event::{EventSender, ProtocolEvent};
use crate::session::{SessionStats, SessionTable};
use crate::store::{EntryStore, MergeOutcome};
use parking_lot::Mutex;
use peersync_core::wall_clock_ms;
use peersync_proto::{
    build_digest, compare_digests, sha256_hex, DigestRange, HashFn, KeyRange, MessagePayload,
    StateDigest, SyncEntry, SyncMessage,
};
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use uuid::Uuid;

struct Inner {
    store: EntryStore,
    sessions: SessionTable,
}

/// The gossip engine for one node.
///
/// All state lives behind one lock, so every handler reads and writes the
/// store, the node clock, and the session table atomically. The transport
/// may call in from any number of threads.
pub struct AntiEntropyProtocol {
    config: SyncConfig,
    hash: HashFn,
    inner: Mutex<Inner>,
    events: EventSender,
}

impl AntiEntropyProtocol {
    /// Create a protocol instance and the receiving end of its event
    /// stream.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the configuration is invalid.
    pub fn new(
        config: SyncConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ProtocolEvent>), ConfigError> {
        Self::with_hash(config, sha256_hex)
    }

    /// Create a protocol instance with a custom fingerprint function.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the configuration is invalid.
    pub fn with_hash(
        config: SyncConfig,
        hash: HashFn,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ProtocolEvent>), ConfigError> {
        config.validate()?;
        let (events, receiver) = EventSender::channel();
        let protocol = Self {
            inner: Mutex::new(Inner {
                store: EntryStore::new(config.node_id),
                sessions: SessionTable::new(),
            }),
            hash,
            config,
            events,
        };
        Ok((protocol, receiver))
    }

    /// This node's identifier.
    #[must_use]
    pub fn node_id(&self) -> Uuid {
        self.config.node_id
    }

    /// Write a value into the local store.
    pub fn set(&self, key: &str, value: serde_json::Value) {
        let mut inner = self.inner.lock();
        inner.store.set(key, value, wall_clock_ms());
        tracing::debug!(node = %self.config.node_id, key, "Local write");
    }

    /// Delete a key from the local store. Returns `true` if it existed.
    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        let existed = inner.store.delete(key);
        tracing::debug!(node = %self.config.node_id, key, existed, "Local delete");
        existed
    }

    /// Read a value from the local store.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.lock().store.get(key).cloned()
    }

    /// Number of entries in the local store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().store.len()
    }

    /// Whether the local store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().store.is_empty()
    }

    /// Generate a digest of the current store.
    #[must_use]
    pub fn digest(&self) -> StateDigest {
        let inner = self.inner.lock();
        self.digest_of(&inner)
    }

    /// Number of currently active sessions.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.inner.lock().sessions.active_count()
    }

    /// Cumulative session statistics.
    #[must_use]
    pub fn session_stats(&self) -> SessionStats {
        self.inner.lock().sessions.stats()
    }

    /// Run one gossip round against the known peer set.
    ///
    /// Skips entirely when the active-session cap is reached. Otherwise
    /// picks up to `gossip_fanout` peers uniformly at random, excluding
    /// ourselves and peers with a live session, opens a session each, and
    /// returns the digest messages to send.
    #[must_use]
    pub fn gossip_round(&self, peers: &[Uuid]) -> Vec<SyncMessage> {
        let now = wall_clock_ms();
        let mut inner = self.inner.lock();

        if inner.sessions.active_count() >= self.config.max_concurrent_sessions {
            tracing::debug!(
                node = %self.config.node_id,
                active = inner.sessions.active_count(),
                "Session cap reached, skipping gossip round"
            );
            return Vec::new();
        }

        let candidates: Vec<Uuid> = peers
            .iter()
            .copied()
            .filter(|peer| *peer != self.config.node_id && !inner.sessions.has_active_with(*peer))
            .collect();

        let selected: Vec<Uuid> = candidates
            .choose_multiple(&mut rand::thread_rng(), self.config.gossip_fanout)
            .copied()
            .collect();

        let digest = self.digest_of(&inner);
        let clock = inner.store.clock();

        let mut messages = Vec::with_capacity(selected.len());
        for peer in selected {
            let session_id = inner.sessions.open(peer, now);
            self.events.emit(ProtocolEvent::SessionStarted {
                session_id,
                peer,
            });
            tracing::debug!(node = %self.config.node_id, %peer, %session_id, "Opening gossip session");
            messages.push(SyncMessage::new(
                self.config.node_id,
                peer,
                session_id,
                now,
                clock.clone(),
                MessagePayload::Digest {
                    digest: digest.clone(),
                },
            ));
        }
        messages
    }

    /// Build an unsolicited push carrying the whole local store.
    ///
    /// Joins the live session with the peer if one exists, otherwise
    /// opens one; the returned message is the caller's to deliver. Used
    /// for eager broadcast outside the gossip cycle.
    #[must_use]
    pub fn push_message(&self, peer: Uuid) -> SyncMessage {
        let now = wall_clock_ms();
        let mut inner = self.inner.lock();
        let session_id = match inner.sessions.active_with(peer) {
            Some(id) => id,
            None => {
                let id = inner.sessions.open(peer, now);
                self.events
                    .emit(ProtocolEvent::SessionStarted { session_id: id, peer });
                id
            }
        };
        SyncMessage::new(
            self.config.node_id,
            peer,
            session_id,
            now,
            inner.store.clock(),
            MessagePayload::Push {
                entries: inner.store.all_entries(),
            },
        )
    }

    /// Process one incoming message, returning the reply to send, if any.
    ///
    /// Handlers are defensive: malformed or contradictory payloads are
    /// skipped entry by entry, and stray messages for finished sessions
    /// are ignored rather than treated as errors.
    #[must_use]
    pub fn handle_message(&self, message: &SyncMessage) -> Option<SyncMessage> {
        if message.target != self.config.node_id {
            tracing::warn!(
                node = %self.config.node_id,
                target = %message.target,
                kind = %message.kind(),
                "Dropping message addressed to another node"
            );
            return None;
        }

        let now = wall_clock_ms();
        let mut inner = self.inner.lock();
        tracing::debug!(
            node = %self.config.node_id,
            source = %message.source,
            kind = %message.kind(),
            session_id = %message.session_id,
            "Handling message"
        );

        match &message.payload {
            MessagePayload::Digest { digest } => {
                self.touch_session(&mut inner, message, now);
                Some(self.handle_digest(&mut inner, message, digest, now))
            }
            MessagePayload::Request {
                keys,
                ranges,
                digest,
            } => {
                self.touch_session(&mut inner, message, now);
                Some(self.handle_request(&inner, message, keys, ranges, digest, now))
            }
            MessagePayload::Response { entries } => {
                self.touch_session(&mut inner, message, now);
                let applied = self.merge_entries(&mut inner, message, entries);
                if let Some(session) = inner.sessions.get_mut(message.session_id) {
                    session.entries_synced += applied;
                }
                self.complete_session(&mut inner, message.session_id);
                Some(self.reply(&inner, message, now, MessagePayload::Ack {
                    entries_applied: applied,
                }))
            }
            MessagePayload::Push { entries } => {
                self.touch_session(&mut inner, message, now);
                let applied = self.merge_entries(&mut inner, message, entries);
                if let Some(session) = inner.sessions.get_mut(message.session_id) {
                    session.entries_synced += applied;
                }
                self.complete_session(&mut inner, message.session_id);
                Some(self.reply(&inner, message, now, MessagePayload::Ack {
                    entries_applied: applied,
                }))
            }
            MessagePayload::Ack { .. } => {
                if let Some(session) = inner.sessions.get_mut(message.session_id) {
                    session.touch(now);
                }
                self.complete_session(&mut inner, message.session_id);
                None
            }
        }
    }

    /// Sweep for sessions with no activity inside the timeout window.
    ///
    /// Each quiet session transitions to timed out exactly once and emits
    /// exactly one failure event. Returns the number that transitioned.
    pub fn check_timeouts(&self, now_ms: u64) -> usize {
        let timeout_ms = u64::try_from(self.config.session_timeout.as_millis()).unwrap_or(u64::MAX);
        let mut inner = self.inner.lock();
        let timed_out = inner.sessions.sweep_timeouts(now_ms, timeout_ms);
        for session in &timed_out {
            tracing::warn!(
                node = %self.config.node_id,
                peer = %session.peer,
                session_id = %session.id,
                "Session timed out"
            );
            self.events.emit(ProtocolEvent::SessionFailed {
                session_id: session.id,
                peer: session.peer,
                reason: "session timeout".to_string(),
            });
        }
        timed_out.len()
    }

    /// Drop terminal sessions from the table, keeping the statistics.
    pub fn prune_sessions(&self) {
        self.inner.lock().sessions.prune();
    }

    fn digest_of(&self, inner: &Inner) -> StateDigest {
        build_digest(
            self.config.node_id,
            &inner.store.digest_entries(),
            self.config.digest_range_count,
            self.config.enable_merkle_tree,
            self.hash,
        )
    }

    fn reply(
        &self,
        inner: &Inner,
        message: &SyncMessage,
        now: u64,
        payload: MessagePayload,
    ) -> SyncMessage {
        SyncMessage::new(
            self.config.node_id,
            message.source,
            message.session_id,
            now,
            inner.store.clock(),
            payload,
        )
    }

    /// Refresh (or adopt) the session a message belongs to.
    fn touch_session(&self, inner: &mut Inner, message: &SyncMessage, now: u64) {
        let known = inner.sessions.get(message.session_id).is_some();
        let session = inner.sessions.adopt(message.session_id, message.source, now);
        session.touch(now);
        if !known {
            self.events.emit(ProtocolEvent::SessionStarted {
                session_id: message.session_id,
                peer: message.source,
            });
        }
    }

    fn complete_session(&self, inner: &mut Inner, session_id: Uuid) {
        if let Some(session) = inner.sessions.complete(session_id) {
            tracing::debug!(
                node = %self.config.node_id,
                peer = %session.peer,
                %session_id,
                entries_synced = session.entries_synced,
                "Session completed"
            );
            self.events.emit(ProtocolEvent::SessionCompleted {
                session_id,
                peer: session.peer,
                entries_synced: session.entries_synced,
            });
        }
    }

    /// Compare the remote digest against ours and answer with either an
    /// ack (converged) or a request for everything that diverges.
    fn handle_digest(
        &self,
        inner: &mut Inner,
        message: &SyncMessage,
        remote: &StateDigest,
        now: u64,
    ) -> SyncMessage {
        let local = self.digest_of(inner);
        let comparison = compare_digests(&local, remote);

        if !comparison.needs_sync {
            self.complete_session(inner, message.session_id);
            return self.reply(inner, message, now, MessagePayload::Ack { entries_applied: 0 });
        }

        let flagged: Vec<&DigestRange> = comparison
            .missing_ranges
            .iter()
            .chain(comparison.conflict_ranges.iter())
            .collect();

        // Request the full key set of each diverging range: every key we
        // hold inside the range bounds, plus the bounds themselves so the
        // responder can add keys we do not know exist.
        let mut keys: Vec<String> = Vec::new();
        let mut ranges: Vec<KeyRange> = Vec::new();
        for range in flagged {
            for entry in inner.store.entries_in_range(&range.start_key, &range.end_key) {
                keys.push(entry.key);
            }
            ranges.push(KeyRange {
                start_key: range.start_key.clone(),
                end_key: range.end_key.clone(),
            });
        }
        keys.sort();
        keys.dedup();

        tracing::debug!(
            node = %self.config.node_id,
            peer = %message.source,
            missing = comparison.missing_ranges.len(),
            conflicting = comparison.conflict_ranges.len(),
            "Digest diverged, requesting entries"
        );

        self.reply(
            inner,
            message,
            now,
            MessagePayload::Request {
                keys,
                ranges,
                digest: local,
            },
        )
    }

    /// Return entries for every named key and flagged range, plus the
    /// ranges the requester's digest shows it is missing entirely.
    fn handle_request(
        &self,
        inner: &Inner,
        message: &SyncMessage,
        keys: &[String],
        ranges: &[KeyRange],
        their_digest: &StateDigest,
        now: u64,
    ) -> SyncMessage {
        // BTreeMap keyed by entry key deduplicates the three sources.
        let mut entries: BTreeMap<String, SyncEntry> = BTreeMap::new();

        for entry in inner.store.entries_for_keys(keys) {
            entries.insert(entry.key.clone(), entry);
        }
        for range in ranges {
            for entry in inner.store.entries_in_range(&range.start_key, &range.end_key) {
                entries.insert(entry.key.clone(), entry);
            }
        }

        // Ranges of ours the requester's digest lacks cover the keys the
        // requester could not have asked for by name.
        let local = self.digest_of(inner);
        let their_view = compare_digests(their_digest, &local);
        for range in &their_view.missing_ranges {
            for entry in inner.store.entries_in_range(&range.start_key, &range.end_key) {
                entries.insert(entry.key.clone(), entry);
            }
        }

        tracing::debug!(
            node = %self.config.node_id,
            peer = %message.source,
            entries = entries.len(),
            "Answering entry request"
        );

        self.reply(
            inner,
            message,
            now,
            MessagePayload::Response {
                entries: entries.into_values().collect(),
            },
        )
    }

    /// Merge a batch of remote entries, one at a time, defensively.
    fn merge_entries(
        &self,
        inner: &mut Inner,
        message: &SyncMessage,
        entries: &[SyncEntry],
    ) -> u64 {
        let total = u64::try_from(entries.len()).unwrap_or(u64::MAX);
        let mut applied: u64 = 0;

        for entry in entries {
            if entry.key.is_empty() {
                tracing::warn!(
                    node = %self.config.node_id,
                    source = %message.source,
                    "Skipping entry with empty key"
                );
                continue;
            }
            match inner.store.merge_entry(entry) {
                MergeOutcome::Added | MergeOutcome::Updated => {
                    applied += 1;
                    self.events.emit(ProtocolEvent::EntrySynced {
                        key: entry.key.clone(),
                        peer: message.source,
                    });
                }
                MergeOutcome::Conflict {
                    remote_won,
                    winner,
                    winning_node,
                } => {
                    tracing::debug!(
                        node = %self.config.node_id,
                        key = %entry.key,
                        remote_won,
                        "Concurrent write resolved"
                    );
                    self.events.emit(ProtocolEvent::ConflictDetected {
                        key: entry.key.clone(),
                        winner,
                        winning_node,
                    });
                    if remote_won {
                        applied += 1;
                        self.events.emit(ProtocolEvent::EntrySynced {
                            key: entry.key.clone(),
                            peer: message.source,
                        });
                    }
                }
                MergeOutcome::KeptLocal => {}
            }
        }

        self.events.emit(ProtocolEvent::SyncProgress {
            session_id: message.session_id,
            entries_synced: applied,
            entries_total: total,
        });
        applied
    }
}
