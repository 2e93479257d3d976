//! Anti-entropy session lifecycle.
//!
//! A session is the ephemeral record of one gossip exchange with a peer.
//! It starts active and ends completed, failed, or timed out; terminal
//! sessions are retained for statistics until pruned.

use std::collections::HashMap;
use uuid::Uuid;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// The exchange is in progress.
    Active,
    /// The exchange finished normally.
    Completed,
    /// The exchange failed.
    Failed,
    /// The session saw no activity within the timeout window.
    TimedOut,
}

/// One gossip exchange with a peer.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session identifier.
    pub id: Uuid,
    /// The peer this session talks to.
    pub peer: Uuid,
    /// Current lifecycle state.
    pub status: SessionStatus,
    /// Wall-clock milliseconds at creation.
    pub started_at_ms: u64,
    /// Wall-clock milliseconds of the last processed message.
    pub last_activity_ms: u64,
    /// Messages processed by this session.
    pub messages_exchanged: u64,
    /// Entries merged during this session.
    pub entries_synced: u64,
}

impl Session {
    /// Open a new active session with `peer`.
    #[must_use]
    pub fn open(peer: Uuid, now_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            status: SessionStatus::Active,
            started_at_ms: now_ms,
            last_activity_ms: now_ms,
            messages_exchanged: 0,
            entries_synced: 0,
        }
    }

    /// Whether the session is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// Record activity on this session.
    pub fn touch(&mut self, now_ms: u64) {
        self.last_activity_ms = now_ms;
        self.messages_exchanged += 1;
    }
}

/// Cumulative session statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Sessions opened since startup.
    pub total: u64,
    /// Sessions that completed normally.
    pub completed: u64,
    /// Sessions that failed or timed out.
    pub failed: u64,
    /// Entries merged across all sessions.
    pub entries_synced: u64,
}

/// The table of sessions, at most one active per peer.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<Uuid, Session>,
    stats: SessionStats,
}

impl SessionTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently active sessions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.sessions.values().filter(|s| s.is_active()).count()
    }

    /// Whether an active session with `peer` exists.
    #[must_use]
    pub fn has_active_with(&self, peer: Uuid) -> bool {
        self.active_with(peer).is_some()
    }

    /// The id of the active session with `peer`, if one exists.
    #[must_use]
    pub fn active_with(&self, peer: Uuid) -> Option<Uuid> {
        self.sessions
            .values()
            .find(|s| s.peer == peer && s.is_active())
            .map(|s| s.id)
    }

    /// Open a session with `peer` and return its id.
    pub fn open(&mut self, peer: Uuid, now_ms: u64) -> Uuid {
        let session = Session::open(peer, now_ms);
        let id = session.id;
        self.sessions.insert(id, session);
        self.stats.total += 1;
        id
    }

    /// Adopt a session initiated by a remote peer under its id.
    pub fn adopt(&mut self, id: Uuid, peer: Uuid, now_ms: u64) -> &mut Session {
        if !self.sessions.contains_key(&id) {
            self.stats.total += 1;
        }
        self.sessions.entry(id).or_insert_with(|| Session {
            id,
            ..Session::open(peer, now_ms)
        })
    }

    /// Look up a session.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Look up a session mutably.
    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    /// Mark a session completed if it is still active.
    ///
    /// Returns the session snapshot when the transition happened.
    pub fn complete(&mut self, id: Uuid) -> Option<Session> {
        let session = self.sessions.get_mut(&id)?;
        if !session.is_active() {
            return None;
        }
        session.status = SessionStatus::Completed;
        self.stats.completed += 1;
        self.stats.entries_synced += session.entries_synced;
        Some(session.clone())
    }

    /// Transition every quiet active session to timed out.
    ///
    /// A session transitions at most once; the returned snapshots are the
    /// sessions that transitioned during this sweep.
    pub fn sweep_timeouts(&mut self, now_ms: u64, timeout_ms: u64) -> Vec<Session> {
        let mut timed_out = Vec::new();
        for session in self.sessions.values_mut() {
            if session.is_active() && now_ms.saturating_sub(session.last_activity_ms) > timeout_ms {
                session.status = SessionStatus::TimedOut;
                self.stats.failed += 1;
                timed_out.push(session.clone());
            }
        }
        timed_out
    }

    /// Drop terminal sessions, keeping the statistics.
    pub fn prune(&mut self) {
        self.sessions.retain(|_, session| session.is_active());
    }

    /// Cumulative statistics.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u8) -> Uuid {
        Uuid::from_bytes([n; 16])
    }

    #[test]
    fn open_and_complete() {
        let mut table = SessionTable::new();
        let id = table.open(peer(1), 1000);

        assert_eq!(table.active_count(), 1);
        assert!(table.has_active_with(peer(1)));

        let completed = table.complete(id).unwrap();
        assert_eq!(completed.status, SessionStatus::Completed);
        assert_eq!(table.active_count(), 0);
    }

    #[test]
    fn complete_is_single_shot() {
        let mut table = SessionTable::new();
        let id = table.open(peer(1), 1000);

        assert!(table.complete(id).is_some());
        // A duplicate ack must not re-complete the session.
        assert!(table.complete(id).is_none());
        assert_eq!(table.stats().completed, 1);
    }

    #[test]
    fn sweep_times_out_quiet_sessions_once() {
        let mut table = SessionTable::new();
        let id = table.open(peer(1), 1000);

        let first = table.sweep_timeouts(40_000, 30_000);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].id, id);

        // The session already transitioned; a second sweep is silent.
        let second = table.sweep_timeouts(80_000, 30_000);
        assert!(second.is_empty());
        assert_eq!(table.stats().failed, 1);
    }

    #[test]
    fn active_session_survives_sweep_after_touch() {
        let mut table = SessionTable::new();
        let id = table.open(peer(1), 1000);
        table.get_mut(id).unwrap().touch(25_000);

        let swept = table.sweep_timeouts(40_000, 30_000);
        assert!(swept.is_empty());
        assert!(table.get(id).unwrap().is_active());
    }

    #[test]
    fn adopt_is_idempotent_per_id() {
        let mut table = SessionTable::new();
        let id = Uuid::new_v4();
        table.adopt(id, peer(2), 1000).touch(1000);
        table.adopt(id, peer(2), 2000).touch(2000);

        assert_eq!(table.active_count(), 1);
        assert_eq!(table.get(id).unwrap().messages_exchanged, 2);
    }

    #[test]
    fn prune_keeps_active_sessions() {
        let mut table = SessionTable::new();
        let done = table.open(peer(1), 1000);
        let live = table.open(peer(2), 1000);
        table.complete(done);

        table.prune();
        assert!(table.get(done).is_none());
        assert!(table.get(live).is_some());
        assert_eq!(table.stats().total, 2);
    }
}
