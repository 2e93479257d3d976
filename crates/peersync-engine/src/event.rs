//! Observable protocol events.
//!
//! Events are notifications for collaborators (metrics, UIs, tests); they
//! are not part of the convergence contract. They flow through a channel
//! handed out at construction, so there is no listener registry to manage.

use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A notification emitted by the protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// A session was opened with a peer.
    SessionStarted {
        /// Session identifier.
        session_id: Uuid,
        /// Peer the session talks to.
        peer: Uuid,
    },
    /// A session reached the completed state.
    SessionCompleted {
        /// Session identifier.
        session_id: Uuid,
        /// Peer the session talked to.
        peer: Uuid,
        /// Entries merged during the session.
        entries_synced: u64,
    },
    /// A session failed or timed out.
    SessionFailed {
        /// Session identifier.
        session_id: Uuid,
        /// Peer the session talked to.
        peer: Uuid,
        /// Human-readable failure reason.
        reason: String,
    },
    /// Progress within an active session.
    SyncProgress {
        /// Session identifier.
        session_id: Uuid,
        /// Entries merged so far.
        entries_synced: u64,
        /// Entries carried by the message being processed.
        entries_total: u64,
    },
    /// Two causally concurrent writes to one key were reduced to one.
    ConflictDetected {
        /// The contested key.
        key: String,
        /// Value that won the conflict.
        winner: Value,
        /// Node whose write won.
        winning_node: Uuid,
    },
    /// A remote entry was merged into the local store.
    EntrySynced {
        /// The merged key.
        key: String,
        /// Peer the entry came from.
        peer: Uuid,
    },
}

/// Sending half of the event stream.
///
/// Dropping the receiver quietly disables events; the protocol never
/// fails because nobody is listening.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<ProtocolEvent>,
}

impl EventSender {
    /// Create a connected sender/receiver pair.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProtocolEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Emit an event, ignoring a closed receiver.
    pub fn emit(&self, event: ProtocolEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event receiver dropped; event discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_arrive_in_order() {
        let (sender, mut rx) = EventSender::channel();
        let session_id = Uuid::new_v4();
        let peer = Uuid::new_v4();

        sender.emit(ProtocolEvent::SessionStarted { session_id, peer });
        sender.emit(ProtocolEvent::SessionCompleted {
            session_id,
            peer,
            entries_synced: 3,
        });

        assert_eq!(
            rx.try_recv().unwrap(),
            ProtocolEvent::SessionStarted { session_id, peer }
        );
        assert!(matches!(
            rx.try_recv().unwrap(),
            ProtocolEvent::SessionCompleted {
                entries_synced: 3,
                ..
            }
        ));
    }

    #[test]
    fn emit_survives_dropped_receiver() {
        let (sender, rx) = EventSender::channel();
        drop(rx);
        sender.emit(ProtocolEvent::EntrySynced {
            key: "k".to_string(),
            peer: Uuid::new_v4(),
        });
    }
}
