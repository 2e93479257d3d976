//! Protocol messages for anti-entropy reconciliation.
//!
//! Every message shares one envelope: kind, source and target node,
//! session id, send timestamp, and the sender's vector clock snapshot.
//! Messages travel as CBOR; the transport is the caller's concern.

use crate::digest::StateDigest;
use peersync_core::VectorClock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The five message kinds of the reconciliation protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    /// Opening digest exchange.
    Digest,
    /// Request for the entries behind diverging ranges.
    Request,
    /// Entries answering a request.
    Response,
    /// Unsolicited entries, outside the gossip cycle.
    Push,
    /// Terminal acknowledgement.
    Ack,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Digest => "digest",
            Self::Request => "request",
            Self::Response => "response",
            Self::Push => "push",
            Self::Ack => "ack",
        };
        write!(f, "{name}")
    }
}

/// One replicated entry on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEntry {
    /// The logical key.
    pub key: String,
    /// The replicated value.
    pub value: serde_json::Value,
    /// Causal history of the entry.
    pub clock: VectorClock,
    /// Wall-clock milliseconds of the last write.
    pub timestamp_ms: u64,
    /// Node that authored the current value.
    pub writer: Uuid,
}

/// Bounds of one diverging key range, inclusive on both ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRange {
    /// First key of the range.
    pub start_key: String,
    /// Last key of the range.
    pub end_key: String,
}

/// Kind-specific message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MessagePayload {
    /// The sender's full state digest.
    Digest {
        /// Digest of the sender's store.
        digest: StateDigest,
    },
    /// Keys and ranges the sender wants entries for.
    Request {
        /// Every key the requester holds inside a flagged range.
        keys: Vec<String>,
        /// Bounds of the flagged ranges, so the responder can return keys
        /// the requester does not know exist.
        ranges: Vec<KeyRange>,
        /// The requester's own digest, for the responder's comparison.
        digest: StateDigest,
    },
    /// Entries answering a request.
    Response {
        /// Entries the requester was missing or held stale.
        entries: Vec<SyncEntry>,
    },
    /// Unsolicited entries for eager broadcast.
    Push {
        /// Entries to merge.
        entries: Vec<SyncEntry>,
    },
    /// Terminal acknowledgement.
    Ack {
        /// Entries the sender applied during this session.
        entries_applied: u64,
    },
}

impl MessagePayload {
    /// The kind tag matching this payload.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Digest { .. } => MessageKind::Digest,
            Self::Request { .. } => MessageKind::Request,
            Self::Response { .. } => MessageKind::Response,
            Self::Push { .. } => MessageKind::Push,
            Self::Ack { .. } => MessageKind::Ack,
        }
    }
}

/// The protocol envelope shared by every message kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    /// Sending node.
    pub source: Uuid,
    /// Receiving node.
    pub target: Uuid,
    /// Session this message belongs to.
    pub session_id: Uuid,
    /// Wall-clock milliseconds at send time.
    pub timestamp_ms: u64,
    /// Sender's vector clock snapshot.
    pub vector_clock: VectorClock,
    /// Kind-specific body.
    pub payload: MessagePayload,
}

impl SyncMessage {
    /// Assemble an envelope.
    #[must_use]
    pub fn new(
        source: Uuid,
        target: Uuid,
        session_id: Uuid,
        timestamp_ms: u64,
        vector_clock: VectorClock,
        payload: MessagePayload,
    ) -> Self {
        Self {
            source,
            target,
            session_id,
            timestamp_ms,
            vector_clock,
            payload,
        }
    }

    /// The kind of this message.
    #[must_use]
    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Serialize to CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_cbor(&self) -> Result<Vec<u8>, MessageError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| MessageError::Serialize(e.to_string()))?;
        Ok(bytes)
    }

    /// Deserialize from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, MessageError> {
        ciborium::from_reader(bytes).map_err(|e| MessageError::Deserialize(e.to_string()))
    }
}

/// Errors for message serialization/deserialization.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MessageError {
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialize(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::{build_digest, sha256_hex};

    fn node(n: u8) -> Uuid {
        Uuid::from_bytes([n; 16])
    }

    fn sample_digest() -> StateDigest {
        let entries = vec![
            ("a".to_string(), b"1".to_vec()),
            ("b".to_string(), b"2".to_vec()),
        ];
        build_digest(node(1), &entries, 2, true, sha256_hex)
    }

    #[test]
    fn digest_message_cbor_roundtrip() {
        let mut clock = VectorClock::new();
        clock.increment(node(1));

        let message = SyncMessage::new(
            node(1),
            node(2),
            Uuid::new_v4(),
            1_704_067_200_000,
            clock,
            MessagePayload::Digest {
                digest: sample_digest(),
            },
        );

        let bytes = message.to_cbor().unwrap();
        let decoded = SyncMessage::from_cbor(&bytes).unwrap();

        assert_eq!(decoded, message);
        assert_eq!(decoded.kind(), MessageKind::Digest);
    }

    #[test]
    fn response_message_cbor_roundtrip() {
        let entry = SyncEntry {
            key: "sensor/1".to_string(),
            value: serde_json::json!({"temp": 21.5}),
            clock: VectorClock::new(),
            timestamp_ms: 100,
            writer: node(2),
        };

        let message = SyncMessage::new(
            node(2),
            node(1),
            Uuid::new_v4(),
            100,
            VectorClock::new(),
            MessagePayload::Response {
                entries: vec![entry],
            },
        );

        let decoded = SyncMessage::from_cbor(&message.to_cbor().unwrap()).unwrap();
        assert_eq!(decoded, message);
        assert_eq!(decoded.kind(), MessageKind::Response);
    }

    #[test]
    fn malformed_bytes_are_an_error() {
        assert!(SyncMessage::from_cbor(&[0xff, 0x00, 0x12]).is_err());
    }
}
