//! # PeerSync Engine
//!
//! The anti-entropy gossip engine: a local entry store reconciled with
//! peers through digest comparison and a five-message exchange
//! (digest → request → response/push → ack).
//!
//! The engine never performs network I/O. Gossip rounds and message
//! handlers return the messages to send; a transport collaborator
//! delivers them and feeds replies back in, optionally through the
//! [`runtime::GossipDriver`] timer loop.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod event;
pub mod protocol;
pub mod runtime;
pub mod session;
pub mod store;

pub use config::{ConfigError, SyncConfig};
pub use event::{EventSender, ProtocolEvent};
pub use protocol::AntiEntropyProtocol;
pub use runtime::GossipDriver;
pub use session::{Session, SessionStats, SessionStatus, SessionTable};
pub use store::{EntryStore, MergeOutcome};
