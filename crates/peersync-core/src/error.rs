//! Error types for CRDT operations.

/// Errors raised by CRDT mutators and registry lookups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CrdtError {
    /// A counter mutator received a negative amount.
    #[error("invalid amount {amount} for {operation}: must be a non-negative integer")]
    InvalidAmount {
        /// The rejected amount, as supplied by the caller.
        amount: i64,
        /// The operation that rejected it ("increment" or "decrement").
        operation: &'static str,
    },
    /// A CRDT kind string could not be parsed.
    #[error("unknown CRDT kind '{0}'")]
    UnknownKind(String),
}
