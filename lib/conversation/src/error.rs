//! Error types for the conversation crate.

use std::fmt;

/// Errors from session store operations.
///
/// Any of these is fatal to the turn that triggered it: without a working
/// store, conversational continuity cannot be guaranteed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The database could not be opened or migrated.
    ConnectionFailed { details: String },
    /// A query failed.
    QueryFailed { details: String },
    /// A stored row could not be decoded.
    CorruptRecord { id: String, reason: String },
    /// A snapshot could not be serialized.
    SerializationFailed { reason: String },
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { details } => {
                write!(f, "failed to open session store: {details}")
            }
            Self::QueryFailed { details } => write!(f, "session store query failed: {details}"),
            Self::CorruptRecord { id, reason } => {
                write!(f, "corrupt session record '{id}': {reason}")
            }
            Self::SerializationFailed { reason } => {
                write!(f, "failed to serialize snapshot: {reason}")
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::QueryFailed {
            details: err.to_string(),
        }
    }
}
