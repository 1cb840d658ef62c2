//! Error types for the tools crate.
//!
//! Validation problems are not errors here: they are data
//! ([`ValidationError`](crate::schema::ValidationError)) carried inside a
//! [`ToolOutcome`](crate::invoker::ToolOutcome). Only transport-level
//! failures are represented as an error type.

use std::fmt;
use std::time::Duration;

/// Errors from the remote tool transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Could not reach the remote endpoint.
    ConnectionFailed { details: String },
    /// The endpoint answered with an unexpected HTTP status.
    HttpStatus { status: u16, body: String },
    /// The response could not be understood.
    Protocol { details: String },
    /// The remote side returned a JSON-RPC error.
    Remote { code: i64, message: String },
    /// The endpoint did not answer within the deadline.
    TimedOut { after: Duration },
    /// The connection was already released.
    Closed,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed { details } => {
                write!(f, "failed to connect to tool server: {details}")
            }
            Self::HttpStatus { status, body } => {
                write!(f, "tool server returned HTTP {status}: {body}")
            }
            Self::Protocol { details } => write!(f, "tool protocol error: {details}"),
            Self::Remote { code, message } => {
                write!(f, "tool server error {code}: {message}")
            }
            Self::TimedOut { after } => {
                write!(f, "tool server did not respond within {}s", after.as_secs_f64())
            }
            Self::Closed => write!(f, "tool connection is closed"),
        }
    }
}

impl std::error::Error for TransportError {}
