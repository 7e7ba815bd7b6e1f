//! Client Errors
//!
//! Every request submitted to the client completes exactly once, either with
//! its result or with one of these errors.
//!
//! # Propagation
//!
//! - Transport failures (`ConnectionFailed`, `WriteFailed`, `ReadFailed`) tear
//!   down the connection and fail every queued simple request on it. Tracked
//!   requests that already know their operation ID survive them.
//! - `ProtocolError`, `OperationFailed` and `Api` are per-request and never
//!   affect sibling requests.

use thiserror::Error;

/// Errors delivered to request completions
///
/// `Clone` so a single transport failure can be fanned out to every request
/// that was queued on the failed connection.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    /// The socket could not be created or connected
    #[error("Unable to connect snapd socket: {0}")]
    ConnectionFailed(String),

    /// Writing the request to the socket failed
    #[error("Failed to write to snapd: {0}")]
    WriteFailed(String),

    /// The connection was closed, errored, or delivered unparseable framing
    #[error("Failed to read from snapd: {0}")]
    ReadFailed(String),

    /// The caller cancelled a simple request
    #[error("Request cancelled")]
    Cancelled,

    /// The server sent a payload of an unexpected shape
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// A tracked operation finished with an error
    #[error("Operation failed: {message}")]
    OperationFailed {
        /// Error text reported in the terminal snapshot
        message: String,
    },

    /// The server answered with an error envelope
    #[error("snapd returned error {status_code}: {message}")]
    Api {
        /// HTTP status code of the response
        status_code: u16,
        /// Machine-readable error kind, when the server supplied one
        kind: Option<String>,
        /// Human-readable error message
        message: String,
    },

    /// The client was dropped or its driver task stopped
    #[error("Client has shut down")]
    Shutdown,
}

impl ClientError {
    /// Whether this error comes from the connection rather than the request
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed(_) | Self::WriteFailed(_) | Self::ReadFailed(_)
        )
    }

    /// Create a read failure for a connection the server closed
    #[must_use]
    pub fn connection_closed() -> Self {
        Self::ReadFailed("snapd connection closed".to_string())
    }
}
