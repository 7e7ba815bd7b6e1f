//! Transport Configuration
//!
//! Settings for the single socket connection and the tracked-operation
//! poller. Request-level settings (user agent, credentials) live in
//! [`crate::config::RequestSettings`] because they can change at runtime.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Well-known path of the snapd socket
pub const DEFAULT_SOCKET_PATH: &str = "/run/snapd.socket";

/// Placeholder `Host` header value; there is no DNS host behind a Unix socket
pub const DEFAULT_HOST: &str = "snapd";

/// Bytes read from the socket per readable event
pub const DEFAULT_READ_CHUNK_SIZE: usize = 1024;

/// Interval between status polls of a tracked operation
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Transport configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path of the snapd Unix socket
    pub socket_path: PathBuf,

    /// Value sent in the `Host` header
    pub host: String,

    /// Bytes read from the socket per readable event
    pub read_chunk_size: usize,

    /// Interval between status polls in milliseconds
    pub poll_interval_ms: u64,

    /// Consecutive transport failures tolerated while polling one operation
    ///
    /// When exceeded the tracked request completes with the last transport
    /// error instead of polling forever.
    pub max_poll_failures: u32,

    /// Capacity of the command channel between client handles and the driver
    pub command_capacity: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            host: DEFAULT_HOST.to_string(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_poll_failures: 50,
            command_capacity: 64,
        }
    }
}

impl TransportConfig {
    /// Configuration for a specific socket path, everything else default
    pub fn for_socket(path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: path.into(),
            ..Default::default()
        }
    }

    /// Interval between status polls
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Get the default socket path
#[must_use]
pub fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}
