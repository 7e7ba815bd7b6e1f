//! Client Configuration
//!
//! Loads [`ClientConfig`] from a TOML file at
//! `$XDG_CONFIG_HOME/snapd-client/client.toml`, environment variables and
//! command-line overrides.
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments (applied by the caller through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [transport]
//! socket_path = "/run/snapd.socket"
//! poll_interval_ms = 100
//! max_poll_failures = 50
//!
//! [request]
//! user_agent = "my-tool/1.0"
//! allow_interaction = true
//! accept_language = "en-gb, en;q=0.9"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::AuthData;
use crate::locale;
use crate::transport::config::TransportConfig;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// Request Settings
// =============================================================================

/// Default `User-Agent` header value
#[must_use]
pub fn default_user_agent() -> String {
    format!("snapd-client/{}", env!("CARGO_PKG_VERSION"))
}

/// Per-request header settings
///
/// Shared between a [`crate::SnapdClient`] and its driver; changes apply to
/// requests serialized after the change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestSettings {
    /// `User-Agent` header; omitted when `None`
    pub user_agent: Option<String>,

    /// Send `X-Allow-Interaction: true` so snapd may prompt for authorization
    pub allow_interaction: bool,

    /// Fixed `Accept-Language` value; derived from the locale when `None`
    pub accept_language: Option<String>,

    /// Credentials for the `Authorization` header
    pub auth: Option<AuthData>,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            user_agent: Some(default_user_agent()),
            allow_interaction: false,
            accept_language: None,
            auth: None,
        }
    }
}

impl RequestSettings {
    /// Value of the `Accept-Language` header
    #[must_use]
    pub fn accept_language(&self) -> String {
        match self.accept_language {
            Some(ref value) => value.clone(),
            None => locale::accept_languages(),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Transport section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportToml {
    /// Path of the snapd socket
    pub socket_path: Option<String>,

    /// `Host` header value
    pub host: Option<String>,

    /// Bytes read per readable event
    pub read_chunk_size: Option<usize>,

    /// Poll interval for tracked operations in milliseconds
    pub poll_interval_ms: Option<u64>,

    /// Consecutive transport failures tolerated while polling
    pub max_poll_failures: Option<u32>,

    /// Command channel capacity
    pub command_capacity: Option<usize>,
}

/// Request section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestToml {
    /// `User-Agent` header; an empty string disables the header
    pub user_agent: Option<String>,

    /// Send `X-Allow-Interaction: true`
    pub allow_interaction: Option<bool>,

    /// Fixed `Accept-Language` value
    pub accept_language: Option<String>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// Transport configuration section
    pub transport: TransportToml,

    /// Request configuration section
    pub request: RequestToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Complete client configuration
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Socket and poller settings
    pub transport: TransportConfig,

    /// Initial request header settings
    pub request: RequestSettings,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            request: RequestSettings::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ClientConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check values that would make the transport unusable
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError("socket_path is empty".into()));
        }
        if self.transport.read_chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "read_chunk_size must be positive".into(),
            ));
        }
        if self.transport.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poll_interval_ms must be positive".into(),
            ));
        }
        if self.transport.command_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "command_capacity must be positive".into(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/snapd-client/client.toml` or
/// `~/.config/snapd-client/client.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("snapd-client").join("client.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or the
/// result fails validation. A missing config file is not an error.
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then the process environment
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or the result fails validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ClientConfig, ConfigError> {
    load_config_with_env(path, |name| std::env::var(name).ok())
}

/// Load configuration with an explicit environment lookup
///
/// # Errors
///
/// Same as [`load_config_from_path`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<ClientConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ClientConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ClientToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);
    config.validate()?;

    Ok(config)
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_flag(value: &str) -> bool {
    value != "0" && !value.eq_ignore_ascii_case("false") && !value.is_empty()
}

fn apply_toml_config(config: &mut ClientConfig, toml: &ClientToml) {
    if let Some(ref path) = toml.transport.socket_path {
        config.transport.socket_path = PathBuf::from(path);
    }
    if let Some(ref host) = toml.transport.host {
        config.transport.host = host.clone();
    }
    if let Some(size) = toml.transport.read_chunk_size {
        config.transport.read_chunk_size = size;
    }
    if let Some(interval) = toml.transport.poll_interval_ms {
        config.transport.poll_interval_ms = interval;
    }
    if let Some(max) = toml.transport.max_poll_failures {
        config.transport.max_poll_failures = max;
    }
    if let Some(capacity) = toml.transport.command_capacity {
        config.transport.command_capacity = capacity;
    }

    if let Some(ref agent) = toml.request.user_agent {
        config.request.user_agent = non_empty(agent);
    }
    if let Some(allow) = toml.request.allow_interaction {
        config.request.allow_interaction = allow;
    }
    if let Some(ref language) = toml.request.accept_language {
        config.request.accept_language = non_empty(language);
    }
}

fn apply_env_config<F>(config: &mut ClientConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = env("SNAPD_SOCKET").filter(|p| !p.is_empty()) {
        config.transport.socket_path = PathBuf::from(path);
        config.source = ConfigSource::Env;
    }
    if let Some(agent) = env("SNAPD_USER_AGENT") {
        config.request.user_agent = non_empty(&agent);
        config.source = ConfigSource::Env;
    }
    if let Some(allow) = env("SNAPD_ALLOW_INTERACTION") {
        config.request.allow_interaction = parse_flag(&allow);
        config.source = ConfigSource::Env;
    }
    if let Some(interval) = env("SNAPD_POLL_INTERVAL_MS") {
        if let Ok(ms) = interval.parse::<u64>() {
            config.transport.poll_interval_ms = ms;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(language) = env("SNAPD_ACCEPT_LANGUAGE").filter(|l| !l.is_empty()) {
        config.request.accept_language = Some(language);
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides, applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Socket path override
    pub socket_path: Option<PathBuf>,

    /// User agent override
    pub user_agent: Option<String>,

    /// Allow-interaction override
    pub allow_interaction: Option<bool>,

    /// Poll interval override (milliseconds)
    pub poll_interval_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set socket path override
    #[must_use]
    pub fn with_socket_path(mut self, path: PathBuf) -> Self {
        self.socket_path = Some(path);
        self
    }

    /// Set user agent override
    #[must_use]
    pub fn with_user_agent(mut self, agent: String) -> Self {
        self.user_agent = Some(agent);
        self
    }

    /// Set allow-interaction override
    #[must_use]
    pub fn with_allow_interaction(mut self, allow: bool) -> Self {
        self.allow_interaction = Some(allow);
        self
    }

    /// Set poll interval override
    #[must_use]
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = Some(ms);
        self
    }

    /// Apply overrides to a configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if an override makes the
    /// configuration invalid.
    pub fn apply(&self, config: &mut ClientConfig) -> Result<(), ConfigError> {
        if self.socket_path.is_some()
            || self.user_agent.is_some()
            || self.allow_interaction.is_some()
            || self.poll_interval_ms.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref path) = self.socket_path {
            config.transport.socket_path = path.clone();
        }
        if let Some(ref agent) = self.user_agent {
            config.request.user_agent = non_empty(agent);
        }
        if let Some(allow) = self.allow_interaction {
            config.request.allow_interaction = allow;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.transport.poll_interval_ms = ms;
        }

        config.validate()
    }
}
