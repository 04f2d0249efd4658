//! Server configuration.
//!
//! The configuration is loaded once at startup from a JSON file, validated,
//! and never mutated afterwards. Every connection session reads it through a
//! shared [`Arc`](std::sync::Arc) without locking.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors produced while loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// Process-wide server configuration.
///
/// # Examples
///
/// ```
/// use staticd::Config;
///
/// let config: Config = serde_json::from_str(
///     r#"{ "document_root": "/var/www/html", "port": 8080 }"#,
/// ).unwrap();
/// assert_eq!(config.port, 8080);
/// assert_eq!(config.timeout, 10);
/// assert!(!config.use_strong_etag);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// TCP port to listen on. Port `0` asks the OS for an ephemeral port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Absolute filesystem path all request paths are resolved under.
    pub document_root: PathBuf,

    /// Idle-read deadline in seconds, reset after every framed request.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Number of requests served on one connection before it is closed.
    #[serde(default = "default_max_requests")]
    pub max_requests_per_connection: u32,

    /// `true` hashes full file content per request (strong ETags); the
    /// default hashes mtime + path (weak ETags).
    #[serde(default)]
    pub use_strong_etag: bool,

    #[serde(default)]
    pub error_document_403: Option<PathBuf>,

    #[serde(default)]
    pub error_document_404: Option<PathBuf>,

    #[serde(default)]
    pub error_document_500: Option<PathBuf>,
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    10
}

fn default_max_requests() -> u32 {
    100
}

impl Config {
    /// Loads and validates the configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Read`] if the file cannot be read, [`ConfigError::Parse`]
    /// if it is not valid JSON for this shape, [`ConfigError::Invalid`] if a
    /// value fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the rest of the server relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.document_root.is_absolute() {
            return Err(ConfigError::Invalid("document_root must be an absolute path"));
        }
        if self.timeout == 0 {
            return Err(ConfigError::Invalid("timeout must be at least 1 second"));
        }
        if self.max_requests_per_connection == 0 {
            return Err(ConfigError::Invalid(
                "max_requests_per_connection must be at least 1",
            ));
        }
        Ok(())
    }

    /// The idle-read deadline as a [`Duration`].
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}
