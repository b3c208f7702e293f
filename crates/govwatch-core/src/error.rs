//! Error types for govwatch

use thiserror::Error;

/// Result type alias using govwatch's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for govwatch operations
#[derive(Error, Debug)]
pub enum Error {
    /// Limit or deployment status fetch failed; the current tick continues with partial data
    #[error("Fetch failed: {0}")]
    TransientFetch(String),

    /// Configuration error (invalid thresholds, missing channel settings, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The external process exited unsuccessfully
    #[error("Process exited with code {code:?}: {stderr}")]
    TerminalProcess {
        /// Exit code, `None` when killed by a signal
        code: Option<i32>,
        /// Captured standard error
        stderr: String,
    },

    /// A single notification channel could not deliver an alert
    #[error("Delivery via {channel} failed: {reason}")]
    ChannelDelivery {
        /// Channel name
        channel: String,
        /// Failure description
        reason: String,
    },

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a transient fetch error
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientFetch(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a channel delivery error
    pub fn delivery(channel: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ChannelDelivery {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the error only affects the current polling tick
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFetch(_) | Self::Http(_))
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
