//! Global error types for the Aequitas realtime stack.
//!
//! All error categories across the workspace are unified into a single
//! `AqError` enum with conversions from underlying library errors.

use thiserror::Error;

/// Convenience type alias for Results using AqError.
pub type AqResult<T> = Result<T, AqError>;

/// Unified error type covering all error categories.
#[derive(Error, Debug)]
pub enum AqError {
    // -- Configuration errors --
    /// Failed to load, parse, or validate configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A channel name outside the fixed channel set.
    #[error("invalid channel: {0}")]
    InvalidChannel(String),

    // -- Transport errors --
    /// WebSocket connection error.
    #[error("socket error: {0}")]
    Socket(String),

    /// Opening a connection took longer than the configured timeout.
    #[error("connect timeout after {0}ms")]
    ConnectTimeout(u64),

    /// The connection went away while it was being used.
    #[error("socket disconnected")]
    SocketDisconnected,

    // -- Frame errors --
    /// An inbound frame could not be parsed into an envelope.
    #[error("frame parse error: {0}")]
    Parse(String),

    /// An envelope declared a different channel than the socket it arrived on.
    #[error("channel mismatch: expected {expected}, found {found}")]
    ChannelMismatch {
        /// Channel the frame arrived on.
        expected: String,
        /// Channel the envelope declared.
        found: String,
    },

    // -- Collaborator errors --
    /// Desktop or external notification failed.
    #[error("notification error: {0}")]
    Notification(String),

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for AqError {
    fn from(e: serde_json::Error) -> Self {
        AqError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for AqError {
    fn from(e: toml::de::Error) -> Self {
        AqError::Config(e.to_string())
    }
}

impl From<url::ParseError> for AqError {
    fn from(e: url::ParseError) -> Self {
        AqError::Config(format!("invalid endpoint url: {e}"))
    }
}

impl AqError {
    /// Whether this error came from the frame parser (malformed or misrouted frame).
    pub fn is_parse_error(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::ChannelMismatch { .. })
    }

    /// Whether this error is a configuration misuse surfaced to callers.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_) | Self::InvalidChannel(_))
    }
}
