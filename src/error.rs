//! Error types for the channel relay.

use std::time::Duration;

/// Top-level error type for the relay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid channel identifier: {0}")]
    InvalidChannel(String),

    #[error("{kind} must not be blank")]
    BlankEntry { kind: &'static str },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Errors raised by the upstream messaging client.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Provider-issued throttling: retry only after `seconds`.
    #[error("Flood wait: retry after {seconds}s")]
    FloodWait { seconds: u64 },

    #[error("Access forbidden: {0}")]
    Forbidden(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl UpstreamError {
    /// Whether this error means the channel can never be read again.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::Forbidden(_) | Self::NotFound(_))
    }

    /// The mandated wait for a flood-wait signal.
    pub fn flood_wait(&self) -> Option<Duration> {
        match self {
            Self::FloodWait { seconds } => Some(Duration::from_secs(*seconds)),
            _ => None,
        }
    }
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Permanent access failure; the driver deactivates the channel.
    #[error("Access to channel {channel} denied: {reason}")]
    AccessDenied { channel: String, reason: String },

    #[error("Channel fetch failed for {channel}: {source}")]
    ChannelFetch {
        channel: String,
        #[source]
        source: UpstreamError,
    },

    #[error("Forward of {channel}/{message_id} failed: {reason}")]
    Forward {
        channel: String,
        message_id: i64,
        reason: String,
    },

    #[error("Store unavailable: {0}")]
    Store(#[from] DatabaseError),

    #[error("Channel processing panicked: {0}")]
    Panicked(String),

    #[error("Cancelled")]
    Cancelled,
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;
