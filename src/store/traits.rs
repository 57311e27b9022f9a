//! Store traits: configuration (channels, keywords, stop-words) and dedup markers.
//!
//! Both are implemented by `LibSqlBackend`; the pipeline only sees
//! `Arc<dyn ConfigStore>` / `Arc<dyn DedupStore>`.

use async_trait::async_trait;

use crate::error::DatabaseError;

/// A monitored source channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    /// Canonical identifier (numeric id or `@handle`), also the dedup key.
    pub id: String,
    /// Human-readable name.
    pub name: Option<String>,
    pub active: bool,
}

impl Channel {
    pub fn new(id: impl Into<String>, name: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.map(String::from),
            active: true,
        }
    }

    /// Name for logs and status output.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Separator that joins the parts of a compound keyword.
pub const COMPOUND_SEPARATOR: char = '+';

/// A keyword, possibly compound (`sell+iphone`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyword {
    pub text: String,
    pub active: bool,
}

impl Keyword {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            active: true,
        }
    }

    pub fn is_compound(&self) -> bool {
        self.text.contains(COMPOUND_SEPARATOR)
    }

    /// Lower-cased, trimmed parts; a simple keyword has exactly one part.
    ///
    /// Empty parts (`"sell+"`) are dropped.
    pub fn parts(&self) -> Vec<String> {
        self.text
            .split(COMPOUND_SEPARATOR)
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .collect()
    }
}

/// A stop-word. Any occurrence vetoes the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopWord {
    pub text: String,
    pub active: bool,
}

impl StopWord {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            active: true,
        }
    }
}

/// Configuration store. List operations return active entries only,
/// in insertion order.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn list_channels(&self) -> Result<Vec<Channel>, DatabaseError>;

    /// Insert a channel, or update the name and re-activate an existing one.
    async fn add_channel(&self, id: &str, name: Option<&str>) -> Result<(), DatabaseError>;

    /// Delete a channel. Returns whether it existed.
    async fn remove_channel(&self, id: &str) -> Result<bool, DatabaseError>;

    /// Mark a channel inactive without deleting it.
    async fn deactivate_channel(&self, id: &str) -> Result<(), DatabaseError>;

    async fn list_keywords(&self) -> Result<Vec<Keyword>, DatabaseError>;

    async fn add_keyword(&self, text: &str) -> Result<(), DatabaseError>;

    async fn remove_keyword(&self, text: &str) -> Result<bool, DatabaseError>;

    async fn list_stopwords(&self) -> Result<Vec<StopWord>, DatabaseError>;

    async fn add_stopword(&self, text: &str) -> Result<(), DatabaseError>;

    async fn remove_stopword(&self, text: &str) -> Result<bool, DatabaseError>;
}

/// Durable record of which (channel, message id) pairs have been evaluated.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn is_processed(&self, channel: &str, message_id: i64) -> Result<bool, DatabaseError>;

    /// Record a marker. Inserting an existing marker is a no-op.
    async fn mark_processed(&self, channel: &str, message_id: i64) -> Result<(), DatabaseError>;

    /// True iff no marker exists yet for `channel`.
    async fn first_run(&self, channel: &str) -> Result<bool, DatabaseError>;

    /// Highest marked message id for `channel`.
    async fn last_processed_id(&self, channel: &str) -> Result<Option<i64>, DatabaseError>;

    /// Delete markers for one channel, or all channels when `None`.
    /// Returns the number of markers removed.
    async fn reset(&self, channel: Option<&str>) -> Result<u64, DatabaseError>;
}
