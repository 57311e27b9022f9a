//! Upstream messaging client abstraction.
//!
//! The pipeline talks to the messaging provider only through
//! [`UpstreamClient`]; `TelegramUpstream` is the HTTP implementation.

pub mod telegram;

use std::fmt;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use crate::error::{ConfigError, UpstreamError};

pub use telegram::TelegramUpstream;

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:t|telegram)\.me/(?:(joinchat/)|s/)?([A-Za-z0-9_-]+)").expect("valid regex")
});

static HANDLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]{3,}$").expect("valid regex"));

/// A channel identifier in the canonical form the upstream expects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelRef {
    /// Numeric chat id (`-1001234567890`).
    Id(i64),
    /// Public handle, stored lowercase without the leading `@`. Invite
    /// hashes from `joinchat/` links keep their case.
    Handle(String),
}

impl ChannelRef {
    /// Parse a numeric id, `@handle`, bare handle, or `t.me` link.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ConfigError::InvalidChannel(raw.to_string()));
        }

        if let Some(caps) = LINK_RE.captures(raw) {
            let name = &caps[2];
            return Ok(Self::Handle(if caps.get(1).is_some() {
                name.to_string()
            } else {
                name.to_lowercase()
            }));
        }

        if let Some(handle) = raw.strip_prefix('@') {
            if handle.is_empty() || handle.contains(char::is_whitespace) {
                return Err(ConfigError::InvalidChannel(raw.to_string()));
            }
            return Ok(Self::Handle(handle.to_lowercase()));
        }

        if let Ok(id) = raw.parse::<i64>() {
            return Ok(Self::Id(id));
        }

        if HANDLE_RE.is_match(raw) {
            return Ok(Self::Handle(raw.to_lowercase()));
        }

        Err(ConfigError::InvalidChannel(raw.to_string()))
    }

    /// JSON form of the chat id for API calls.
    pub fn to_chat_id(&self) -> serde_json::Value {
        match self {
            Self::Id(id) => serde_json::json!(id),
            Self::Handle(handle) => serde_json::json!(format!("@{handle}")),
        }
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Handle(handle) => write!(f, "@{handle}"),
        }
    }
}

/// A resolved upstream chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub id: i64,
    pub title: Option<String>,
    pub username: Option<String>,
}

/// Media kinds the relay recognises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Photo,
    Video,
    Document,
    Audio,
    Voice,
    Poll,
}

impl MediaKind {
    /// Tag used in the bracketed prefix (`[photo]`).
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Document => "document",
            Self::Audio => "audio",
            Self::Voice => "voice",
            Self::Poll => "poll",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// One message as delivered by the upstream, before normalisation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    pub id: i64,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub media: Option<MediaKind>,
}

/// Authenticated upstream session.
///
/// Implementations signal throttling with [`UpstreamError::FloodWait`] and
/// permanent access loss with `Forbidden` / `NotFound`.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Resolve an identifier to a chat.
    async fn get_entity(&self, channel: &ChannelRef) -> Result<Entity, UpstreamError>;

    /// The most recent `limit` messages, newest first.
    async fn get_messages(
        &self,
        entity: &Entity,
        limit: usize,
    ) -> Result<Vec<RawMessage>, UpstreamError>;

    /// A single message by id; `None` if it no longer exists.
    async fn get_message(
        &self,
        entity: &Entity,
        message_id: i64,
    ) -> Result<Option<RawMessage>, UpstreamError>;

    /// Forward `message_id` from `source` into `target`.
    async fn forward_message(
        &self,
        target: &Entity,
        source: &Entity,
        message_id: i64,
    ) -> Result<(), UpstreamError>;
}
