//! Shared types for the relay pipeline.

use chrono::{DateTime, Utc};

use crate::upstream::{MediaKind, RawMessage};

// ── Message content ─────────────────────────────────────────────────

/// Normalised message body, produced once by the fetcher.
///
/// Downstream code matches on the variant and never looks at raw fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageContent {
    /// Nothing to evaluate (service message, sticker, ...).
    Empty,
    Text(String),
    /// Caption without recognised media.
    Caption(String),
    MediaOnly(MediaKind),
    MediaWithCaption(MediaKind, String),
}

impl MessageContent {
    /// Classify a raw upstream message. Primary text wins over caption.
    pub fn from_raw(raw: &RawMessage) -> Self {
        let text = raw.text.as_deref().filter(|t| !t.is_empty());
        let caption = raw.caption.as_deref().filter(|c| !c.is_empty());

        match (raw.media, text.or(caption)) {
            (Some(kind), Some(body)) => Self::MediaWithCaption(kind, body.to_string()),
            (Some(kind), None) => Self::MediaOnly(kind),
            (None, _) => match (text, caption) {
                (Some(t), _) => Self::Text(t.to_string()),
                (None, Some(c)) => Self::Caption(c.to_string()),
                (None, None) => Self::Empty,
            },
        }
    }

    /// Combined text fed to the policy matcher.
    ///
    /// Media messages carry a bracketed tag prefix: `[photo]` or
    /// `[photo] caption`.
    pub fn combined_text(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Text(t) | Self::Caption(t) => t.clone(),
            Self::MediaOnly(kind) => format!("[{kind}]"),
            Self::MediaWithCaption(kind, body) => {
                let tag = format!("[{kind}]");
                if body.starts_with(&tag) {
                    body.clone()
                } else {
                    format!("{tag} {body}")
                }
            }
        }
    }

    pub fn media(&self) -> Option<MediaKind> {
        match self {
            Self::MediaOnly(kind) | Self::MediaWithCaption(kind, _) => Some(*kind),
            _ => None,
        }
    }
}

// ── Message record ──────────────────────────────────────────────────

/// One fetched message, scoped to a single sweep. Only its id is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    /// Canonical source channel id.
    pub channel_id: String,
    /// Monotonic per channel.
    pub message_id: i64,
    pub content: MessageContent,
}

impl MessageRecord {
    pub fn from_raw(channel_id: &str, raw: &RawMessage) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            message_id: raw.id,
            content: MessageContent::from_raw(raw),
        }
    }

    pub fn text(&self) -> String {
        self.content.combined_text()
    }

    pub fn media_tag(&self) -> Option<&'static str> {
        self.content.media().map(|k| k.tag())
    }
}

// ── Outcomes ────────────────────────────────────────────────────────

/// Result of one forward attempt that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// Forwarded and marked processed.
    Forwarded,
    /// The message no longer exists upstream.
    Missing,
    /// Already marked by an earlier attempt; nothing was sent.
    AlreadyProcessed,
}

/// Per-channel counters for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelOutcome {
    /// Messages returned by the fetch.
    pub fetched: usize,
    /// Messages already marked before this sweep.
    pub already_seen: usize,
    pub forwarded: usize,
    /// Non-matching (or vanished) messages marked processed.
    pub skipped: usize,
    /// Processing stopped early on a forward failure.
    pub halted: bool,
}

/// Summary of a single sweep.
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Active channels in the snapshot.
    pub active_channels: usize,
    /// Channels chosen for this sweep (after the per-sweep cap).
    pub selected_channels: usize,
    /// Channels that completed without error.
    pub processed_channels: usize,
    pub failed_channels: usize,
    pub messages_evaluated: usize,
    pub forwarded: usize,
    pub skipped: usize,
    /// Channels deactivated on permanent access failure.
    pub deactivated: Vec<String>,
    /// The sweep was stopped before visiting every selected channel.
    pub aborted: bool,
}

impl SweepReport {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            active_channels: 0,
            selected_channels: 0,
            processed_channels: 0,
            failed_channels: 0,
            messages_evaluated: 0,
            forwarded: 0,
            skipped: 0,
            deactivated: Vec::new(),
            aborted: false,
        }
    }

    pub(crate) fn absorb(&mut self, outcome: &ChannelOutcome) {
        self.processed_channels += 1;
        self.messages_evaluated += outcome.forwarded + outcome.skipped;
        self.forwarded += outcome.forwarded;
        self.skipped += outcome.skipped;
    }

    pub(crate) fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

impl Default for SweepReport {
    fn default() -> Self {
        Self::new()
    }
}
