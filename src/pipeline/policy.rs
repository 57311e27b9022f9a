//! Keyword / stop-word policy matcher.
//!
//! Pure, case-insensitive substring matching:
//! - empty text or a bare media tag (`[photo]`) never matches
//! - a leading media tag is stripped before matching
//! - any stop-word vetoes the message before keywords are looked at
//! - compound keywords (`sell+iphone`) need every part present, in any order

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::store::{Keyword, StopWord};

static MEDIA_ONLY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[\w+\]$").expect("valid regex"));

static MEDIA_WITH_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[\w+\]\s+.+").expect("valid regex"));

static MEDIA_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[\w+\]\s+").expect("valid regex"));

/// A keyword reduced to its lower-cased parts.
#[derive(Debug, Clone)]
struct CompiledKeyword {
    text: String,
    parts: Vec<String>,
}

/// Active keyword/stop-word set, lower-cased once per sweep.
#[derive(Debug, Clone, Default)]
pub struct Policy {
    keywords: Vec<CompiledKeyword>,
    stopwords: Vec<String>,
}

impl Policy {
    /// Build from a configuration snapshot. Inactive and blank entries are dropped.
    pub fn new(keywords: &[Keyword], stopwords: &[StopWord]) -> Self {
        let keywords = keywords
            .iter()
            .filter(|k| k.active)
            .map(|k| CompiledKeyword {
                text: k.text.clone(),
                parts: k.parts(),
            })
            .filter(|k| !k.parts.is_empty())
            .collect();

        let stopwords = stopwords
            .iter()
            .filter(|s| s.active)
            .map(|s| s.text.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            keywords,
            stopwords,
        }
    }

    pub fn keyword_count(&self) -> usize {
        self.keywords.len()
    }

    /// Whether `text` should be forwarded.
    pub fn matches(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }

        if MEDIA_ONLY.is_match(text) {
            debug!(text, "Media without text, skipping keyword check");
            return false;
        }

        let body = if MEDIA_WITH_TEXT.is_match(text) {
            MEDIA_PREFIX.replace(text, "")
        } else {
            text.into()
        };
        let lower = body.to_lowercase();

        if let Some(stop) = self.stopwords.iter().find(|s| lower.contains(s.as_str())) {
            debug!(stopword = %stop, "Stop-word found");
            return false;
        }

        match self
            .keywords
            .iter()
            .find(|k| k.parts.iter().all(|p| lower.contains(p.as_str())))
        {
            Some(keyword) => {
                debug!(keyword = %keyword.text, "Keyword matched");
                true
            }
            None => false,
        }
    }
}

/// One-shot form of [`Policy::matches`].
pub fn matches(text: Option<&str>, keywords: &[Keyword], stopwords: &[StopWord]) -> bool {
    text.is_some_and(|t| Policy::new(keywords, stopwords).matches(t))
}
