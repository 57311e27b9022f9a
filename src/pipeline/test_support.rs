//! In-process upstream used by the pipeline unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{DatabaseError, UpstreamError};
use crate::store::{Channel, ConfigStore, DedupStore, Keyword, LibSqlBackend, StopWord};
use crate::upstream::{ChannelRef, Entity, MediaKind, RawMessage, UpstreamClient};

#[derive(Default)]
struct FakeChannel {
    id: i64,
    /// Oldest first.
    messages: Vec<RawMessage>,
    forbidden: bool,
}

/// Scripted upstream: channels, queued flood waits, forward failures.
#[derive(Default)]
pub struct FakeUpstream {
    channels: Mutex<HashMap<String, FakeChannel>>,
    flood_waits: Mutex<VecDeque<u64>>,
    failing_forwards: Mutex<HashSet<i64>>,
    vanished: Mutex<HashSet<i64>>,
    panicking: Mutex<HashSet<i64>>,
    cancel_on_fetch: Mutex<Option<CancellationToken>>,
    /// Every upstream call in order, with the instant it arrived.
    pub calls: Mutex<Vec<(&'static str, Instant)>>,
    pub forwarded: Mutex<Vec<(i64, i64)>>,
    pub requested_limits: Mutex<Vec<usize>>,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel under its canonical id (`@name` or numeric).
    pub fn add_channel(&self, key: &str, entity_id: i64) {
        self.channels.lock().unwrap().insert(
            key.to_string(),
            FakeChannel {
                id: entity_id,
                ..Default::default()
            },
        );
    }

    pub fn post_text(&self, key: &str, id: i64, text: &str) {
        self.post(key, RawMessage {
            id,
            text: Some(text.to_string()),
            ..Default::default()
        });
    }

    pub fn post_media(&self, key: &str, id: i64, kind: MediaKind, caption: Option<&str>) {
        self.post(key, RawMessage {
            id,
            caption: caption.map(String::from),
            media: Some(kind),
            ..Default::default()
        });
    }

    pub fn post(&self, key: &str, message: RawMessage) {
        let mut channels = self.channels.lock().unwrap();
        let channel = channels.get_mut(key).expect("channel registered");
        channel.messages.push(message);
        channel.messages.sort_by_key(|m| m.id);
    }

    pub fn delete(&self, key: &str, id: i64) {
        let mut channels = self.channels.lock().unwrap();
        if let Some(channel) = channels.get_mut(key) {
            channel.messages.retain(|m| m.id != id);
        }
    }

    /// Keep the message in history listings but fail single-message lookups,
    /// as if it were deleted between fetch and forward.
    pub fn vanish(&self, message_id: i64) {
        self.vanished.lock().unwrap().insert(message_id);
    }

    /// Panic inside the history fetch of the channel with this entity id.
    pub fn panic_on_fetch(&self, entity_id: i64) {
        self.panicking.lock().unwrap().insert(entity_id);
    }

    /// Fire `cancel` from inside the next history fetch, as if a stop
    /// arrived while that channel was being processed.
    pub fn cancel_on_fetch(&self, cancel: CancellationToken) {
        *self.cancel_on_fetch.lock().unwrap() = Some(cancel);
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push((call, Instant::now()));
    }

    pub fn forbid(&self, key: &str) {
        if let Some(channel) = self.channels.lock().unwrap().get_mut(key) {
            channel.forbidden = true;
        }
    }

    pub fn queue_flood_wait(&self, seconds: u64) {
        self.flood_waits.lock().unwrap().push_back(seconds);
    }

    pub fn fail_forward(&self, message_id: i64) {
        self.failing_forwards.lock().unwrap().insert(message_id);
    }

    pub fn heal_forward(&self, message_id: i64) {
        self.failing_forwards.lock().unwrap().remove(&message_id);
    }

    pub fn forwarded_ids(&self) -> Vec<i64> {
        self.forwarded.lock().unwrap().iter().map(|(_, m)| *m).collect()
    }

    fn with_entity<T>(
        &self,
        entity: &Entity,
        f: impl FnOnce(&FakeChannel) -> T,
    ) -> Result<T, UpstreamError> {
        let channels = self.channels.lock().unwrap();
        channels
            .values()
            .find(|c| c.id == entity.id)
            .map(f)
            .ok_or_else(|| UpstreamError::NotFound("chat not found".into()))
    }
}

#[async_trait]
impl UpstreamClient for FakeUpstream {
    async fn get_entity(&self, channel: &ChannelRef) -> Result<Entity, UpstreamError> {
        self.record("get_entity");
        let channels = self.channels.lock().unwrap();
        let found = channels
            .get(&channel.to_string())
            .ok_or_else(|| UpstreamError::NotFound("chat not found".into()))?;
        if found.forbidden {
            return Err(UpstreamError::Forbidden("bot was kicked".into()));
        }
        Ok(Entity {
            id: found.id,
            title: None,
            username: None,
        })
    }

    async fn get_messages(
        &self,
        entity: &Entity,
        limit: usize,
    ) -> Result<Vec<RawMessage>, UpstreamError> {
        self.record("get_messages");
        let panics = self.panicking.lock().unwrap().contains(&entity.id);
        if panics {
            panic!("history decode blew up for {}", entity.id);
        }
        if let Some(cancel) = self.cancel_on_fetch.lock().unwrap().take() {
            cancel.cancel();
        }
        if let Some(seconds) = self.flood_waits.lock().unwrap().pop_front() {
            return Err(UpstreamError::FloodWait { seconds });
        }
        self.requested_limits.lock().unwrap().push(limit);
        self.with_entity(entity, |c| {
            c.messages.iter().rev().take(limit).cloned().collect()
        })
    }

    async fn get_message(
        &self,
        entity: &Entity,
        message_id: i64,
    ) -> Result<Option<RawMessage>, UpstreamError> {
        self.record("get_message");
        if self.vanished.lock().unwrap().contains(&message_id) {
            return Ok(None);
        }
        self.with_entity(entity, |c| {
            c.messages.iter().find(|m| m.id == message_id).cloned()
        })
    }

    async fn forward_message(
        &self,
        _target: &Entity,
        source: &Entity,
        message_id: i64,
    ) -> Result<(), UpstreamError> {
        self.record("forward_message");
        if self.failing_forwards.lock().unwrap().contains(&message_id) {
            return Err(UpstreamError::Request("500: internal".into()));
        }
        self.forwarded.lock().unwrap().push((source.id, message_id));
        Ok(())
    }
}

// ── Failing stores ──────────────────────────────────────────────────

fn unavailable(op: &str) -> DatabaseError {
    DatabaseError::Query(format!("{op}: database is locked"))
}

/// Dedup store that errors for one channel and delegates the rest.
pub struct FlakyDedup {
    pub inner: Arc<LibSqlBackend>,
    channel: String,
    fail_lookup: bool,
    fail_mark: bool,
}

impl FlakyDedup {
    /// `is_processed` fails for `channel`.
    pub fn failing_lookup(inner: Arc<LibSqlBackend>, channel: &str) -> Self {
        Self {
            inner,
            channel: channel.to_string(),
            fail_lookup: true,
            fail_mark: false,
        }
    }

    /// `mark_processed` fails for `channel`.
    pub fn failing_mark(inner: Arc<LibSqlBackend>, channel: &str) -> Self {
        Self {
            inner,
            channel: channel.to_string(),
            fail_lookup: false,
            fail_mark: true,
        }
    }
}

#[async_trait]
impl DedupStore for FlakyDedup {
    async fn is_processed(&self, channel: &str, message_id: i64) -> Result<bool, DatabaseError> {
        if self.fail_lookup && channel == self.channel {
            return Err(unavailable("is_processed"));
        }
        self.inner.is_processed(channel, message_id).await
    }

    async fn mark_processed(&self, channel: &str, message_id: i64) -> Result<(), DatabaseError> {
        if self.fail_mark && channel == self.channel {
            return Err(unavailable("mark_processed"));
        }
        self.inner.mark_processed(channel, message_id).await
    }

    async fn first_run(&self, channel: &str) -> Result<bool, DatabaseError> {
        self.inner.first_run(channel).await
    }

    async fn last_processed_id(&self, channel: &str) -> Result<Option<i64>, DatabaseError> {
        self.inner.last_processed_id(channel).await
    }

    async fn reset(&self, channel: Option<&str>) -> Result<u64, DatabaseError> {
        self.inner.reset(channel).await
    }
}

/// Config store whose channel listing fails a set number of times.
pub struct FlakyConfig {
    pub inner: Arc<LibSqlBackend>,
    failures_left: AtomicUsize,
    pub list_calls: AtomicUsize,
}

impl FlakyConfig {
    pub fn new(inner: Arc<LibSqlBackend>, failures: usize) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(failures),
            list_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ConfigStore for FlakyConfig {
    async fn list_channels(&self) -> Result<Vec<Channel>, DatabaseError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(unavailable("list_channels"));
        }
        self.inner.list_channels().await
    }

    async fn add_channel(&self, id: &str, name: Option<&str>) -> Result<(), DatabaseError> {
        self.inner.add_channel(id, name).await
    }

    async fn remove_channel(&self, id: &str) -> Result<bool, DatabaseError> {
        self.inner.remove_channel(id).await
    }

    async fn deactivate_channel(&self, id: &str) -> Result<(), DatabaseError> {
        self.inner.deactivate_channel(id).await
    }

    async fn list_keywords(&self) -> Result<Vec<Keyword>, DatabaseError> {
        self.inner.list_keywords().await
    }

    async fn add_keyword(&self, text: &str) -> Result<(), DatabaseError> {
        self.inner.add_keyword(text).await
    }

    async fn remove_keyword(&self, text: &str) -> Result<bool, DatabaseError> {
        self.inner.remove_keyword(text).await
    }

    async fn list_stopwords(&self) -> Result<Vec<StopWord>, DatabaseError> {
        self.inner.list_stopwords().await
    }

    async fn add_stopword(&self, text: &str) -> Result<(), DatabaseError> {
        self.inner.add_stopword(text).await
    }

    async fn remove_stopword(&self, text: &str) -> Result<bool, DatabaseError> {
        self.inner.remove_stopword(text).await
    }
}
