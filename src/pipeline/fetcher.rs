//! Channel fetcher: pulls the most recent messages of one source channel
//! and normalises them into `MessageRecord`s.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, UpstreamError};
use crate::pipeline::governor::RateGovernor;
use crate::pipeline::types::MessageRecord;
use crate::upstream::{ChannelRef, RawMessage, UpstreamClient};

/// Limit used for the single retry after a flood-wait.
const FLOOD_RETRY_LIMIT: usize = 5;

/// Reads recent messages through the rate governor. Never mutates state.
pub struct ChannelFetcher {
    upstream: Arc<dyn UpstreamClient>,
    governor: Arc<RateGovernor>,
    max_limit: usize,
}

impl ChannelFetcher {
    pub fn new(
        upstream: Arc<dyn UpstreamClient>,
        governor: Arc<RateGovernor>,
        max_limit: usize,
    ) -> Self {
        Self {
            upstream,
            governor,
            max_limit: max_limit.max(1),
        }
    }

    /// Fetch up to `limit` recent messages, newest first.
    ///
    /// A flood-wait is absorbed once and retried with a smaller limit; a
    /// second flood-wait (or a stop during the backoff) yields an empty
    /// result. Permanent access failures surface as
    /// [`PipelineError::AccessDenied`].
    pub async fn fetch(
        &self,
        channel_id: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<MessageRecord>, PipelineError> {
        let channel = ChannelRef::parse(channel_id).map_err(|e| PipelineError::AccessDenied {
            channel: channel_id.to_string(),
            reason: e.to_string(),
        })?;
        let limit = limit.clamp(1, self.max_limit);

        let raw = match self.try_fetch(&channel, limit).await {
            Ok(raw) => raw,
            Err(err) => match err.flood_wait() {
                Some(wait) => {
                    if self.governor.backoff(wait, cancel).await.is_err() {
                        info!(channel = channel_id, "Stopped during flood wait, skipping channel");
                        return Ok(Vec::new());
                    }
                    let retry_limit = limit.min(FLOOD_RETRY_LIMIT);
                    debug!(channel = channel_id, retry_limit, "Retrying after flood wait");
                    match self.try_fetch(&channel, retry_limit).await {
                        Ok(raw) => raw,
                        Err(UpstreamError::FloodWait { seconds }) => {
                            warn!(
                                channel = channel_id,
                                seconds, "Flood wait repeated, giving up on channel this sweep"
                            );
                            return Ok(Vec::new());
                        }
                        Err(e) => return Err(classify(channel_id, e)),
                    }
                }
                None => return Err(classify(channel_id, err)),
            },
        };

        let records: Vec<MessageRecord> = raw
            .iter()
            .take(limit)
            .map(|m| MessageRecord::from_raw(channel_id, m))
            .collect();

        debug!(
            channel = channel_id,
            count = records.len(),
            media = records.iter().filter(|r| r.media_tag().is_some()).count(),
            "Fetched messages"
        );
        Ok(records)
    }

    async fn try_fetch(
        &self,
        channel: &ChannelRef,
        limit: usize,
    ) -> Result<Vec<RawMessage>, UpstreamError> {
        self.governor.acquire().await;
        let entity = self.upstream.get_entity(channel).await?;
        self.governor.acquire().await;
        self.upstream.get_messages(&entity, limit).await
    }
}

fn classify(channel_id: &str, err: UpstreamError) -> PipelineError {
    if err.is_permanent() {
        PipelineError::AccessDenied {
            channel: channel_id.to_string(),
            reason: err.to_string(),
        }
    } else {
        PipelineError::ChannelFetch {
            channel: channel_id.to_string(),
            source: err,
        }
    }
}
