//! Forwarder: copies one matched message to the target channel and records
//! it as processed.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::pipeline::governor::RateGovernor;
use crate::pipeline::types::ForwardOutcome;
use crate::store::DedupStore;
use crate::upstream::{ChannelRef, UpstreamClient};

/// Forwards a message at most once.
///
/// The marker is written only after the upstream accepted the forward, so a
/// failed attempt leaves the message eligible for the next sweep. There is no
/// internal retry.
pub struct Forwarder {
    upstream: Arc<dyn UpstreamClient>,
    dedup: Arc<dyn DedupStore>,
    governor: Arc<RateGovernor>,
    target: ChannelRef,
}

impl Forwarder {
    pub fn new(
        upstream: Arc<dyn UpstreamClient>,
        dedup: Arc<dyn DedupStore>,
        governor: Arc<RateGovernor>,
        target: ChannelRef,
    ) -> Self {
        Self {
            upstream,
            dedup,
            governor,
            target,
        }
    }

    pub fn target(&self) -> &ChannelRef {
        &self.target
    }

    pub async fn forward(
        &self,
        source_channel_id: &str,
        message_id: i64,
    ) -> Result<ForwardOutcome, PipelineError> {
        if self.dedup.is_processed(source_channel_id, message_id).await? {
            return Ok(ForwardOutcome::AlreadyProcessed);
        }

        let fail = |reason: String| PipelineError::Forward {
            channel: source_channel_id.to_string(),
            message_id,
            reason,
        };

        let source = ChannelRef::parse(source_channel_id).map_err(|e| fail(e.to_string()))?;

        self.governor.acquire().await;
        let source_entity = self
            .upstream
            .get_entity(&source)
            .await
            .map_err(|e| fail(format!("resolve source: {e}")))?;
        self.governor.acquire().await;
        let target_entity = self
            .upstream
            .get_entity(&self.target)
            .await
            .map_err(|e| fail(format!("resolve target {}: {e}", self.target)))?;

        self.governor.acquire().await;
        let message = self
            .upstream
            .get_message(&source_entity, message_id)
            .await
            .map_err(|e| fail(format!("load message: {e}")))?;
        if message.is_none() {
            warn!(
                channel = source_channel_id,
                message_id, "Message no longer exists upstream"
            );
            return Ok(ForwardOutcome::Missing);
        }

        self.governor.acquire().await;
        self.upstream
            .forward_message(&target_entity, &source_entity, message_id)
            .await
            .map_err(|e| fail(e.to_string()))?;

        if let Err(e) = self.dedup.mark_processed(source_channel_id, message_id).await {
            error!(
                channel = source_channel_id,
                message_id,
                error = %e,
                "Forwarded but failed to record marker; message may be sent again"
            );
            return Err(e.into());
        }

        info!(
            channel = source_channel_id,
            message_id,
            target = %self.target,
            "Forwarded message"
        );
        Ok(ForwardOutcome::Forwarded)
    }
}
