//! Sweep processor: one pass over the active source channels.
//!
//! Flow per sweep:
//! 1. Snapshot channels, keywords and stop-words (no mid-sweep edits apply)
//! 2. Cap the channel list through the rate governor
//! 3. For each channel: fetch, evaluate oldest-first, forward or mark
//!
//! A failing channel never aborts the sweep. Stop requests are honoured
//! only between channels.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::error::PipelineError;
use crate::pipeline::fetcher::ChannelFetcher;
use crate::pipeline::forwarder::Forwarder;
use crate::pipeline::governor::RateGovernor;
use crate::pipeline::policy::Policy;
use crate::pipeline::types::{ChannelOutcome, ForwardOutcome, SweepReport};
use crate::store::{Channel, ConfigStore, DedupStore};
use crate::upstream::{ChannelRef, UpstreamClient};

pub struct SweepProcessor {
    config_store: Arc<dyn ConfigStore>,
    dedup: Arc<dyn DedupStore>,
    fetcher: ChannelFetcher,
    forwarder: Forwarder,
    governor: Arc<RateGovernor>,
    config: RelayConfig,
}

impl SweepProcessor {
    pub fn new(
        config: RelayConfig,
        config_store: Arc<dyn ConfigStore>,
        dedup: Arc<dyn DedupStore>,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Result<Self, crate::error::ConfigError> {
        let target = ChannelRef::parse(&config.target_channel)?;
        let governor = Arc::new(RateGovernor::from_config(&config));
        let fetcher = ChannelFetcher::new(
            upstream.clone(),
            governor.clone(),
            config.max_messages_per_channel,
        );
        let forwarder = Forwarder::new(upstream, dedup.clone(), governor.clone(), target);
        Ok(Self {
            config_store,
            dedup,
            fetcher,
            forwarder,
            governor,
            config,
        })
    }

    /// Run one sweep. Only a store failure while taking the snapshot is
    /// returned as an error; per-channel failures are logged and counted.
    pub async fn run_sweep(&self, cancel: &CancellationToken) -> Result<SweepReport, PipelineError> {
        let mut report = SweepReport::new();

        let channels = self.config_store.list_channels().await?;
        let keywords = self.config_store.list_keywords().await?;
        let stopwords = self.config_store.list_stopwords().await?;
        let policy = Policy::new(&keywords, &stopwords);

        let active: Vec<Channel> = channels.into_iter().filter(|c| c.active).collect();
        report.active_channels = active.len();
        if active.is_empty() {
            debug!("No active channels, nothing to sweep");
            report.finish();
            return Ok(report);
        }
        if policy.keyword_count() == 0 {
            warn!("No active keywords; every message will be marked without forwarding");
        }

        let selected = self.governor.select_channels(active);
        report.selected_channels = selected.len();
        info!(
            channels = selected.len(),
            keywords = policy.keyword_count(),
            "Starting sweep"
        );

        for (index, channel) in selected.iter().enumerate() {
            if cancel.is_cancelled() {
                report.aborted = true;
                break;
            }
            if index > 0 && !self.governor.pause_between_channels(cancel).await {
                report.aborted = true;
                break;
            }

            let result = AssertUnwindSafe(self.process_channel(&channel.id, &policy, cancel))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(PipelineError::Panicked(panic_message(&*panic))));

            match result {
                Ok(outcome) => {
                    debug!(
                        channel = %channel.display_name(),
                        fetched = outcome.fetched,
                        seen = outcome.already_seen,
                        forwarded = outcome.forwarded,
                        skipped = outcome.skipped,
                        halted = outcome.halted,
                        "Channel done"
                    );
                    report.absorb(&outcome);
                }
                Err(PipelineError::AccessDenied { channel: id, reason }) => {
                    warn!(channel = %id, %reason, "Lost access to channel, deactivating");
                    if let Err(e) = self.config_store.deactivate_channel(&id).await {
                        error!(channel = %id, error = %e, "Failed to deactivate channel");
                    }
                    report.failed_channels += 1;
                    report.deactivated.push(id);
                }
                Err(e) => {
                    error!(channel = %channel.id, error = %e, "Channel failed");
                    report.failed_channels += 1;
                }
            }
        }

        report.finish();
        info!(
            processed = report.processed_channels,
            failed = report.failed_channels,
            forwarded = report.forwarded,
            skipped = report.skipped,
            aborted = report.aborted,
            "Sweep finished"
        );
        Ok(report)
    }

    /// Evaluate one channel, oldest message first.
    ///
    /// Matching messages are forwarded, the rest are marked processed. A
    /// forward failure halts the channel so no later message gets marked
    /// ahead of an unretried earlier match.
    pub async fn process_channel(
        &self,
        channel_id: &str,
        policy: &Policy,
        cancel: &CancellationToken,
    ) -> Result<ChannelOutcome, PipelineError> {
        let first_run = self.dedup.first_run(channel_id).await?;
        let limit = self.config.fetch_limit(first_run);
        if first_run {
            info!(channel = channel_id, limit, "Cold start, looking back a few messages only");
        }

        let mut records = self.fetcher.fetch(channel_id, limit, cancel).await?;
        records.sort_by_key(|r| r.message_id);
        records.dedup_by_key(|r| r.message_id);

        let mut outcome = ChannelOutcome {
            fetched: records.len(),
            ..Default::default()
        };

        for record in &records {
            if self.dedup.is_processed(channel_id, record.message_id).await? {
                outcome.already_seen += 1;
                continue;
            }

            if !policy.matches(&record.text()) {
                self.dedup.mark_processed(channel_id, record.message_id).await?;
                outcome.skipped += 1;
                continue;
            }

            match self.forwarder.forward(channel_id, record.message_id).await {
                Ok(ForwardOutcome::Forwarded) => {
                    outcome.forwarded += 1;
                    self.governor.pace_forward().await;
                }
                Ok(ForwardOutcome::Missing) => {
                    self.dedup.mark_processed(channel_id, record.message_id).await?;
                    outcome.skipped += 1;
                }
                Ok(ForwardOutcome::AlreadyProcessed) => outcome.already_seen += 1,
                Err(e @ PipelineError::Store(_)) => return Err(e),
                Err(e) => {
                    warn!(
                        channel = channel_id,
                        message_id = record.message_id,
                        error = %e,
                        "Forward failed, leaving the rest of the channel for next sweep"
                    );
                    outcome.halted = true;
                    break;
                }
            }
        }

        Ok(outcome)
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::pipeline::test_support::{FakeUpstream, FlakyDedup};
    use crate::store::{Keyword, LibSqlBackend};
    use crate::upstream::MediaKind;

    fn config() -> RelayConfig {
        RelayConfig {
            target_channel: "@dst".into(),
            request_delay: Duration::ZERO,
            forward_delay: Duration::ZERO,
            jitter: 0.0,
            ..RelayConfig::default()
        }
    }

    async fn setup(config: RelayConfig) -> (Arc<FakeUpstream>, Arc<LibSqlBackend>, SweepProcessor) {
        let upstream = Arc::new(FakeUpstream::new());
        upstream.add_channel("@dst", 999);
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let processor =
            SweepProcessor::new(config, store.clone(), store.clone(), upstream.clone()).unwrap();
        (upstream, store, processor)
    }

    #[tokio::test]
    async fn forwards_matches_and_marks_everything() {
        let (upstream, store, processor) = setup(config()).await;
        upstream.add_channel("@src", 1);
        upstream.post_text("@src", 1, "selling my cat");
        upstream.post_text("@src", 2, "nothing here");
        upstream.post_media("@src", 3, MediaKind::Photo, None);
        store.add_channel("@src", None).await.unwrap();
        store.add_keyword("cat").await.unwrap();

        let report = processor.run_sweep(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.forwarded, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(upstream.forwarded_ids(), vec![1]);
        for id in 1..=3 {
            assert!(store.is_processed("@src", id).await.unwrap());
        }
    }

    #[tokio::test]
    async fn second_sweep_forwards_nothing_new() {
        let (upstream, store, processor) = setup(config()).await;
        upstream.add_channel("@src", 1);
        upstream.post_text("@src", 1, "cat");
        store.add_channel("@src", None).await.unwrap();
        store.add_keyword("cat").await.unwrap();

        let cancel = CancellationToken::new();
        processor.run_sweep(&cancel).await.unwrap();
        let report = processor.run_sweep(&cancel).await.unwrap();
        assert_eq!(report.forwarded, 0);
        assert_eq!(upstream.forwarded_ids(), vec![1]);
    }

    #[tokio::test]
    async fn cold_start_looks_back_five() {
        let (upstream, store, processor) = setup(config()).await;
        upstream.add_channel("@src", 1);
        for id in 1..=12 {
            upstream.post_text("@src", id, "cat");
        }
        store.add_channel("@src", None).await.unwrap();
        store.add_keyword("cat").await.unwrap();

        processor.run_sweep(&CancellationToken::new()).await.unwrap();
        assert_eq!(upstream.forwarded_ids(), vec![8, 9, 10, 11, 12]);
        assert_eq!(*upstream.requested_limits.lock().unwrap(), vec![5]);
    }

    #[tokio::test]
    async fn forward_failure_halts_channel() {
        let (upstream, store, processor) = setup(config()).await;
        upstream.add_channel("@src", 1);
        upstream.post_text("@src", 1, "cat one");
        upstream.post_text("@src", 2, "cat two");
        upstream.post_text("@src", 3, "dog");
        store.add_channel("@src", None).await.unwrap();
        store.add_keyword("cat").await.unwrap();
        upstream.fail_forward(1);

        let policy = Policy::new(&[Keyword::new("cat")], &[]);
        let outcome = processor
            .process_channel("@src", &policy, &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.halted);
        for id in 1..=3 {
            assert!(!store.is_processed("@src", id).await.unwrap());
        }
    }

    #[tokio::test]
    async fn vanished_match_is_marked() {
        let (upstream, store, processor) = setup(config()).await;
        upstream.add_channel("@src", 1);
        upstream.post_text("@src", 1, "cat");
        upstream.post_text("@src", 2, "cat again");
        upstream.vanish(1);
        store.add_channel("@src", None).await.unwrap();
        store.add_keyword("cat").await.unwrap();

        let report = processor.run_sweep(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.forwarded, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(upstream.forwarded_ids(), vec![2]);
        assert!(store.is_processed("@src", 1).await.unwrap());
    }

    #[tokio::test]
    async fn forbidden_channel_is_deactivated() {
        let (upstream, store, processor) = setup(config()).await;
        upstream.add_channel("@gone", 5);
        upstream.forbid("@gone");
        store.add_channel("@gone", None).await.unwrap();
        store.add_keyword("cat").await.unwrap();

        let report = processor.run_sweep(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.deactivated, vec!["@gone".to_string()]);
        assert!(store.list_channels().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_sweep_visits_nothing() {
        let (upstream, store, processor) = setup(config()).await;
        upstream.add_channel("@src", 1);
        upstream.post_text("@src", 1, "cat");
        store.add_channel("@src", None).await.unwrap();
        store.add_keyword("cat").await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = processor.run_sweep(&cancel).await.unwrap();
        assert!(report.aborted);
        assert!(upstream.forwarded_ids().is_empty());
    }

    /// Two channels `@first` and `@second`, each with one matching post,
    /// swept with `dedup` in front of the shared store.
    async fn two_channels(
        dedup: impl FnOnce(Arc<LibSqlBackend>) -> Arc<dyn DedupStore>,
    ) -> (Arc<FakeUpstream>, Arc<LibSqlBackend>, SweepProcessor) {
        let upstream = Arc::new(FakeUpstream::new());
        upstream.add_channel("@dst", 999);
        upstream.add_channel("@first", 1);
        upstream.add_channel("@second", 2);
        upstream.post_text("@first", 1, "cat one");
        upstream.post_text("@second", 1, "cat two");
        let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        store.add_channel("@first", None).await.unwrap();
        store.add_channel("@second", None).await.unwrap();
        store.add_keyword("cat").await.unwrap();
        let processor =
            SweepProcessor::new(config(), store.clone(), dedup(store.clone()), upstream.clone())
                .unwrap();
        (upstream, store, processor)
    }

    fn forwarded_from(upstream: &FakeUpstream, entity_id: i64) -> usize {
        upstream
            .forwarded
            .lock()
            .unwrap()
            .iter()
            .filter(|(src, _)| *src == entity_id)
            .count()
    }

    #[tokio::test]
    async fn stop_mid_channel_finishes_it_and_skips_the_rest() {
        let (upstream, store, processor) = two_channels(|s| s as Arc<dyn DedupStore>).await;
        let cancel = CancellationToken::new();
        upstream.cancel_on_fetch(cancel.clone());

        let report = processor.run_sweep(&cancel).await.unwrap();
        assert!(report.aborted);
        assert_eq!(report.processed_channels, 1);
        assert_eq!(forwarded_from(&upstream, 1), 1);
        assert!(store.is_processed("@first", 1).await.unwrap());
        assert_eq!(forwarded_from(&upstream, 2), 0);
        assert!(store.first_run("@second").await.unwrap());
    }

    #[tokio::test]
    async fn dedup_lookup_failure_fails_only_that_channel() {
        let (upstream, store, processor) =
            two_channels(|s| Arc::new(FlakyDedup::failing_lookup(s, "@first")) as Arc<dyn DedupStore>)
                .await;

        let report = processor.run_sweep(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.failed_channels, 1);
        assert_eq!(report.processed_channels, 1);
        assert!(report.deactivated.is_empty());
        assert_eq!(forwarded_from(&upstream, 1), 0);
        assert!(!store.is_processed("@first", 1).await.unwrap());
        assert_eq!(forwarded_from(&upstream, 2), 1);
        assert!(store.is_processed("@second", 1).await.unwrap());
    }

    #[tokio::test]
    async fn marker_write_failure_fails_channel_and_sweep_continues() {
        let (upstream, store, processor) =
            two_channels(|s| Arc::new(FlakyDedup::failing_mark(s, "@first")) as Arc<dyn DedupStore>)
                .await;

        let report = processor.run_sweep(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.failed_channels, 1);
        assert_eq!(report.forwarded, 1);
        // Sent, but the marker never landed.
        assert_eq!(forwarded_from(&upstream, 1), 1);
        assert!(!store.is_processed("@first", 1).await.unwrap());
        assert_eq!(forwarded_from(&upstream, 2), 1);
        assert!(store.is_processed("@second", 1).await.unwrap());
    }

    #[tokio::test]
    async fn panic_in_one_channel_is_contained() {
        let (upstream, store, processor) = two_channels(|s| s as Arc<dyn DedupStore>).await;
        upstream.panic_on_fetch(1);

        let report = processor.run_sweep(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.failed_channels, 1);
        assert_eq!(report.processed_channels, 1);
        assert!(store.first_run("@first").await.unwrap());
        assert_eq!(forwarded_from(&upstream, 2), 1);
    }

    #[test]
    fn panic_message_extracts_strings() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*boxed), "bang");
    }
}
