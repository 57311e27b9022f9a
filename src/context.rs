//! Relay context: the operator-facing handle over configuration, dedup
//! state and the sweep driver.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::RelayConfig;
use crate::error::{ConfigError, Error};
use crate::pipeline::{Driver, DriverState, SweepProcessor, SweepReport};
use crate::store::{Channel, ConfigStore, DedupStore, Keyword, StopWord};
use crate::upstream::{ChannelRef, UpstreamClient};

/// Snapshot for the status command.
#[derive(Debug, Clone)]
pub struct RelayStatus {
    pub running: bool,
    pub channels: usize,
    pub keywords: usize,
    pub stopwords: usize,
    pub check_interval: Duration,
    pub target_channel: String,
    pub last_sweep: Option<SweepReport>,
}

impl fmt::Display for RelayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.running {
            DriverState::Running
        } else {
            DriverState::Idle
        };
        writeln!(f, "Relay status")?;
        writeln!(f, "  channels:  {}", self.channels)?;
        writeln!(f, "  keywords:  {}", self.keywords)?;
        writeln!(f, "  stopwords: {}", self.stopwords)?;
        writeln!(f, "  interval:  {} min", self.check_interval.as_secs() / 60)?;
        writeln!(f, "  target:    {}", self.target_channel)?;
        write!(f, "  state:     {}", state.label())?;
        if let Some(report) = &self.last_sweep {
            let at = report
                .finished_at
                .unwrap_or(report.started_at)
                .format("%Y-%m-%d %H:%M:%S UTC");
            write!(
                f,
                "\n  last sweep: {at}, {} channel(s), {} forwarded, {} failed",
                report.processed_channels, report.forwarded, report.failed_channels
            )?;
        }
        Ok(())
    }
}

pub struct RelayContext {
    config: RelayConfig,
    config_store: Arc<dyn ConfigStore>,
    dedup: Arc<dyn DedupStore>,
    driver: Driver,
}

impl RelayContext {
    pub fn new(
        config: RelayConfig,
        config_store: Arc<dyn ConfigStore>,
        dedup: Arc<dyn DedupStore>,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Result<Self, ConfigError> {
        let processor = SweepProcessor::new(
            config.clone(),
            Arc::clone(&config_store),
            Arc::clone(&dedup),
            upstream,
        )?;
        let driver = Driver::new(Arc::new(processor), config.check_interval, config.error_pause);
        Ok(Self {
            config,
            config_store,
            dedup,
            driver,
        })
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub async fn start(&self) -> bool {
        self.driver.start().await
    }

    pub async fn stop(&self) -> bool {
        self.driver.stop().await
    }

    pub async fn is_running(&self) -> bool {
        self.driver.state().await == DriverState::Running
    }

    pub async fn status(&self) -> Result<RelayStatus, Error> {
        Ok(RelayStatus {
            running: self.is_running().await,
            channels: self.config_store.list_channels().await?.len(),
            keywords: self.config_store.list_keywords().await?.len(),
            stopwords: self.config_store.list_stopwords().await?.len(),
            check_interval: self.config.check_interval,
            target_channel: self.config.target_channel.clone(),
            last_sweep: self.driver.last_report().await,
        })
    }

    // ── Channels ────────────────────────────────────────────────────

    /// Add (or reactivate) a source channel. Returns its canonical id.
    pub async fn add_channel(&self, raw_id: &str, name: Option<&str>) -> Result<String, Error> {
        let id = ChannelRef::parse(raw_id)?.to_string();
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        self.config_store.add_channel(&id, name).await?;
        info!(channel = %id, "Channel added");
        Ok(id)
    }

    pub async fn remove_channel(&self, raw_id: &str) -> Result<bool, Error> {
        let id = canonical_or_raw(raw_id);
        let removed = self.config_store.remove_channel(&id).await?;
        if removed {
            info!(channel = %id, "Channel removed");
        }
        Ok(removed)
    }

    pub async fn channels(&self) -> Result<Vec<Channel>, Error> {
        Ok(self.config_store.list_channels().await?)
    }

    /// Forget the dedup markers of one channel, so its next sweep is a
    /// cold start. Returns the number of markers removed.
    pub async fn reset_channel(&self, raw_id: &str) -> Result<u64, Error> {
        let id = canonical_or_raw(raw_id);
        Ok(self.dedup.reset(Some(&id)).await?)
    }

    pub async fn last_processed(&self, raw_id: &str) -> Result<Option<i64>, Error> {
        Ok(self.dedup.last_processed_id(&canonical_or_raw(raw_id)).await?)
    }

    // ── Keywords / stop-words ───────────────────────────────────────

    pub async fn add_keyword(&self, text: &str) -> Result<String, Error> {
        let text = non_blank(text, "keyword")?;
        if Keyword::new(&text).parts().is_empty() {
            return Err(ConfigError::BlankEntry { kind: "keyword" }.into());
        }
        self.config_store.add_keyword(&text).await?;
        info!(keyword = %text, "Keyword added");
        Ok(text)
    }

    pub async fn remove_keyword(&self, text: &str) -> Result<bool, Error> {
        Ok(self.config_store.remove_keyword(text.trim()).await?)
    }

    pub async fn keywords(&self) -> Result<Vec<Keyword>, Error> {
        Ok(self.config_store.list_keywords().await?)
    }

    pub async fn add_stopword(&self, text: &str) -> Result<String, Error> {
        let text = non_blank(text, "stop-word")?;
        self.config_store.add_stopword(&text).await?;
        info!(stopword = %text, "Stop-word added");
        Ok(text)
    }

    pub async fn remove_stopword(&self, text: &str) -> Result<bool, Error> {
        Ok(self.config_store.remove_stopword(text.trim()).await?)
    }

    pub async fn stopwords(&self) -> Result<Vec<StopWord>, Error> {
        Ok(self.config_store.list_stopwords().await?)
    }

    /// Stop the driver and wait for the in-flight channel to finish.
    pub async fn shutdown(&self) {
        self.driver.stop_and_wait().await;
    }
}

fn non_blank(text: &str, kind: &'static str) -> Result<String, ConfigError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::BlankEntry { kind });
    }
    Ok(trimmed.to_string())
}

/// Rows added before canonicalisation may not parse; match them verbatim.
fn canonical_or_raw(raw: &str) -> String {
    ChannelRef::parse(raw)
        .map(|c| c.to_string())
        .unwrap_or_else(|_| raw.trim().to_string())
}
