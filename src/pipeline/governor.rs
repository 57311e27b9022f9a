//! Rate governor: the single place that decides when the relay may talk
//! to the upstream again.
//!
//! Covers request spacing with jitter, flood-wait backoff, forward pacing,
//! and the per-sweep channel cap.

use std::time::Duration;

use rand::Rng;
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{MAX_JITTER, RelayConfig};
use crate::error::PipelineError;

/// Sleep for `duration` unless `cancel` fires first.
///
/// Returns `true` if the full duration elapsed.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Spacing, backoff and per-sweep caps for upstream traffic.
pub struct RateGovernor {
    spacing: Duration,
    forward_delay: Duration,
    jitter: f64,
    max_channels: usize,
    last_request: Mutex<Option<Instant>>,
}

impl RateGovernor {
    pub fn new(spacing: Duration, jitter: f64, max_channels: usize) -> Self {
        Self {
            spacing,
            forward_delay: spacing,
            jitter: jitter.clamp(0.0, MAX_JITTER),
            max_channels: max_channels.max(1),
            last_request: Mutex::new(None),
        }
    }

    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(
            config.request_delay,
            config.jitter,
            config.max_channels_per_sweep,
        )
        .with_forward_delay(config.forward_delay)
    }

    pub fn with_forward_delay(mut self, delay: Duration) -> Self {
        self.forward_delay = delay;
        self
    }

    pub fn max_channels(&self) -> usize {
        self.max_channels
    }

    /// `base` scaled by a random factor in `[1 - jitter, 1 + jitter]`.
    pub fn jittered(&self, base: Duration) -> Duration {
        if self.jitter == 0.0 || base.is_zero() {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        base.mul_f64(factor)
    }

    /// Wait until the next upstream request is allowed, then claim the slot.
    ///
    /// Not cancellable: this only ever waits about one spacing interval and
    /// is called mid-channel, where a stop must not take effect.
    pub async fn acquire(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.jittered(self.spacing);
            let now = Instant::now();
            if ready_at > now {
                tokio::time::sleep(ready_at - now).await;
            }
        }
        *last = Some(Instant::now());
    }

    /// Absorb a provider flood-wait. Cancellable.
    pub async fn backoff(
        &self,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        warn!(wait_secs = wait.as_secs(), "Upstream flood wait, backing off");
        let completed = sleep_or_cancel(wait, cancel).await;
        *self.last_request.lock().await = Some(Instant::now());
        if completed {
            Ok(())
        } else {
            Err(PipelineError::Cancelled)
        }
    }

    /// Pause after a successful forward.
    pub async fn pace_forward(&self) {
        let delay = self.jittered(self.forward_delay);
        debug!(delay_ms = delay.as_millis() as u64, "Pacing after forward");
        tokio::time::sleep(delay).await;
    }

    /// Pause between two channels. Returns `false` if cancelled.
    pub async fn pause_between_channels(&self, cancel: &CancellationToken) -> bool {
        let delay = self.jittered(self.spacing);
        debug!(delay_ms = delay.as_millis() as u64, "Delay before next channel");
        sleep_or_cancel(delay, cancel).await
    }

    /// Cap the channels for one sweep, picking a uniformly random subset
    /// when there are more than allowed.
    pub fn select_channels<T>(&self, channels: Vec<T>) -> Vec<T> {
        self.select_channels_with(channels, &mut rand::thread_rng())
    }

    pub fn select_channels_with<T, R: Rng + ?Sized>(&self, mut channels: Vec<T>, rng: &mut R) -> Vec<T> {
        if channels.len() <= self.max_channels {
            return channels;
        }
        warn!(
            total = channels.len(),
            cap = self.max_channels,
            "Too many channels for one sweep, sampling a random subset"
        );
        channels.shuffle(rng);
        channels.truncate(self.max_channels);
        channels
    }
}
