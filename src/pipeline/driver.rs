//! Scheduler driver: runs sweeps in a background loop until stopped.
//!
//! Only one sweep loop exists at a time. `stop` cancels the loop, which
//! finishes the channel it is on and exits; a following `start` waits for
//! that drain before spawning a fresh loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::pipeline::governor::sleep_or_cancel;
use crate::pipeline::processor::{SweepProcessor, panic_message};
use crate::pipeline::types::SweepReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Running,
}

impl DriverState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "stopped",
            Self::Running => "running",
        }
    }
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct DriverInner {
    running: Option<RunningLoop>,
    draining: Option<JoinHandle<()>>,
}

pub struct Driver {
    processor: Arc<SweepProcessor>,
    check_interval: Duration,
    error_pause: Duration,
    inner: Mutex<DriverInner>,
    last_report: Arc<RwLock<Option<SweepReport>>>,
}

impl Driver {
    pub fn new(processor: Arc<SweepProcessor>, check_interval: Duration, error_pause: Duration) -> Self {
        Self {
            processor,
            check_interval,
            error_pause,
            inner: Mutex::new(DriverInner::default()),
            last_report: Arc::new(RwLock::new(None)),
        }
    }

    /// Start the sweep loop. Returns `false` if it was already running.
    pub async fn start(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner
            .running
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
        {
            return false;
        }

        if let Some(draining) = inner.draining.take() {
            info!("Waiting for the previous sweep loop to finish");
            if let Err(e) = draining.await {
                warn!(error = %e, "Previous sweep loop ended abnormally");
            }
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.processor),
            cancel.clone(),
            self.check_interval,
            self.error_pause,
            Arc::clone(&self.last_report),
        ));
        inner.running = Some(RunningLoop { cancel, handle });
        info!(interval_secs = self.check_interval.as_secs(), "Relay started");
        true
    }

    /// Request a stop. Returns `false` if nothing was running.
    ///
    /// The loop finishes its current channel before exiting; use
    /// [`Driver::stop_and_wait`] to block until it has.
    pub async fn stop(&self) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.running.take() {
            Some(running) => {
                running.cancel.cancel();
                let was_live = !running.handle.is_finished();
                inner.draining = Some(running.handle);
                info!("Relay stop requested");
                was_live
            }
            None => false,
        }
    }

    pub async fn stop_and_wait(&self) {
        self.stop().await;
        let draining = self.inner.lock().await.draining.take();
        if let Some(handle) = draining {
            if let Err(e) = handle.await {
                warn!(error = %e, "Sweep loop ended abnormally");
            }
        }
    }

    pub async fn state(&self) -> DriverState {
        let inner = self.inner.lock().await;
        match &inner.running {
            Some(r) if !r.handle.is_finished() => DriverState::Running,
            _ => DriverState::Idle,
        }
    }

    pub async fn last_report(&self) -> Option<SweepReport> {
        self.last_report.read().await.clone()
    }
}

async fn run_loop(
    processor: Arc<SweepProcessor>,
    cancel: CancellationToken,
    interval: Duration,
    error_pause: Duration,
    last_report: Arc<RwLock<Option<SweepReport>>>,
) {
    while !cancel.is_cancelled() {
        let result = AssertUnwindSafe(processor.run_sweep(&cancel))
            .catch_unwind()
            .await;

        let pause = match result {
            Ok(Ok(report)) => {
                *last_report.write().await = Some(report);
                interval
            }
            Ok(Err(e)) => {
                error!(error = %e, pause_secs = error_pause.as_secs(), "Sweep failed");
                error_pause
            }
            Err(panic) => {
                error!(
                    panic = %panic_message(&*panic),
                    pause_secs = error_pause.as_secs(),
                    "Sweep panicked"
                );
                error_pause
            }
        };

        if !sleep_or_cancel(pause, &cancel).await {
            break;
        }
    }
    info!("Sweep loop exited");
}
