//! Background scheduler
//!
//! One long-lived task owns two tickers: the punishment tick (reverses expired
//! punishments and refills slowmode windows) and the spam sweep (clears all
//! vote-to-kick progress). Both are aligned to the moment the scheduler
//! started. The task also serves on-demand requests and stops on `Shutdown`.

use crate::MODERATION_TARGET;
use crate::moderation::{ModerationError, ModerationPipeline, ModerationResult};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info};

/// Request type for the scheduler task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerRequest {
    /// Run a punishment tick now
    TickNow,
    /// Clear all spam state now
    SweepSpamNow,
    /// Stop the scheduler task
    Shutdown,
}

/// Scheduler intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub spam_sweep_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            spam_sweep_interval: Duration::from_secs(3600),
        }
    }
}

/// Reverses timed punishments and sweeps spam state on a fixed cadence
#[derive(Debug, Clone)]
pub struct PunishmentScheduler {
    pipeline: ModerationPipeline,
    config: SchedulerConfig,
}

impl PunishmentScheduler {
    pub fn new(pipeline: ModerationPipeline, config: SchedulerConfig) -> Self {
        Self { pipeline, config }
    }

    /// Spawn the scheduler task
    pub fn start(self) -> SchedulerHandle {
        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(self.run(rx));
        SchedulerHandle { tx, task }
    }

    async fn run(self, mut rx: Receiver<SchedulerRequest>) {
        let SchedulerConfig {
            tick_interval,
            spam_sweep_interval,
        } = self.config;
        info!(
            "Starting moderation scheduler: tick every {}s, spam sweep every {}s",
            tick_interval.as_secs(),
            spam_sweep_interval.as_secs()
        );

        let start = Instant::now();
        let mut ticks = interval_at(start + tick_interval, tick_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweeps = interval_at(start + spam_sweep_interval, spam_sweep_interval);
        sweeps.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                request = rx.recv() => {
                    match request {
                        Some(SchedulerRequest::TickNow) => {
                            info!("Received request to run a punishment tick");
                            self.tick().await;
                        }
                        Some(SchedulerRequest::SweepSpamNow) => {
                            info!("Received request to sweep spam state");
                            self.pipeline.sweep_spam_state().await;
                        }
                        Some(SchedulerRequest::Shutdown) | None => {
                            info!("Received shutdown request for moderation scheduler");
                            break;
                        }
                    }
                }

                _ = ticks.tick() => self.tick().await,

                _ = sweeps.tick() => {
                    self.pipeline.sweep_spam_state().await;
                }
            }
        }

        info!("Moderation scheduler shut down");
    }

    async fn tick(&self) {
        let report = self.pipeline.tick(Utc::now()).await;
        if report.failed > 0 {
            error!(
                target: MODERATION_TARGET,
                reversed = report.reversed,
                failed = report.failed,
                "Punishment tick finished with failures"
            );
        } else {
            debug!(
                reversed = report.reversed,
                slowmode_resets = report.slowmode_resets,
                "Punishment tick finished"
            );
        }
    }
}

/// Handle to a running scheduler
#[derive(Debug)]
pub struct SchedulerHandle {
    tx: Sender<SchedulerRequest>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Send a request to the scheduler task
    ///
    /// # Errors
    /// Returns an error if the task has already stopped.
    pub async fn send(&self, request: SchedulerRequest) -> ModerationResult<()> {
        self.tx
            .send(request)
            .await
            .map_err(|e| ModerationError::SchedulerStopped(e.to_string()))
    }

    /// Stop the scheduler and wait for it to finish
    pub async fn shutdown(self) {
        if let Err(e) = self.send(SchedulerRequest::Shutdown).await {
            debug!("Scheduler already stopped: {e}");
        }
        if let Err(e) = self.task.await {
            error!("Moderation scheduler task failed: {e}");
        }
    }
}
