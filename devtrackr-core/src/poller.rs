use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{SchedulerError, TrackError};
use crate::tracking::{SyncOutcome, TrackingService};

/// Fixed period between polling cycles.
pub const DEFAULT_TICK: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    /// Cadence for issues without their own polling interval.
    pub default_interval: Duration,
    pub tick: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            default_interval: Duration::from_secs(300),
            tick: DEFAULT_TICK,
        }
    }
}

/// Counters from one polling cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    /// Issues whose fetch or write failed this cycle.
    pub failed: usize,
}

/// Runs one polling cycle as of `now`.
///
/// Per-issue failures are logged and counted; only a failure to list the
/// issues aborts the cycle.
pub async fn poll_once(
    tracking: &TrackingService,
    default_interval: Duration,
    now: DateTime<Utc>,
) -> Result<CycleReport, TrackError> {
    let issues = tracking.list_issues().await?;
    debug!(issues = issues.len(), "starting polling cycle");

    let mut report = CycleReport::default();
    for mut issue in issues {
        if !issue.is_due(default_interval, now) {
            report.skipped += 1;
            continue;
        }

        let remote = match tracking.fetch_remote(&issue.source_url).await {
            Ok(remote) => remote,
            Err(err) => {
                warn!(key = %issue.key, error = %err, "failed to fetch issue");
                report.failed += 1;
                continue;
            }
        };

        match tracking.apply_remote(&mut issue, remote, now).await {
            Ok(SyncOutcome::Updated) => report.updated += 1,
            Ok(SyncOutcome::Unchanged) => report.unchanged += 1,
            Err(err) => {
                warn!(key = %issue.key, error = %err, "failed to store polled issue");
                report.failed += 1;
            }
        }
    }

    info!(
        updated = report.updated,
        unchanged = report.unchanged,
        skipped = report.skipped,
        failed = report.failed,
        "polling cycle complete"
    );
    Ok(report)
}

/// Background refresh of every tracked issue.
///
/// Consumed by [`Scheduler::run`] or [`Scheduler::spawn`], so a stopped
/// scheduler cannot be restarted.
pub struct Scheduler {
    tracking: TrackingService,
    config: PollConfig,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(tracking: TrackingService, config: PollConfig, cancel: CancellationToken) -> Self {
        Self {
            tracking,
            config,
            cancel,
        }
    }

    /// Polls every tick until `stop` fires (or its sender is dropped) or the
    /// cancellation token is cancelled. A cycle in progress is abandoned
    /// between issues; writes already made stay committed.
    pub async fn run(self, mut stop: oneshot::Receiver<()>) {
        info!(
            default_interval = ?self.config.default_interval,
            tick = ?self.config.tick,
            "starting polling scheduler"
        );
        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // interval fires immediately; the first cycle waits one full tick
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("scheduler cancelled");
                    break;
                }
                _ = &mut stop => {
                    info!("scheduler stop requested");
                    break;
                }
                _ = ticker.tick() => {
                    let cycle = poll_once(&self.tracking, self.config.default_interval, Utc::now());
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            info!("scheduler cancelled during cycle");
                            break;
                        }
                        _ = &mut stop => {
                            info!("scheduler stop requested during cycle");
                            break;
                        }
                        result = cycle => {
                            if let Err(err) = result {
                                warn!(error = %err, "polling cycle failed");
                            }
                        }
                    }
                }
            }
        }
    }

    /// Runs the scheduler on its own task.
    pub fn spawn(self) -> SchedulerHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let join = tokio::spawn(self.run(stop_rx));
        SchedulerHandle { stop_tx, join }
    }
}

pub struct SchedulerHandle {
    stop_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Signals the scheduler to stop and waits for its task to finish.
    pub async fn stop(self) -> Result<(), SchedulerError> {
        let _ = self.stop_tx.send(());
        self.join.await.map_err(SchedulerError::from)
    }
}
