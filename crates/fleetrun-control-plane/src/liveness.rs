//! Liveness monitor.
//!
//! Periodically expires silent workers and reclaims their tasks, reclaims
//! tasks that overran the execution timeout, and removes workers that have
//! stayed unreachable past the grace period.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fleetrun_core::WorkerId;

use crate::coordinator::{JobCoordinator, ReclaimReason};
use crate::registry::WorkerRegistry;

/// Timing of the liveness monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessConfig {
    /// How often the monitor sweeps.
    pub check_interval: Duration,

    /// Silence after which a worker is unreachable.
    pub liveness_timeout: Duration,

    /// Maximum time a task may stay assigned.
    pub task_timeout: Option<Duration>,

    /// How long an unreachable worker stays listed.
    pub worker_purge_after: Duration,
}

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_workers: Vec<WorkerId>,
    pub reclaimed_tasks: usize,
    pub timed_out_tasks: usize,
    pub purged_workers: Vec<WorkerId>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired_workers.is_empty()
            && self.reclaimed_tasks == 0
            && self.timed_out_tasks == 0
            && self.purged_workers.is_empty()
    }
}

/// Liveness monitor.
pub struct LivenessMonitor {
    registry: Arc<WorkerRegistry>,
    coordinator: Arc<JobCoordinator>,
    config: LivenessConfig,
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

impl LivenessMonitor {
    pub fn new(
        registry: Arc<WorkerRegistry>,
        coordinator: Arc<JobCoordinator>,
        config: LivenessConfig,
    ) -> Self {
        Self {
            registry,
            coordinator,
            config,
        }
    }

    /// Run sweeps until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_ms = self.config.check_interval.as_millis() as u64,
            timeout_ms = self.config.liveness_timeout.as_millis() as u64,
            "Liveness monitor started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Liveness monitor stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.sweep(Utc::now()).await;
                    if !report.is_empty() {
                        info!(
                            expired_workers = report.expired_workers.len(),
                            reclaimed_tasks = report.reclaimed_tasks,
                            timed_out_tasks = report.timed_out_tasks,
                            purged_workers = report.purged_workers.len(),
                            "Liveness sweep"
                        );
                    }
                }
            }
        }
    }

    /// One pass over workers and tasks as of `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        let expired = self
            .registry
            .expire(now, to_chrono(self.config.liveness_timeout))
            .await;
        for worker in expired {
            for task_id in &worker.held {
                match self
                    .coordinator
                    .reclaim(task_id, &worker.worker_id, None, ReclaimReason::WorkerLost, now)
                    .await
                {
                    Ok(true) => report.reclaimed_tasks += 1,
                    Ok(false) => {}
                    Err(e) => {
                        error!(task_id = %task_id, worker_id = %worker.worker_id, error = %e, "Failed to reclaim task")
                    }
                }
            }
            report.expired_workers.push(worker.worker_id);
        }

        if let Some(timeout) = self.config.task_timeout {
            let stuck = self
                .coordinator
                .timed_out_tasks(now, to_chrono(timeout))
                .await;
            for task in stuck {
                warn!(
                    task_id = %task.task_id,
                    worker_id = %task.worker_id,
                    attempt = task.attempt,
                    "Task exceeded execution timeout"
                );
                match self
                    .coordinator
                    .reclaim(
                        &task.task_id,
                        &task.worker_id,
                        Some(task.attempt),
                        ReclaimReason::Timeout,
                        now,
                    )
                    .await
                {
                    Ok(true) => report.timed_out_tasks += 1,
                    Ok(false) => {}
                    Err(e) => {
                        error!(task_id = %task.task_id, worker_id = %task.worker_id, error = %e, "Failed to reclaim task")
                    }
                }
            }
        }

        report.purged_workers = self
            .registry
            .purge(now, to_chrono(self.config.worker_purge_after))
            .await;

        report
    }
}
