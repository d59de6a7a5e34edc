//! Job lifecycle events and the sinks that receive them.
//!
//! Sinks are fire-and-forget: `record` must not block and must not fail the
//! operation that produced the event.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use fleetrun_core::{AggregateMetrics, Job, JobId, JobStatus};

/// A job changed status.
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub completed_tasks: u32,
    pub failed_tasks: u32,
    pub cancelled_tasks: u32,
    pub total_tasks: u32,
    pub aggregate_metrics: AggregateMetrics,
    pub at: DateTime<Utc>,
}

impl JobEvent {
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            name: job.spec.name.clone(),
            status: job.status,
            completed_tasks: job.completed_tasks,
            failed_tasks: job.failed_tasks,
            cancelled_tasks: job.cancelled_tasks,
            total_tasks: job.total_tasks,
            aggregate_metrics: job.aggregate_metrics.clone(),
            at: job.last_updated_at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Receiver of job events.
pub trait MetricsSink: Send + Sync {
    fn record(&self, event: JobEvent);
}

/// Logs every event. Terminal events are the completion hook: they carry the
/// final aggregate metrics an artifact service would save.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn record(&self, event: JobEvent) {
        if event.is_terminal() {
            info!(
                job_id = %event.job_id,
                name = %event.name,
                status = %event.status,
                completed = event.completed_tasks,
                failed = event.failed_tasks,
                cancelled = event.cancelled_tasks,
                total = event.total_tasks,
                metrics = ?event.aggregate_metrics.mean,
                "Job finished"
            );
        } else {
            debug!(job_id = %event.job_id, status = %event.status, "Job status changed");
        }
    }
}

/// Forwards events to a bounded channel, dropping them when it is full.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<JobEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<JobEvent>) -> Self {
        Self { tx }
    }

    /// Sink plus the receiving half of a channel of `capacity` events.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<JobEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

impl MetricsSink for ChannelSink {
    fn record(&self, event: JobEvent) {
        if let Err(e) = self.tx.try_send(event) {
            warn!(error = %e, "Dropping job event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetrun_core::{JobSpec, TaskTemplate};

    fn job() -> Job {
        Job::new(
            JobSpec::new("iris", TaskTemplate::new("train"), 2, "iris"),
            "alice",
            0,
        )
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelSink::channel(4);
        let mut job = job();
        job.transition(JobStatus::Queued, Utc::now()).unwrap();
        sink.record(JobEvent::from_job(&job));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id, job.id);
        assert_eq!(event.status, JobStatus::Queued);
        assert!(!event.is_terminal());
    }

    #[tokio::test]
    async fn test_channel_sink_never_blocks_when_full() {
        let (sink, _rx) = ChannelSink::channel(1);
        let job = job();
        sink.record(JobEvent::from_job(&job));
        sink.record(JobEvent::from_job(&job));
    }
}
