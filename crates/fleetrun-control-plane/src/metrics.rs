//! Prometheus metrics collection and formatting.
//!
//! This module provides metrics in Prometheus text exposition format.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fleetrun_core::{JobStatus, TaskStatus, WorkerStatus};

use crate::state::AppState;

/// Monotonic counters updated by the coordinator and scheduler.
#[derive(Debug, Default)]
pub struct Counters {
    pub jobs_submitted: AtomicU64,
    pub tasks_assigned: AtomicU64,
    pub reports_accepted: AtomicU64,
    pub reports_duplicate: AtomicU64,
    pub reports_stale: AtomicU64,
    pub tasks_reclaimed_worker_lost: AtomicU64,
    pub tasks_reclaimed_timeout: AtomicU64,
}

impl Counters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Collect all metrics from AppState and format as Prometheus text.
pub async fn collect_metrics(state: &Arc<AppState>) -> String {
    let mut output = String::new();

    collect_worker_metrics(state, &mut output).await;
    collect_job_metrics(state, &mut output).await;
    collect_counters(state, &mut output);

    output
}

/// Collect worker metrics by status.
async fn collect_worker_metrics(state: &Arc<AppState>, output: &mut String) {
    let workers = state.registry.snapshot().await;

    let mut idle = 0u64;
    let mut busy = 0u64;
    let mut unreachable = 0u64;

    for worker in &workers {
        match worker.status {
            WorkerStatus::Idle => idle += 1,
            WorkerStatus::Busy => busy += 1,
            WorkerStatus::Unreachable => unreachable += 1,
        }
    }

    writeln!(output, "# HELP fleetrun_workers Number of registered workers by status").ok();
    writeln!(output, "# TYPE fleetrun_workers gauge").ok();
    writeln!(output, "fleetrun_workers{{status=\"idle\"}} {idle}").ok();
    writeln!(output, "fleetrun_workers{{status=\"busy\"}} {busy}").ok();
    writeln!(output, "fleetrun_workers{{status=\"unreachable\"}} {unreachable}").ok();
}

/// Collect job and task gauges by status.
async fn collect_job_metrics(state: &Arc<AppState>, output: &mut String) {
    let job_statuses = [
        JobStatus::Submitted,
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Cancelling,
        JobStatus::Completed,
        JobStatus::FailedPartial,
        JobStatus::Cancelled,
    ];
    let task_statuses = [
        TaskStatus::Pending,
        TaskStatus::Assigned,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    let mut jobs = [0u64; 7];
    let mut tasks = [0u64; 5];

    for handle in state.store.handles().await {
        let entry = handle.lock().await;
        if let Some(i) = job_statuses.iter().position(|s| *s == entry.job.status) {
            jobs[i] += 1;
        }
        for task in &entry.tasks {
            if let Some(i) = task_statuses.iter().position(|s| *s == task.status) {
                tasks[i] += 1;
            }
        }
    }

    writeln!(output).ok();
    writeln!(output, "# HELP fleetrun_jobs Number of jobs by status").ok();
    writeln!(output, "# TYPE fleetrun_jobs gauge").ok();
    for (status, count) in job_statuses.iter().zip(jobs) {
        writeln!(output, "fleetrun_jobs{{status=\"{}\"}} {count}", label(status)).ok();
    }

    writeln!(output).ok();
    writeln!(output, "# HELP fleetrun_tasks Number of tasks by status").ok();
    writeln!(output, "# TYPE fleetrun_tasks gauge").ok();
    for (status, count) in task_statuses.iter().zip(tasks) {
        writeln!(output, "fleetrun_tasks{{status=\"{}\"}} {count}", label(status)).ok();
    }

    writeln!(output).ok();
    writeln!(output, "# HELP fleetrun_queue_depth Entries in the pending-task index").ok();
    writeln!(output, "# TYPE fleetrun_queue_depth gauge").ok();
    writeln!(output, "fleetrun_queue_depth {}", state.queue.len().await).ok();
}

fn collect_counters(state: &Arc<AppState>, output: &mut String) {
    let c = &state.counters;

    writeln!(output).ok();
    writeln!(output, "# HELP fleetrun_jobs_submitted_total Jobs accepted by SubmitJob").ok();
    writeln!(output, "# TYPE fleetrun_jobs_submitted_total counter").ok();
    writeln!(
        output,
        "fleetrun_jobs_submitted_total {}",
        Counters::get(&c.jobs_submitted)
    )
    .ok();

    writeln!(output).ok();
    writeln!(output, "# HELP fleetrun_tasks_assigned_total Tasks handed to workers").ok();
    writeln!(output, "# TYPE fleetrun_tasks_assigned_total counter").ok();
    writeln!(
        output,
        "fleetrun_tasks_assigned_total {}",
        Counters::get(&c.tasks_assigned)
    )
    .ok();

    writeln!(output).ok();
    writeln!(output, "# HELP fleetrun_task_reports_total Task reports by outcome").ok();
    writeln!(output, "# TYPE fleetrun_task_reports_total counter").ok();
    for (outcome, counter) in [
        ("accepted", &c.reports_accepted),
        ("duplicate", &c.reports_duplicate),
        ("stale", &c.reports_stale),
    ] {
        writeln!(
            output,
            "fleetrun_task_reports_total{{outcome=\"{outcome}\"}} {}",
            Counters::get(counter)
        )
        .ok();
    }

    writeln!(output).ok();
    writeln!(output, "# HELP fleetrun_tasks_reclaimed_total Tasks taken back from workers").ok();
    writeln!(output, "# TYPE fleetrun_tasks_reclaimed_total counter").ok();
    for (reason, counter) in [
        ("worker_lost", &c.tasks_reclaimed_worker_lost),
        ("timeout", &c.tasks_reclaimed_timeout),
    ] {
        writeln!(
            output,
            "fleetrun_tasks_reclaimed_total{{reason=\"{reason}\"}} {}",
            Counters::get(counter)
        )
        .ok();
    }
}

fn label(status: &impl ToString) -> String {
    status.to_string().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleetrun_core::{JobSpec, TaskTemplate, WorkerCapability};

    #[tokio::test]
    async fn test_collect_metrics_empty_state() {
        let state = AppState::in_memory();
        let output = collect_metrics(&state).await;

        assert!(output.contains("fleetrun_workers{status=\"idle\"} 0"));
        assert!(output.contains("fleetrun_jobs{status=\"running\"} 0"));
        assert!(output.contains("fleetrun_tasks{status=\"pending\"} 0"));
        assert!(output.contains("fleetrun_queue_depth 0"));
        assert!(output.contains("# TYPE fleetrun_task_reports_total counter"));
    }

    #[tokio::test]
    async fn test_collect_metrics_counts_state() {
        let state = AppState::in_memory();
        state
            .registry
            .register(WorkerCapability::new("node-1"), Utc::now())
            .await;
        state
            .coordinator
            .submit(
                JobSpec::new("iris", TaskTemplate::new("echo"), 3, "iris"),
                "alice",
            )
            .await
            .unwrap();

        let output = collect_metrics(&state).await;
        assert!(output.contains("fleetrun_workers{status=\"idle\"} 1"));
        assert!(output.contains("fleetrun_jobs{status=\"running\"} 1"));
        assert!(output.contains("fleetrun_tasks{status=\"pending\"} 3"));
        assert!(output.contains("fleetrun_queue_depth 3"));
        assert!(output.contains("fleetrun_jobs_submitted_total 1"));
    }
}
