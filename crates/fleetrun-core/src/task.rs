//! Task types and their state transitions.

use crate::{CoreError, JobId, TaskId, TaskStatus, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The smallest schedulable unit of work within a Job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier.
    pub id: TaskId,

    /// Owning job.
    pub job_id: JobId,

    /// Position within the job (0-based, enqueue order).
    pub ordinal: u32,

    /// First unit covered by this task (inclusive).
    pub unit_start: u64,

    /// Last unit covered by this task (exclusive).
    pub unit_end: u64,

    /// Current task status.
    pub status: TaskStatus,

    /// Worker currently holding the task, if any.
    pub assigned_worker_id: Option<WorkerId>,

    /// Number of payload failures so far.
    pub retry_count: u32,

    /// Number of times the task was reclaimed from a dead or stuck worker.
    pub reassignment_count: u32,

    /// When the task was created.
    pub created_at: DateTime<Utc>,

    /// When the current assignment started.
    pub assigned_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,

    /// Result of a successful execution.
    pub result: Option<TaskResult>,

    /// Error reported by the last failed attempt.
    pub last_error: Option<String>,
}

impl Task {
    /// Create a new pending Task covering `[unit_start, unit_end)`.
    pub fn new(job_id: JobId, ordinal: u32, unit_start: u64, unit_end: u64) -> Self {
        Self {
            id: TaskId::generate(),
            job_id,
            ordinal,
            unit_start,
            unit_end,
            status: TaskStatus::Pending,
            assigned_worker_id: None,
            retry_count: 0,
            reassignment_count: 0,
            created_at: Utc::now(),
            assigned_at: None,
            completed_at: None,
            result: None,
            last_error: None,
        }
    }

    /// 1-based number of the current execution attempt.
    ///
    /// Every release bumps one of the two counters, so each assignment of
    /// a task carries a distinct attempt.
    pub fn attempt(&self) -> u32 {
        self.retry_count + self.reassignment_count + 1
    }

    /// Check whether `worker_id` holds the task for `attempt`.
    pub fn is_held_for(&self, worker_id: &WorkerId, attempt: u32) -> bool {
        self.is_held_by(worker_id) && self.attempt() == attempt
    }

    /// Number of units covered by this task.
    pub fn unit_count(&self) -> u64 {
        self.unit_end - self.unit_start
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check if a worker currently holds the task.
    pub fn is_in_flight(&self) -> bool {
        self.status == TaskStatus::Assigned
    }

    /// Check whether `worker_id` is the current holder.
    pub fn is_held_by(&self, worker_id: &WorkerId) -> bool {
        self.is_in_flight() && self.assigned_worker_id.as_ref() == Some(worker_id)
    }

    /// PENDING -> ASSIGNED. Succeeds only if the task is still pending.
    pub fn assign(&mut self, worker_id: WorkerId, now: DateTime<Utc>) -> Result<(), CoreError> {
        self.expect_status(TaskStatus::Pending, TaskStatus::Assigned)?;
        self.status = TaskStatus::Assigned;
        self.assigned_worker_id = Some(worker_id);
        self.assigned_at = Some(now);
        Ok(())
    }

    /// ASSIGNED -> PENDING, clearing the holder.
    pub fn release(&mut self) -> Result<(), CoreError> {
        self.expect_status(TaskStatus::Assigned, TaskStatus::Pending)?;
        self.status = TaskStatus::Pending;
        self.assigned_worker_id = None;
        self.assigned_at = None;
        Ok(())
    }

    /// Mark the task as completed with its result.
    pub fn complete(&mut self, result: TaskResult, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(now);
    }

    /// Mark the task as terminally failed.
    pub fn fail(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.last_error = Some(error.into());
        self.completed_at = Some(now);
    }

    /// Mark the task as cancelled.
    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(now);
    }

    fn expect_status(&self, expected: TaskStatus, next: TaskStatus) -> Result<(), CoreError> {
        if self.status != expected {
            return Err(CoreError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        Ok(())
    }
}

/// Outcome payload of a successful task execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Numeric metrics (e.g. loss, accuracy) merged into the job aggregate.
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,

    /// Free-form message from the executor.
    #[serde(default)]
    pub message: Option<String>,
}

impl TaskResult {
    /// Builder method to add a metric.
    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    /// Builder method to set the message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assign_only_from_pending() {
        let mut task = Task::new(JobId::generate(), 0, 0, 1);
        let now = Utc::now();

        task.assign(WorkerId::new("w1"), now).unwrap();
        assert!(task.is_held_by(&WorkerId::new("w1")));

        // A second assignment must fail: the task already has an owner.
        let err = task.assign(WorkerId::new("w2"), now).unwrap_err();
        assert!(matches!(err, CoreError::InvalidStateTransition { .. }));
        assert_eq!(task.assigned_worker_id, Some(WorkerId::new("w1")));
    }

    #[test]
    fn test_release_clears_holder() {
        let mut task = Task::new(JobId::generate(), 3, 30, 40);
        task.assign(WorkerId::new("w1"), Utc::now()).unwrap();
        task.release().unwrap();

        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.assigned_worker_id.is_none());
        assert!(task.release().is_err());
        assert_eq!(task.unit_count(), 10);
    }

    #[test]
    fn test_each_assignment_has_its_own_attempt() {
        let worker = WorkerId::new("w1");
        let mut task = Task::new(JobId::generate(), 0, 0, 1);
        task.assign(worker.clone(), Utc::now()).unwrap();
        assert_eq!(task.attempt(), 1);
        assert!(task.is_held_for(&worker, 1));

        task.retry_count += 1;
        task.release().unwrap();
        task.assign(worker.clone(), Utc::now()).unwrap();
        assert_eq!(task.attempt(), 2);
        assert!(!task.is_held_for(&worker, 1));

        task.reassignment_count += 1;
        task.release().unwrap();
        task.assign(worker.clone(), Utc::now()).unwrap();
        assert!(task.is_held_for(&worker, 3));
        assert!(!task.is_held_for(&WorkerId::new("w2"), 3));
    }

    #[test]
    fn test_result_builder() {
        let result = TaskResult::default()
            .with_metric("loss", 0.25)
            .with_message("ok");
        assert_eq!(result.metrics.get("loss"), Some(&0.25));
        assert_eq!(result.message.as_deref(), Some("ok"));
    }
}
