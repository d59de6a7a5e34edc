//! Status enums for Jobs, Tasks, and Workers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a Job in the control plane.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Job accepted, not yet decomposed.
    #[default]
    Submitted,
    /// Tasks created, enqueue in progress.
    Queued,
    /// Tasks are in the queue or executing.
    Running,
    /// Cancel requested; waiting for in-flight tasks to drain.
    Cancelling,
    /// Every task completed successfully.
    Completed,
    /// Every task finished, at least one of them failed.
    FailedPartial,
    /// Cancelled and drained.
    Cancelled,
}

impl JobStatus {
    /// Returns true if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::FailedPartial | Self::Cancelled)
    }

    /// Whether the job state machine allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Submitted, Queued)
                | (Queued, Running)
                | (Queued, Cancelling)
                | (Running, Completed)
                | (Running, FailedPartial)
                | (Running, Cancelling)
                | (Cancelling, Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Submitted => "SUBMITTED",
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Cancelling => "CANCELLING",
            Self::Completed => "COMPLETED",
            Self::FailedPartial => "FAILED_PARTIAL",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Status of a single Task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Waiting in the queue.
    #[default]
    Pending,
    /// Held by exactly one worker.
    Assigned,
    /// Finished successfully.
    Completed,
    /// Retry budget (or reassignment budget) exhausted.
    Failed,
    /// Dropped because its job was cancelled.
    Cancelled,
}

impl TaskStatus {
    /// Returns true if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Assigned => "ASSIGNED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Liveness/utilization status of a Worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    /// Worker is alive and holds no task.
    #[default]
    Idle,
    /// Worker is alive and holds at least one task.
    Busy,
    /// Heartbeats lapsed past the liveness timeout.
    Unreachable,
}

impl WorkerStatus {
    /// Returns true if the worker can be handed new tasks.
    pub fn can_accept_tasks(&self) -> bool {
        matches!(self, Self::Idle | Self::Busy)
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "IDLE",
            Self::Busy => "BUSY",
            Self::Unreachable => "UNREACHABLE",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_job_states_have_no_exits() {
        let all = [
            JobStatus::Submitted,
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Cancelling,
            JobStatus::Completed,
            JobStatus::FailedPartial,
            JobStatus::Cancelled,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in all {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        assert!(JobStatus::Submitted.can_transition_to(JobStatus::Queued));
        assert!(JobStatus::Queued.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Submitted.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&JobStatus::FailedPartial).unwrap();
        assert_eq!(json, "\"FAILED_PARTIAL\"");
        assert_eq!(JobStatus::FailedPartial.to_string(), "FAILED_PARTIAL");
    }
}
