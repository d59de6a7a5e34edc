//! Request and response messages.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fleetrun_core::{
    AggregateMetrics, JobId, JobSpec, JobStatus, TaskId, TaskResult, TaskTemplate,
    WorkerCapability, WorkerId, WorkerStatus,
};

// ============================================================================
// Job types
// ============================================================================

/// Body of `SubmitJob`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobRequest {
    pub spec: JobSpec,

    /// Identity resolved by the request router.
    #[serde(default)]
    pub submitted_by: String,
}

/// Response of `SubmitJob`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub total_tasks: u32,
}

/// Status snapshot returned by `GetJobStatus` and `ListJobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: JobId,
    pub name: String,
    pub status: JobStatus,
    pub progress: f64,
    pub completed_tasks: u32,
    pub failed_tasks: u32,
    pub cancelled_tasks: u32,
    pub total_tasks: u32,
    pub aggregate_metrics: AggregateMetrics,
    pub submitted_by: String,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Response of `ListJobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListJobsResponse {
    pub jobs: Vec<JobStatusResponse>,
}

/// Response of `CancelJob`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelJobResponse {
    pub accepted: bool,
    pub status: JobStatus,
}

// ============================================================================
// Worker types
// ============================================================================

/// Body of `RegisterWorker`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorkerRequest {
    pub capability: WorkerCapability,
}

/// Response of `RegisterWorker`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterWorkerResponse {
    pub worker_id: WorkerId,

    /// Interval the control plane expects heartbeats at.
    pub heartbeat_interval_ms: u64,
}

/// Body of `Heartbeat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub status: WorkerStatus,
    pub current_task_id: Option<TaskId>,

    /// Every task the worker is running, for multi-slot workers.
    #[serde(default)]
    pub current_tasks: Vec<TaskId>,

    /// Capability to re-admit the worker with if the control plane no
    /// longer knows it. Replaces the recorded capability when present.
    #[serde(default)]
    pub capability: Option<WorkerCapability>,
}

impl HeartbeatRequest {
    pub fn new(status: WorkerStatus, current_tasks: Vec<TaskId>) -> Self {
        Self {
            status,
            current_task_id: current_tasks.first().cloned(),
            current_tasks,
            capability: None,
        }
    }

    pub fn with_capability(mut self, capability: WorkerCapability) -> Self {
        self.capability = Some(capability);
        self
    }

    /// Every task the worker says it is running.
    pub fn reported_tasks(&self) -> Vec<TaskId> {
        let mut tasks = self.current_tasks.clone();
        if let Some(task_id) = &self.current_task_id {
            if !tasks.contains(task_id) {
                tasks.push(task_id.clone());
            }
        }
        tasks
    }
}

/// Response of `Heartbeat`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub ack: bool,

    /// The worker had been expired and was registered afresh.
    #[serde(default)]
    pub readmitted: bool,

    /// Held tasks whose job is being cancelled.
    #[serde(default)]
    pub cancelled_task_ids: Vec<TaskId>,
}

/// Body of `RequestTask`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestTaskRequest {
    /// Overrides the capability given at registration.
    #[serde(default)]
    pub capability: Option<WorkerCapability>,
}

/// Work handed to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub task_id: TaskId,
    pub job_id: JobId,
    pub ordinal: u32,
    pub unit_start: u64,
    pub unit_end: u64,
    pub task_template: TaskTemplate,
    pub data_ref: String,
    pub parameters: BTreeMap<String, String>,

    /// 1-based execution attempt for this task.
    pub attempt: u32,
}

/// Response of `RequestTask`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestTaskResponse {
    pub task: Option<Assignment>,
}

/// Body of `ReportTaskResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportTaskResultRequest {
    pub worker_id: WorkerId,
    pub success: bool,
    #[serde(default)]
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub error: Option<String>,

    /// Attempt this report belongs to, copied from [`Assignment::attempt`].
    /// Reports for any other attempt are ignored as stale.
    #[serde(default)]
    pub attempt: Option<u32>,
}

impl ReportTaskResultRequest {
    /// Report a successful execution.
    pub fn success(worker_id: WorkerId, result: TaskResult) -> Self {
        Self {
            worker_id,
            success: true,
            result: Some(result),
            error: None,
            attempt: None,
        }
    }

    /// Report a failed execution.
    pub fn failure(worker_id: WorkerId, error: impl Into<String>) -> Self {
        Self {
            worker_id,
            success: false,
            result: None,
            error: Some(error.into()),
            attempt: None,
        }
    }

    /// Tie the report to one execution attempt.
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }
}

/// Response of `ReportTaskResult`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTaskResultResponse {
    pub ack: bool,

    /// False when the report was ignored (stale or duplicate).
    pub accepted: bool,

    /// The task was already terminal.
    pub duplicate: bool,
}

/// One row of `ListWorkers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub worker_id: WorkerId,
    pub hostname: String,
    pub tags: BTreeSet<String>,
    pub status: WorkerStatus,
    pub current_task_id: Option<TaskId>,
    pub current_tasks: Vec<TaskId>,
    pub max_concurrent_tasks: u32,
    pub completed_count: u64,
    pub failed_count: u64,
    pub last_heartbeat_at: DateTime<Utc>,
    pub registered_at: DateTime<Utc>,
}

/// Response of `ListWorkers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListWorkersResponse {
    pub workers: Vec<WorkerSummary>,
}

// ============================================================================
// Error types
// ============================================================================

/// Error body returned with any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}
