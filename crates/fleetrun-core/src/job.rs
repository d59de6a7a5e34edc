//! Job specification, job record, and decomposition into tasks.

use crate::{AggregateMetrics, CoreError, JobId, JobStatus, Task};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Upper bound on tasks produced by a single job.
pub const MAX_TASKS_PER_JOB: u64 = 100_000;

fn default_units_per_task() -> u64 {
    1
}

/// Opaque description of what each task executes.
///
/// The control plane never interprets `parameters`; it is handed verbatim
/// to the worker's executor for `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskTemplate {
    /// Executor kind on the worker (e.g. "train", "echo").
    pub kind: String,

    /// Executor-specific parameters.
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl TaskTemplate {
    /// Create a template with empty parameters.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            parameters: serde_json::Value::Null,
        }
    }
}

/// Client-supplied job specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Human-readable name.
    pub name: String,

    /// What each task runs.
    pub task_template: TaskTemplate,

    /// Total number of work units.
    pub unit_count: u64,

    /// Units grouped into one task.
    #[serde(default = "default_units_per_task")]
    pub units_per_task: u64,

    /// Opaque reference to the input dataset/artifact.
    pub data_ref: String,

    /// Client parameters (hyperparameters etc.), passed through to workers.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,

    /// Tags a worker must advertise to receive this job's tasks.
    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,

    /// Higher priority jobs are dequeued first.
    #[serde(default)]
    pub priority: i32,

    /// Per-job override of the retry budget.
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl JobSpec {
    /// Create a spec with one task per unit.
    pub fn new(
        name: impl Into<String>,
        task_template: TaskTemplate,
        unit_count: u64,
        data_ref: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            task_template,
            unit_count,
            units_per_task: 1,
            data_ref: data_ref.into(),
            parameters: BTreeMap::new(),
            required_capabilities: BTreeSet::new(),
            priority: 0,
            max_retries: None,
        }
    }

    /// Builder method to batch several units into one task.
    pub fn with_units_per_task(mut self, units: u64) -> Self {
        self.units_per_task = units;
        self
    }

    /// Builder method to add a required worker capability.
    pub fn with_capability(mut self, tag: impl Into<String>) -> Self {
        self.required_capabilities.insert(tag.into());
        self
    }

    /// Builder method to add a client parameter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Builder method to set priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Builder method to override the retry budget.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Structural validation. Resolving `data_ref` is the coordinator's job.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.task_template.kind.trim().is_empty() {
            return Err(CoreError::InvalidSpec("task template kind is empty".into()));
        }
        if self.unit_count == 0 {
            return Err(CoreError::InvalidSpec("unit_count must be positive".into()));
        }
        if self.units_per_task == 0 {
            return Err(CoreError::InvalidSpec("units_per_task must be positive".into()));
        }
        if self.data_ref.trim().is_empty() {
            return Err(CoreError::InvalidSpec("data_ref is empty".into()));
        }
        if self.max_retries == Some(0) {
            return Err(CoreError::InvalidSpec("max_retries must be at least 1".into()));
        }
        if self.task_count() > MAX_TASKS_PER_JOB {
            return Err(CoreError::InvalidSpec(format!(
                "job decomposes into {} tasks (limit {})",
                self.task_count(),
                MAX_TASKS_PER_JOB
            )));
        }
        Ok(())
    }

    /// Number of tasks this spec decomposes into.
    pub fn task_count(&self) -> u64 {
        self.unit_count.div_ceil(self.units_per_task.max(1))
    }

    /// Split the job into contiguous unit ranges, one task per range.
    ///
    /// The result depends only on the spec, so the same spec always yields
    /// the same ordinals and ranges.
    pub fn decompose(&self, job_id: &JobId) -> Vec<Task> {
        let step = self.units_per_task.max(1);
        (0..self.task_count())
            .map(|ordinal| {
                let start = ordinal * step;
                let end = (start + step).min(self.unit_count);
                Task::new(job_id.clone(), ordinal as u32, start, end)
            })
            .collect()
    }
}

/// Authoritative job record owned by the job coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub id: JobId,

    /// Submitted specification.
    pub spec: JobSpec,

    /// Current job status.
    pub status: JobStatus,

    /// Number of tasks produced by decomposition.
    pub total_tasks: u32,

    /// Tasks finished successfully.
    pub completed_tasks: u32,

    /// Tasks that exhausted their budgets.
    pub failed_tasks: u32,

    /// Tasks dropped by cancellation.
    pub cancelled_tasks: u32,

    /// Identity forwarded by the request router.
    pub submitted_by: String,

    /// Monotonic submission order, used for queue tie-breaks.
    pub submission_seq: u64,

    /// When the job was created.
    pub created_at: DateTime<Utc>,

    /// When the job last changed.
    pub last_updated_at: DateTime<Utc>,

    /// When the job reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,

    /// Metrics folded from successful task results.
    pub aggregate_metrics: AggregateMetrics,
}

impl Job {
    /// Create a new Job in SUBMITTED.
    pub fn new(spec: JobSpec, submitted_by: impl Into<String>, submission_seq: u64) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::generate(),
            spec,
            status: JobStatus::Submitted,
            total_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            cancelled_tasks: 0,
            submitted_by: submitted_by.into(),
            submission_seq,
            created_at: now,
            last_updated_at: now,
            finished_at: None,
            aggregate_metrics: AggregateMetrics::default(),
        }
    }

    /// Fraction of tasks completed, in `[0, 1]`.
    pub fn progress(&self) -> f64 {
        if self.total_tasks == 0 {
            return 0.0;
        }
        f64::from(self.completed_tasks) / f64::from(self.total_tasks)
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Every task has reached COMPLETED or FAILED.
    pub fn all_tasks_finished(&self) -> bool {
        self.completed_tasks + self.failed_tasks >= self.total_tasks
    }

    /// Move through the job state machine.
    pub fn transition(&mut self, next: JobStatus, now: DateTime<Utc>) -> Result<(), CoreError> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.last_updated_at = now;
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        Ok(())
    }
}
