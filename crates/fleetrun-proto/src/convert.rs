//! Converters between domain types and wire messages.

use fleetrun_core::{Job, Task, Worker};

use crate::{Assignment, JobStatusResponse, WorkerSummary};

// ============================================================================
// Job conversions
// ============================================================================

impl From<&Job> for JobStatusResponse {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            name: job.spec.name.clone(),
            status: job.status,
            progress: job.progress(),
            completed_tasks: job.completed_tasks,
            failed_tasks: job.failed_tasks,
            cancelled_tasks: job.cancelled_tasks,
            total_tasks: job.total_tasks,
            aggregate_metrics: job.aggregate_metrics.clone(),
            submitted_by: job.submitted_by.clone(),
            created_at: job.created_at,
            last_updated_at: job.last_updated_at,
            finished_at: job.finished_at,
        }
    }
}

// ============================================================================
// Task conversions
// ============================================================================

impl Assignment {
    /// Build the payload handed to a worker for `task` of `job`.
    pub fn for_task(task: &Task, job: &Job) -> Self {
        Self {
            task_id: task.id.clone(),
            job_id: task.job_id.clone(),
            ordinal: task.ordinal,
            unit_start: task.unit_start,
            unit_end: task.unit_end,
            task_template: job.spec.task_template.clone(),
            data_ref: job.spec.data_ref.clone(),
            parameters: job.spec.parameters.clone(),
            attempt: task.attempt(),
        }
    }
}

// ============================================================================
// Worker conversions
// ============================================================================

impl From<&Worker> for WorkerSummary {
    fn from(worker: &Worker) -> Self {
        Self {
            worker_id: worker.id.clone(),
            hostname: worker.capability.hostname.clone(),
            tags: worker.capability.tags.clone(),
            status: worker.status,
            current_task_id: worker.current_task_id().cloned(),
            current_tasks: worker.current_tasks.iter().cloned().collect(),
            max_concurrent_tasks: worker.capability.max_concurrent_tasks,
            completed_count: worker.completed_count,
            failed_count: worker.failed_count,
            last_heartbeat_at: worker.last_heartbeat_at,
            registered_at: worker.registered_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fleetrun_core::{JobSpec, TaskId, TaskTemplate, WorkerCapability, WorkerId};

    #[test]
    fn test_assignment_carries_job_payload() {
        let spec = JobSpec::new("iris", TaskTemplate::new("train"), 4, "datasets/iris.csv")
            .with_parameter("learning_rate", "0.01");
        let job = Job::new(spec, "alice", 1);
        let mut task = job.spec.decompose(&job.id).remove(2);
        task.retry_count = 1;

        let assignment = Assignment::for_task(&task, &job);
        assert_eq!(assignment.ordinal, 2);
        assert_eq!(assignment.unit_start, 2);
        assert_eq!(assignment.task_template.kind, "train");
        assert_eq!(assignment.parameters["learning_rate"], "0.01");
        assert_eq!(assignment.attempt, 2);
    }

    #[test]
    fn test_worker_summary() {
        let cap = WorkerCapability::new("node-1").with_tag("gpu");
        let mut worker = Worker::new(WorkerId::new("w1"), cap, Utc::now());
        worker.hold(TaskId::new("t1"));

        let summary = WorkerSummary::from(&worker);
        assert_eq!(summary.hostname, "node-1");
        assert_eq!(summary.current_task_id, Some(TaskId::new("t1")));
        assert!(summary.tags.contains("gpu"));
    }
}
