//! Job coordinator.
//!
//! Owns the job lifecycle: submission and decomposition, cancellation,
//! task result reports and reclaiming tasks from lost or stuck workers.
//! Every counter on a job is mutated here and nowhere else.
//!
//! Locking: a job lock is never held while calling into the queue or the
//! worker registry. Work that needs them is collected under the job lock and
//! carried out after it is released.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use fleetrun_core::{
    CoreError, Job, JobId, JobSpec, JobStatus, Task, TaskId, TaskStatus, WorkerId,
};
use fleetrun_proto::{CancelJobResponse, ReportTaskResultRequest, ReportTaskResultResponse};

use crate::events::{JobEvent, MetricsSink};
use crate::metrics::Counters;
use crate::queue::{QueueItem, TaskQueue};
use crate::registry::WorkerRegistry;
use crate::resolver::DatasetResolver;
use crate::store::{JobEntry, JobStore};

/// Failure budgets applied to every task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Execution attempts before a task is failed. A job spec may override it.
    pub max_retries: u32,

    /// Reclaims from dead or stuck workers before a task is failed.
    /// Counted separately from `max_retries`.
    pub max_reassignments: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_reassignments: 5,
        }
    }
}

/// How a task report was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The report changed the task.
    Accepted,
    /// The task was already terminal; nothing changed.
    Duplicate,
    /// The reporting worker no longer holds the task; nothing changed.
    Stale,
}

impl ReportOutcome {
    pub fn response(self) -> ReportTaskResultResponse {
        ReportTaskResultResponse {
            ack: true,
            accepted: self == Self::Accepted,
            duplicate: self == Self::Duplicate,
        }
    }
}

/// Why a task is taken away from its worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimReason {
    /// The worker stopped heartbeating.
    WorkerLost,
    /// The task exceeded the execution timeout.
    Timeout,
}

impl fmt::Display for ReclaimReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkerLost => write!(f, "worker lost"),
            Self::Timeout => write!(f, "execution timeout"),
        }
    }
}

/// An assignment that overran the execution timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StuckTask {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    /// Attempt observed when the task was found; reclaim skips any later one.
    pub attempt: u32,
}

/// Job coordinator.
pub struct JobCoordinator {
    store: Arc<JobStore>,
    queue: Arc<TaskQueue>,
    registry: Arc<WorkerRegistry>,
    resolver: Arc<dyn DatasetResolver>,
    sink: Arc<dyn MetricsSink>,
    counters: Arc<Counters>,
    policy: RetryPolicy,
}

impl JobCoordinator {
    pub fn new(
        store: Arc<JobStore>,
        queue: Arc<TaskQueue>,
        registry: Arc<WorkerRegistry>,
        resolver: Arc<dyn DatasetResolver>,
        sink: Arc<dyn MetricsSink>,
        counters: Arc<Counters>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            resolver,
            sink,
            counters,
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Validate, decompose, persist and enqueue a job.
    ///
    /// Either every task is enqueued or none is: a persistence failure
    /// leaves no trace of the job.
    pub async fn submit(&self, spec: JobSpec, submitted_by: &str) -> Result<Job, CoreError> {
        spec.validate()?;
        self.resolver.resolve(&spec.data_ref).await?;

        let mut job = Job::new(spec, submitted_by, self.store.next_submission_seq());
        let tasks = job.spec.decompose(&job.id);
        job.total_tasks = tasks.len() as u32;
        job.transition(JobStatus::Queued, Utc::now())?;

        let items: Vec<QueueItem> = tasks.iter().map(|t| QueueItem::new(&job, t)).collect();
        let queued = JobEvent::from_job(&job);

        let handle = self.store.insert(JobEntry::new(job, tasks)).await?;
        self.sink.record(queued);
        self.queue.enqueue_all(items).await;

        let mut events = Vec::new();
        let job = {
            let mut guard = handle.lock().await;
            let entry = &mut *guard;
            if entry.job.status == JobStatus::Queued {
                let now = Utc::now();
                entry.job.transition(JobStatus::Running, now)?;
                events.push(JobEvent::from_job(&entry.job));
                events.extend(self.settle(entry, now));
                self.store.persist(entry).await;
            }
            entry.job.clone()
        };

        Counters::incr(&self.counters.jobs_submitted);
        info!(
            job_id = %job.id,
            name = %job.spec.name,
            total_tasks = job.total_tasks,
            priority = job.spec.priority,
            submitted_by = %job.submitted_by,
            "Job submitted"
        );
        self.emit(events);
        Ok(job)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Snapshot of one job.
    pub async fn job(&self, job_id: &JobId) -> Result<Job, CoreError> {
        let handle = self
            .store
            .get(job_id)
            .await
            .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))?;
        let job = handle.lock().await.job.clone();
        Ok(job)
    }

    /// Snapshot of one job's tasks in ordinal order.
    pub async fn tasks(&self, job_id: &JobId) -> Result<Vec<Task>, CoreError> {
        let handle = self
            .store
            .get(job_id)
            .await
            .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))?;
        let tasks = handle.lock().await.tasks.clone();
        Ok(tasks)
    }

    /// Snapshot of every job in submission order.
    pub async fn list(&self) -> Vec<Job> {
        let mut jobs = Vec::new();
        for handle in self.store.handles().await {
            jobs.push(handle.lock().await.job.clone());
        }
        jobs.sort_by_key(|job| job.submission_seq);
        jobs
    }

    /// Which of `held` belong to a job that is being cancelled.
    pub async fn cancelled_among(&self, held: &[TaskId]) -> Vec<TaskId> {
        let mut cancelled = Vec::new();
        for task_id in held {
            let Some((handle, ordinal)) = self.store.locate(task_id).await else {
                continue;
            };
            let entry = handle.lock().await;
            let in_flight = entry.task(ordinal).is_some_and(Task::is_in_flight);
            if entry.job.status == JobStatus::Cancelling && in_flight {
                cancelled.push(task_id.clone());
            }
        }
        cancelled
    }

    /// Tasks assigned for longer than `timeout`, with their holders.
    pub async fn timed_out_tasks(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<StuckTask> {
        let mut stuck = Vec::new();
        for handle in self.store.handles().await {
            let entry = handle.lock().await;
            for task in entry.tasks.iter().filter(|t| t.is_in_flight()) {
                let (Some(assigned_at), Some(worker_id)) = (task.assigned_at, &task.assigned_worker_id)
                else {
                    continue;
                };
                if now.signed_duration_since(assigned_at) > timeout {
                    stuck.push(StuckTask {
                        task_id: task.id.clone(),
                        worker_id: worker_id.clone(),
                        attempt: task.attempt(),
                    });
                }
            }
        }
        stuck
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Stop a job. Pending tasks are cancelled at once; in-flight tasks are
    /// told through heartbeats and the job settles when they are gone.
    pub async fn cancel(&self, job_id: &JobId) -> Result<CancelJobResponse, CoreError> {
        let handle = self
            .store
            .get(job_id)
            .await
            .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))?;

        let mut events = Vec::new();
        let status = {
            let mut guard = handle.lock().await;
            let entry = &mut *guard;
            if entry.job.is_terminal() || entry.job.status == JobStatus::Cancelling {
                debug!(job_id = %job_id, status = %entry.job.status, "Cancel ignored");
                return Ok(CancelJobResponse {
                    accepted: false,
                    status: entry.job.status,
                });
            }

            let now = Utc::now();
            entry.job.transition(JobStatus::Cancelling, now)?;
            let mut dropped = 0;
            for task in entry
                .tasks
                .iter_mut()
                .filter(|t| t.status == TaskStatus::Pending)
            {
                task.cancel(now);
                dropped += 1;
            }
            entry.job.cancelled_tasks += dropped;

            info!(
                job_id = %job_id,
                cancelled_tasks = dropped,
                in_flight = entry.in_flight(),
                "Job cancelling"
            );
            events.push(JobEvent::from_job(&entry.job));
            events.extend(self.settle(entry, now));
            self.store.persist(entry).await;
            entry.job.status
        };

        self.queue.remove_job(job_id).await;
        self.emit(events);
        Ok(CancelJobResponse {
            accepted: true,
            status,
        })
    }

    // ========================================================================
    // Reports
    // ========================================================================

    /// Apply a worker's report for `task_id`.
    ///
    /// Reports for terminal tasks are acknowledged as duplicates. Reports
    /// from a worker that no longer holds the task, or that name an attempt
    /// other than the current one, are ignored as stale.
    pub async fn report(
        &self,
        task_id: &TaskId,
        report: &ReportTaskResultRequest,
    ) -> Result<ReportOutcome, CoreError> {
        let (handle, ordinal) = self
            .store
            .locate(task_id)
            .await
            .ok_or_else(|| CoreError::TaskNotFound(task_id.to_string()))?;
        let worker_id = &report.worker_id;
        let now = Utc::now();

        let mut events = Vec::new();
        let mut requeue = None;
        let outcome = {
            let mut guard = handle.lock().await;
            let entry = &mut *guard;
            let max_retries = entry
                .job
                .spec
                .max_retries
                .unwrap_or(self.policy.max_retries)
                .max(1);
            let cancelling = entry.job.status == JobStatus::Cancelling;
            let task = entry
                .tasks
                .get_mut(ordinal as usize)
                .ok_or_else(|| CoreError::TaskNotFound(task_id.to_string()))?;

            if task.is_terminal() {
                let duplicate = CoreError::DuplicateReport(task_id.to_string());
                info!(
                    worker_id = %worker_id,
                    status = %task.status,
                    error = %duplicate,
                    "Ignoring report"
                );
                ReportOutcome::Duplicate
            } else if !task.is_held_by(worker_id) {
                warn!(
                    task_id = %task_id,
                    worker_id = %worker_id,
                    holder = ?task.assigned_worker_id,
                    "Ignoring report from a worker that does not hold the task"
                );
                ReportOutcome::Stale
            } else if report
                .attempt
                .is_some_and(|attempt| !task.is_held_for(worker_id, attempt))
            {
                warn!(
                    task_id = %task_id,
                    worker_id = %worker_id,
                    reported = ?report.attempt,
                    current = task.attempt(),
                    "Ignoring report for an earlier attempt"
                );
                ReportOutcome::Stale
            } else {
                if report.success {
                    let result = report.result.clone().unwrap_or_default();
                    entry.job.aggregate_metrics.merge(&result.metrics);
                    task.complete(result, now);
                    entry.job.completed_tasks += 1;
                    info!(
                        task_id = %task_id,
                        worker_id = %worker_id,
                        job_id = %entry.job.id,
                        completed = entry.job.completed_tasks,
                        total = entry.job.total_tasks,
                        "Task completed"
                    );
                } else {
                    let error = report
                        .error
                        .clone()
                        .unwrap_or_else(|| "unspecified failure".to_string());
                    let failure = CoreError::TaskExecutionFailure {
                        task: task_id.to_string(),
                        message: error.clone(),
                    };

                    if cancelling {
                        task.last_error = Some(error);
                        task.cancel(now);
                        entry.job.cancelled_tasks += 1;
                        info!(task_id = %task_id, "Task failed while its job is cancelling");
                    } else {
                        task.retry_count += 1;
                        if task.retry_count < max_retries {
                            task.last_error = Some(error);
                            task.release()?;
                            requeue = Some(QueueItem::new(&entry.job, task));
                            warn!(
                                error = %failure,
                                attempt = task.retry_count,
                                max_retries,
                                "Task failed, requeueing"
                            );
                        } else {
                            task.fail(error, now);
                            entry.job.failed_tasks += 1;
                            warn!(
                                error = %failure,
                                attempts = task.retry_count,
                                "Task failed, retry budget exhausted"
                            );
                        }
                    }
                }

                entry.job.last_updated_at = now;
                events.extend(self.settle(entry, now));
                self.store.persist(entry).await;
                ReportOutcome::Accepted
            }
        };

        match outcome {
            ReportOutcome::Accepted => {
                Counters::incr(&self.counters.reports_accepted);
                self.registry
                    .release(worker_id, task_id, Some(report.success))
                    .await;
            }
            ReportOutcome::Duplicate => Counters::incr(&self.counters.reports_duplicate),
            ReportOutcome::Stale => Counters::incr(&self.counters.reports_stale),
        }
        if let Some(item) = requeue {
            self.queue.enqueue(item).await;
        }
        self.emit(events);
        Ok(outcome)
    }

    // ========================================================================
    // Reclaiming
    // ========================================================================

    /// Take `task_id` back from `worker_id`.
    ///
    /// The task returns to PENDING at its original queue position without
    /// touching its retry budget. Once `max_reassignments` is exceeded it is
    /// failed instead. Returns false if the worker no longer held the task,
    /// or when `attempt` is given and the task has moved on to another one.
    pub async fn reclaim(
        &self,
        task_id: &TaskId,
        worker_id: &WorkerId,
        attempt: Option<u32>,
        reason: ReclaimReason,
        now: DateTime<Utc>,
    ) -> Result<bool, CoreError> {
        let Some((handle, ordinal)) = self.store.locate(task_id).await else {
            return Ok(false);
        };

        let mut events = Vec::new();
        let mut requeue = None;
        {
            let mut guard = handle.lock().await;
            let entry = &mut *guard;
            let cancelling = entry.job.status == JobStatus::Cancelling;
            let Some(task) = entry.tasks.get_mut(ordinal as usize) else {
                return Ok(false);
            };
            let held = match attempt {
                Some(attempt) => task.is_held_for(worker_id, attempt),
                None => task.is_held_by(worker_id),
            };
            if !held {
                debug!(task_id = %task_id, worker_id = %worker_id, reason = %reason, "Nothing to reclaim");
                return Ok(false);
            }

            if cancelling {
                task.cancel(now);
                entry.job.cancelled_tasks += 1;
            } else {
                task.reassignment_count += 1;
                if task.reassignment_count > self.policy.max_reassignments {
                    let error = CoreError::WorkerUnreachable(format!(
                        "{reason}; reassignment budget of {} exhausted",
                        self.policy.max_reassignments
                    ));
                    warn!(task_id = %task_id, worker_id = %worker_id, error = %error, "Task failed");
                    task.fail(error.to_string(), now);
                    entry.job.failed_tasks += 1;
                } else {
                    task.release()?;
                    requeue = Some(QueueItem::new(&entry.job, task));
                    info!(
                        task_id = %task_id,
                        worker_id = %worker_id,
                        reason = %reason,
                        reassignments = task.reassignment_count,
                        "Task reclaimed"
                    );
                }
            }

            entry.job.last_updated_at = now;
            events.extend(self.settle(entry, now));
            self.store.persist(entry).await;
        }

        match reason {
            ReclaimReason::WorkerLost => {
                Counters::incr(&self.counters.tasks_reclaimed_worker_lost)
            }
            ReclaimReason::Timeout => Counters::incr(&self.counters.tasks_reclaimed_timeout),
        }
        self.registry.release(worker_id, task_id, None).await;
        if let Some(item) = requeue {
            self.queue.enqueue(item).await;
        }
        self.emit(events);
        Ok(true)
    }

    // ========================================================================
    // Restore
    // ========================================================================

    /// Load persisted jobs after a restart.
    ///
    /// Assignments are not durable: tasks that were ASSIGNED go back to
    /// PENDING and are re-indexed. Returns the number of jobs restored.
    pub async fn restore(&self) -> Result<usize, CoreError> {
        let mut entries = self.store.load_persisted().await?;
        entries.sort_by_key(|entry| entry.job.submission_seq);

        let now = Utc::now();
        let mut requeued = 0;
        let count = entries.len();

        for mut entry in entries {
            let mut events = Vec::new();
            let mut changed = false;

            for task in entry.tasks.iter_mut().filter(|t| t.is_in_flight()) {
                task.release()?;
                changed = true;
            }

            match entry.job.status {
                JobStatus::Cancelling => {
                    let mut dropped = 0;
                    for task in entry
                        .tasks
                        .iter_mut()
                        .filter(|t| t.status == TaskStatus::Pending)
                    {
                        task.cancel(now);
                        dropped += 1;
                    }
                    entry.job.cancelled_tasks += dropped;
                    changed |= dropped > 0;
                }
                JobStatus::Queued => {
                    entry.job.transition(JobStatus::Running, now)?;
                    events.push(JobEvent::from_job(&entry.job));
                    changed = true;
                }
                _ => {}
            }

            if let Some(event) = self.settle(&mut entry, now) {
                events.push(event);
                changed = true;
            }
            if changed {
                self.store.persist(&entry).await;
            }

            let items: Vec<QueueItem> = if entry.job.status == JobStatus::Running {
                entry
                    .pending()
                    .map(|task| QueueItem::new(&entry.job, task))
                    .collect()
            } else {
                Vec::new()
            };
            requeued += items.len();

            debug!(job_id = %entry.job.id, status = %entry.job.status, pending = items.len(), "Job restored");
            self.store.register(entry).await;
            self.queue.enqueue_all(items).await;
            self.emit(events);
        }

        info!(jobs = count, pending_tasks = requeued, "Restored persisted jobs");
        Ok(count)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Move the job to its final status once nothing is left to do.
    fn settle(&self, entry: &mut JobEntry, now: DateTime<Utc>) -> Option<JobEvent> {
        let next = match entry.job.status {
            JobStatus::Running if entry.job.all_tasks_finished() => {
                if entry.job.failed_tasks == 0 {
                    JobStatus::Completed
                } else {
                    JobStatus::FailedPartial
                }
            }
            JobStatus::Cancelling if entry.in_flight() == 0 => JobStatus::Cancelled,
            _ => return None,
        };

        entry.job.transition(next, now).ok()?;
        info!(
            job_id = %entry.job.id,
            status = %next,
            completed = entry.job.completed_tasks,
            failed = entry.job.failed_tasks,
            cancelled = entry.job.cancelled_tasks,
            "Job settled"
        );
        Some(JobEvent::from_job(&entry.job))
    }

    fn emit(&self, events: Vec<JobEvent>) {
        for event in events {
            self.sink.record(event);
        }
    }
}
