//! Worker agent.
//!
//! The agent registers with the control plane, keeps a heartbeat going in the
//! background and pulls tasks until it is shut down: request, execute, report.
//! Every execution runs on its own tokio task so that a panicking executor is
//! reported as a failed task instead of taking the worker down.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use fleetrun_client::error::ClientError;
use fleetrun_client::http::HttpClient;
use fleetrun_core::{TaskId, WorkerCapability, WorkerId, WorkerStatus};
use fleetrun_proto::{
    Assignment, HeartbeatResponse, RegisterWorkerResponse, ReportTaskResultRequest,
    ReportTaskResultResponse,
};

use crate::executor::{TaskContext, TaskExecutor};

/// Errors that end an agent run.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Registration failed: {0}")]
    Registration(#[source] ClientError),
}

// ============================================================================
// Control plane seam
// ============================================================================

/// The RPCs a worker makes.
#[async_trait]
pub trait ControlPlaneApi: Send + Sync {
    async fn register(
        &self,
        capability: WorkerCapability,
    ) -> Result<RegisterWorkerResponse, ClientError>;

    /// `capability` re-admits the worker as it is if the control plane
    /// has forgotten it.
    async fn heartbeat(
        &self,
        worker_id: &WorkerId,
        status: WorkerStatus,
        current_tasks: Vec<TaskId>,
        capability: &WorkerCapability,
    ) -> Result<HeartbeatResponse, ClientError>;

    async fn request_task(
        &self,
        worker_id: &WorkerId,
        capability: &WorkerCapability,
    ) -> Result<Option<Assignment>, ClientError>;

    async fn report(
        &self,
        task_id: &TaskId,
        report: &ReportTaskResultRequest,
    ) -> Result<ReportTaskResultResponse, ClientError>;
}

#[async_trait]
impl ControlPlaneApi for HttpClient {
    async fn register(
        &self,
        capability: WorkerCapability,
    ) -> Result<RegisterWorkerResponse, ClientError> {
        self.register_worker(capability).await
    }

    async fn heartbeat(
        &self,
        worker_id: &WorkerId,
        status: WorkerStatus,
        current_tasks: Vec<TaskId>,
        capability: &WorkerCapability,
    ) -> Result<HeartbeatResponse, ClientError> {
        HttpClient::heartbeat(self, worker_id, status, current_tasks, Some(capability.clone()))
            .await
    }

    async fn request_task(
        &self,
        worker_id: &WorkerId,
        capability: &WorkerCapability,
    ) -> Result<Option<Assignment>, ClientError> {
        HttpClient::request_task(self, worker_id, Some(capability.clone())).await
    }

    async fn report(
        &self,
        task_id: &TaskId,
        report: &ReportTaskResultRequest,
    ) -> Result<ReportTaskResultResponse, ClientError> {
        HttpClient::report(self, task_id, report).await
    }
}

// ============================================================================
// Agent
// ============================================================================

/// Agent loop timings.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Sent at registration and with every heartbeat and task request.
    pub capability: WorkerCapability,

    /// Wait between requests when no task is available (plus up to 25% jitter).
    pub poll_interval: Duration,

    /// Overrides the interval advertised by the control plane.
    pub heartbeat_interval: Option<Duration>,

    /// Wait before retrying a report that did not reach the control plane.
    pub retry_delay: Duration,

    /// Attempts per task report.
    pub report_attempts: u32,

    /// Stop after this long with no work.
    pub idle_shutdown: Option<Duration>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            capability: WorkerCapability::default(),
            poll_interval: Duration::from_secs(1),
            heartbeat_interval: None,
            retry_delay: Duration::from_secs(5),
            report_attempts: 3,
            idle_shutdown: None,
        }
    }
}

/// Counters of one agent's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgentStats {
    pub tasks_succeeded: u64,
    pub tasks_failed: u64,

    /// Reports the control plane ignored or never received.
    pub reports_rejected: u64,

    pub registrations: u64,
}

#[derive(Default)]
struct Counters {
    tasks_succeeded: AtomicU64,
    tasks_failed: AtomicU64,
    reports_rejected: AtomicU64,
    registrations: AtomicU64,
}

fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

struct Shared {
    api: Arc<dyn ControlPlaneApi>,
    executor: Arc<dyn TaskExecutor>,
    config: AgentConfig,

    /// Identity from the latest registration.
    worker_id: RwLock<Option<WorkerId>>,

    /// Cancellation handles of executions in progress.
    running: Mutex<HashMap<TaskId, CancellationToken>>,

    counters: Counters,
}

/// Worker agent.
#[derive(Clone)]
pub struct WorkerAgent {
    shared: Arc<Shared>,
}

impl WorkerAgent {
    pub fn new(
        api: Arc<dyn ControlPlaneApi>,
        executor: Arc<dyn TaskExecutor>,
        config: AgentConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                api,
                executor,
                config,
                worker_id: RwLock::new(None),
                running: Mutex::new(HashMap::new()),
                counters: Counters::default(),
            }),
        }
    }

    /// Identity from the latest registration.
    pub async fn worker_id(&self) -> Option<WorkerId> {
        self.shared.worker_id.read().await.clone()
    }

    pub fn stats(&self) -> AgentStats {
        let c = &self.shared.counters;
        AgentStats {
            tasks_succeeded: c.tasks_succeeded.load(Ordering::Relaxed),
            tasks_failed: c.tasks_failed.load(Ordering::Relaxed),
            reports_rejected: c.reports_rejected.load(Ordering::Relaxed),
            registrations: c.registrations.load(Ordering::Relaxed),
        }
    }

    /// Register and work until `shutdown` fires or the idle timeout passes.
    ///
    /// Executions in progress are allowed to finish and report before this
    /// returns. Only a failed initial registration is an error; everything
    /// after that is retried.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<AgentStats, AgentError> {
        let registered = self
            .shared
            .register()
            .await
            .map_err(AgentError::Registration)?;

        let heartbeat_interval = self
            .shared
            .config
            .heartbeat_interval
            .unwrap_or(Duration::from_millis(registered.heartbeat_interval_ms))
            .max(Duration::from_millis(1));

        let stop_heartbeat = CancellationToken::new();
        let heartbeat = tokio::spawn(run_heartbeat_loop(
            self.shared.clone(),
            heartbeat_interval,
            stop_heartbeat.clone(),
        ));

        self.work_loop(&shutdown).await;

        stop_heartbeat.cancel();
        if let Err(e) = heartbeat.await {
            error!(error = %e, "Heartbeat loop failed");
        }

        let stats = self.stats();
        info!(
            succeeded = stats.tasks_succeeded,
            failed = stats.tasks_failed,
            rejected = stats.reports_rejected,
            "Worker agent stopped"
        );
        Ok(stats)
    }

    async fn work_loop(&self, shutdown: &CancellationToken) {
        let shared = &self.shared;
        let capacity = shared.config.capability.max_concurrent_tasks.max(1) as usize;
        let mut executions = JoinSet::new();
        let mut idle_since = Instant::now();

        loop {
            while let Some(joined) = executions.try_join_next() {
                log_join(joined);
            }
            if shutdown.is_cancelled() {
                break;
            }

            if executions.len() >= capacity {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    Some(joined) = executions.join_next() => log_join(joined),
                }
                continue;
            }

            let Some(worker_id) = shared.current_worker_id().await else {
                break;
            };

            match shared
                .api
                .request_task(&worker_id, &shared.config.capability)
                .await
            {
                Ok(Some(assignment)) => {
                    idle_since = Instant::now();
                    executions.spawn(execute_and_report(shared.clone(), worker_id, assignment));
                    continue;
                }
                Ok(None) => {
                    debug!(worker_id = %worker_id, "No task available");
                }
                Err(e) if e.is_not_found() || e.is_worker_unreachable() => {
                    warn!(worker_id = %worker_id, error = %e, "Control plane no longer knows this worker");
                    shared.reregister(&worker_id).await;
                }
                Err(e) => {
                    warn!(worker_id = %worker_id, error = %e, "Failed to request task");
                }
            }

            if !executions.is_empty() {
                idle_since = Instant::now();
            } else if let Some(idle) = shared.config.idle_shutdown {
                if idle_since.elapsed() >= idle {
                    info!(idle_ms = idle.as_millis() as u64, "No work received, shutting down");
                    break;
                }
            }

            let delay = jittered(shared.config.poll_interval);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
                Some(joined) = executions.join_next(), if !executions.is_empty() => log_join(joined),
            }
        }

        if !executions.is_empty() {
            info!(in_flight = executions.len(), "Waiting for running tasks to finish");
        }
        while let Some(joined) = executions.join_next().await {
            log_join(joined);
        }
    }
}

impl Shared {
    async fn current_worker_id(&self) -> Option<WorkerId> {
        self.worker_id.read().await.clone()
    }

    async fn register(&self) -> Result<RegisterWorkerResponse, ClientError> {
        let mut current = self.worker_id.write().await;
        let registered = self.api.register(self.config.capability.clone()).await?;
        info!(
            worker_id = %registered.worker_id,
            hostname = %self.config.capability.hostname,
            heartbeat_interval_ms = registered.heartbeat_interval_ms,
            "Registered with control plane"
        );
        *current = Some(registered.worker_id.clone());
        incr(&self.counters.registrations);
        Ok(registered)
    }

    /// Register again unless someone already replaced `stale`.
    ///
    /// Tasks held under the old identity were reclaimed by the control
    /// plane, so their executions are cancelled.
    async fn reregister(&self, stale: &WorkerId) {
        let mut current = self.worker_id.write().await;
        if current.as_ref() != Some(stale) {
            return;
        }

        match self.api.register(self.config.capability.clone()).await {
            Ok(registered) => {
                info!(
                    old_worker_id = %stale,
                    worker_id = %registered.worker_id,
                    "Re-registered with control plane"
                );
                *current = Some(registered.worker_id);
                incr(&self.counters.registrations);
                drop(current);
                self.abandon_running("worker re-registered").await;
            }
            Err(e) => {
                warn!(worker_id = %stale, error = %e, "Re-registration failed");
            }
        }
    }

    async fn abandon_running(&self, reason: &str) {
        let running = self.running.lock().await;
        for (task_id, token) in running.iter() {
            info!(task_id = %task_id, reason = %reason, "Abandoning task");
            token.cancel();
        }
    }

    async fn send_heartbeat(&self) {
        let Some(worker_id) = self.current_worker_id().await else {
            return;
        };
        let current_tasks: Vec<TaskId> = self.running.lock().await.keys().cloned().collect();
        let status = if current_tasks.is_empty() {
            WorkerStatus::Idle
        } else {
            WorkerStatus::Busy
        };

        match self
            .api
            .heartbeat(&worker_id, status, current_tasks, &self.config.capability)
            .await
        {
            Ok(response) => {
                if response.readmitted {
                    warn!(worker_id = %worker_id, "Control plane had expired this worker");
                    self.abandon_running("worker was expired").await;
                }
                if !response.cancelled_task_ids.is_empty() {
                    let running = self.running.lock().await;
                    for task_id in &response.cancelled_task_ids {
                        if let Some(token) = running.get(task_id) {
                            info!(task_id = %task_id, "Cancelling task at control plane request");
                            token.cancel();
                        }
                    }
                }
            }
            Err(e) if e.is_not_found() || e.is_worker_unreachable() => {
                warn!(worker_id = %worker_id, error = %e, "Heartbeat rejected");
                self.reregister(&worker_id).await;
            }
            Err(e) => {
                warn!(worker_id = %worker_id, error = %e, "Failed to send heartbeat");
            }
        }
    }

    /// Deliver a report, retrying transport failures.
    async fn deliver(&self, task_id: &TaskId, report: &ReportTaskResultRequest) {
        let attempts = self.config.report_attempts.max(1);
        for attempt in 1..=attempts {
            match self.api.report(task_id, report).await {
                Ok(response) if response.accepted => {
                    debug!(task_id = %task_id, success = report.success, "Report accepted");
                    return;
                }
                Ok(response) => {
                    if response.duplicate {
                        debug!(task_id = %task_id, "Report was a duplicate");
                    } else {
                        warn!(task_id = %task_id, worker_id = %report.worker_id, "Report rejected, task is no longer ours");
                    }
                    incr(&self.counters.reports_rejected);
                    return;
                }
                Err(e) if e.is_transport() && attempt < attempts => {
                    warn!(task_id = %task_id, attempt, error = %e, "Failed to report result, retrying");
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => {
                    error!(task_id = %task_id, error = %e, "Failed to report result");
                    incr(&self.counters.reports_rejected);
                    return;
                }
            }
        }
    }
}

/// Execute one assignment and report its outcome.
async fn execute_and_report(shared: Arc<Shared>, worker_id: WorkerId, assignment: Assignment) {
    let task_id = assignment.task_id.clone();
    let attempt = assignment.attempt;
    let token = CancellationToken::new();
    shared
        .running
        .lock()
        .await
        .insert(task_id.clone(), token.clone());

    info!(
        task_id = %task_id,
        job_id = %assignment.job_id,
        ordinal = assignment.ordinal,
        attempt,
        executor = shared.executor.name(),
        "Executing task"
    );

    let executor = shared.executor.clone();
    let ctx = TaskContext::new(assignment, token);
    let outcome = tokio::spawn(async move { executor.execute(ctx).await }).await;

    shared.running.lock().await.remove(&task_id);

    let report = match outcome {
        Ok(Ok(output)) => {
            info!(task_id = %task_id, "Task succeeded");
            incr(&shared.counters.tasks_succeeded);
            ReportTaskResultRequest::success(worker_id, output).with_attempt(attempt)
        }
        Ok(Err(e)) => {
            warn!(task_id = %task_id, error = %e, "Task failed");
            incr(&shared.counters.tasks_failed);
            ReportTaskResultRequest::failure(worker_id, e.to_string()).with_attempt(attempt)
        }
        Err(e) => {
            let message = if e.is_panic() {
                format!("executor panicked: {}", panic_message(e.into_panic()))
            } else {
                format!("execution aborted: {e}")
            };
            error!(task_id = %task_id, error = %message, "Task execution crashed");
            incr(&shared.counters.tasks_failed);
            ReportTaskResultRequest::failure(worker_id, message).with_attempt(attempt)
        }
    };

    shared.deliver(&task_id, &report).await;
}

/// Heartbeat until `stop` fires.
async fn run_heartbeat_loop(shared: Arc<Shared>, interval: Duration, stop: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => shared.send_heartbeat().await,
        }
    }
}

fn log_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "Task supervisor failed");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// `base` plus up to a quarter of it, so idle workers do not poll in lockstep.
fn jittered(base: Duration) -> Duration {
    let spread = base.as_millis() as u64 / 4;
    if spread == 0 {
        return base;
    }
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
}
