//! Worker registry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use fleetrun_core::{TaskId, Worker, WorkerCapability, WorkerId, WorkerStatus};
use fleetrun_proto::HeartbeatRequest;

/// Shared handle to one worker record.
pub type WorkerHandle = Arc<Mutex<Worker>>;

/// Result of processing a heartbeat.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatOutcome {
    /// The worker was expired or unknown and has been registered afresh.
    pub readmitted: bool,

    /// Tasks the registry believes the worker holds.
    pub held: Vec<TaskId>,

    /// Tasks the worker reported running that it does not hold.
    pub unassigned: Vec<TaskId>,

    /// Held tasks the worker did not report.
    pub unreported: Vec<TaskId>,
}

impl HeartbeatOutcome {
    fn new(readmitted: bool, worker: &Worker, reported: &[TaskId]) -> Self {
        let unassigned = reported
            .iter()
            .filter(|task_id| !worker.current_tasks.contains(*task_id))
            .cloned()
            .collect();
        let unreported = worker
            .current_tasks
            .iter()
            .filter(|task_id| !reported.contains(*task_id))
            .cloned()
            .collect();
        Self {
            readmitted,
            held: worker.current_tasks.iter().cloned().collect(),
            unassigned,
            unreported,
        }
    }
}

/// Tasks taken back from a worker the liveness monitor expired.
#[derive(Debug, Clone)]
pub struct ExpiredWorker {
    pub worker_id: WorkerId,
    pub held: Vec<TaskId>,
}

/// Registry of known workers.
///
/// Worker records are never persisted; after a restart workers re-register
/// through their next heartbeat.
#[derive(Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<WorkerId, WorkerHandle>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new worker. It starts IDLE with a fresh heartbeat.
    pub async fn register(&self, capability: WorkerCapability, now: DateTime<Utc>) -> WorkerId {
        let worker_id = WorkerId::generate();
        info!(
            worker_id = %worker_id,
            hostname = %capability.hostname,
            tags = ?capability.tags,
            max_concurrent_tasks = capability.max_concurrent_tasks,
            "Worker registered"
        );

        let worker = Worker::new(worker_id.clone(), capability, now);
        self.workers
            .write()
            .await
            .insert(worker_id.clone(), Arc::new(Mutex::new(worker)));
        worker_id
    }

    pub async fn get(&self, worker_id: &WorkerId) -> Option<WorkerHandle> {
        self.workers.read().await.get(worker_id).cloned()
    }

    /// Refresh a worker's liveness.
    ///
    /// An unreachable worker, or one already purged, is re-admitted under the
    /// same id with an empty task set. Its previous tasks were reclaimed when
    /// it expired. A capability in the heartbeat replaces the recorded one,
    /// so a purged worker comes back with its tags and slots.
    pub async fn heartbeat(
        &self,
        worker_id: &WorkerId,
        request: &HeartbeatRequest,
        now: DateTime<Utc>,
    ) -> HeartbeatOutcome {
        let reported_tasks = request.reported_tasks();

        let handle = match self.get(worker_id).await {
            Some(handle) => handle,
            None => {
                let capability = match &request.capability {
                    Some(capability) => capability.clone(),
                    None => {
                        warn!(worker_id = %worker_id, "Re-admitting unknown worker without a capability");
                        WorkerCapability::default()
                    }
                };
                warn!(
                    worker_id = %worker_id,
                    hostname = %capability.hostname,
                    tags = ?capability.tags,
                    "Heartbeat from unknown worker, re-admitting"
                );
                let worker = Worker::new(worker_id.clone(), capability, now);
                let handle = Arc::new(Mutex::new(worker));
                let mut workers = self.workers.write().await;
                let handle = workers.entry(worker_id.clone()).or_insert(handle).clone();
                drop(workers);
                let mut worker = handle.lock().await;
                worker.touch(now);
                return HeartbeatOutcome::new(true, &worker, &reported_tasks);
            }
        };

        let mut worker = handle.lock().await;
        let readmitted = worker.status == WorkerStatus::Unreachable;
        if readmitted {
            warn!(worker_id = %worker_id, "Heartbeat from unreachable worker, re-admitting");
            worker.readmit(now);
        } else {
            worker.touch(now);
        }
        if let Some(capability) = &request.capability {
            if capability != &worker.capability {
                debug!(worker_id = %worker_id, tags = ?capability.tags, "Worker capability updated");
                worker.capability = capability.clone();
            }
        }

        let reported = request.status;
        if reported != worker.status && reported != WorkerStatus::Unreachable {
            debug!(
                worker_id = %worker_id,
                reported = %reported,
                recorded = %worker.status,
                "Worker status differs from assignment record"
            );
        }

        let outcome = HeartbeatOutcome::new(readmitted, &worker, &reported_tasks);
        if !outcome.unassigned.is_empty() || !outcome.unreported.is_empty() {
            debug!(
                worker_id = %worker_id,
                unassigned = ?outcome.unassigned,
                unreported = ?outcome.unreported,
                "Worker's running tasks differ from assignment record"
            );
        }
        outcome
    }

    /// Drop a task from a worker's held set and update its counters.
    ///
    /// `outcome` is `Some(true)` for a success, `Some(false)` for a failure
    /// and `None` when the task was taken away without a report.
    pub async fn release(
        &self,
        worker_id: &WorkerId,
        task_id: &TaskId,
        outcome: Option<bool>,
    ) -> bool {
        let Some(handle) = self.get(worker_id).await else {
            return false;
        };
        let mut worker = handle.lock().await;
        let removed = worker.release(task_id);
        if removed {
            match outcome {
                Some(true) => worker.completed_count += 1,
                Some(false) => worker.failed_count += 1,
                None => {}
            }
        }
        removed
    }

    /// Copy of every worker record, oldest registration first.
    pub async fn snapshot(&self) -> Vec<Worker> {
        let handles: Vec<WorkerHandle> = self.workers.read().await.values().cloned().collect();
        let mut workers = Vec::with_capacity(handles.len());
        for handle in handles {
            workers.push(handle.lock().await.clone());
        }
        workers.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        workers
    }

    /// Mark workers silent for longer than `timeout` as unreachable.
    ///
    /// Returns the tasks each expired worker held so they can be reclaimed.
    pub async fn expire(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<ExpiredWorker> {
        let handles: Vec<WorkerHandle> = self.workers.read().await.values().cloned().collect();
        let mut expired = Vec::new();

        for handle in handles {
            let mut worker = handle.lock().await;
            if worker.status == WorkerStatus::Unreachable || !worker.is_expired(now, timeout) {
                continue;
            }
            let held = worker.mark_unreachable(now);
            warn!(
                worker_id = %worker.id,
                last_heartbeat = %worker.last_heartbeat_at,
                held_tasks = held.len(),
                "Worker missed heartbeats, marking unreachable"
            );
            expired.push(ExpiredWorker {
                worker_id: worker.id.clone(),
                held,
            });
        }

        expired
    }

    /// Remove workers that have been unreachable for longer than `after`.
    pub async fn purge(&self, now: DateTime<Utc>, after: Duration) -> Vec<WorkerId> {
        let mut workers = self.workers.write().await;
        let mut purged = Vec::new();

        for (worker_id, handle) in workers.iter() {
            let worker = handle.lock().await;
            if let Some(since) = worker.unreachable_since {
                if worker.status == WorkerStatus::Unreachable
                    && now.signed_duration_since(since) > after
                {
                    purged.push(worker_id.clone());
                }
            }
        }

        for worker_id in &purged {
            workers.remove(worker_id);
            info!(worker_id = %worker_id, "Unreachable worker removed");
        }
        purged
    }

    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
