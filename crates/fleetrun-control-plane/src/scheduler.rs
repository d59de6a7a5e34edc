//! Task scheduler - pairs workers with pending tasks.
//!
//! Workers pull: a worker asks for work and the scheduler hands it the first
//! eligible task from the queue. Registration and heartbeats go through here
//! as well since they decide whether a worker may receive work at all.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use fleetrun_core::{CoreError, WorkerCapability, WorkerId, WorkerStatus};
use fleetrun_proto::{Assignment, HeartbeatRequest, HeartbeatResponse};

use crate::coordinator::JobCoordinator;
use crate::metrics::Counters;
use crate::queue::TaskQueue;
use crate::registry::WorkerRegistry;
use crate::store::JobStore;

/// Task scheduler.
pub struct Scheduler {
    store: Arc<JobStore>,
    queue: Arc<TaskQueue>,
    registry: Arc<WorkerRegistry>,
    coordinator: Arc<JobCoordinator>,
    counters: Arc<Counters>,
}

impl Scheduler {
    pub fn new(
        store: Arc<JobStore>,
        queue: Arc<TaskQueue>,
        registry: Arc<WorkerRegistry>,
        coordinator: Arc<JobCoordinator>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            store,
            queue,
            registry,
            coordinator,
            counters,
        }
    }

    /// Register a worker and return its id.
    pub async fn register_worker(&self, capability: WorkerCapability) -> WorkerId {
        self.registry.register(capability, Utc::now()).await
    }

    /// Refresh a worker's liveness and tell it which held tasks to abandon.
    pub async fn heartbeat(
        &self,
        worker_id: &WorkerId,
        request: &HeartbeatRequest,
    ) -> HeartbeatResponse {
        let outcome = self.registry.heartbeat(worker_id, request, Utc::now()).await;
        let cancelled_task_ids = self.coordinator.cancelled_among(&outcome.held).await;
        if !cancelled_task_ids.is_empty() {
            debug!(
                worker_id = %worker_id,
                tasks = ?cancelled_task_ids,
                "Telling worker to abandon cancelled tasks"
            );
        }

        HeartbeatResponse {
            ack: true,
            readmitted: outcome.readmitted,
            cancelled_task_ids,
        }
    }

    /// Hand the worker its next task, if any fits.
    ///
    /// A capability in the request replaces the one given at registration.
    /// Returns `None` when the worker is at capacity or nothing matches.
    pub async fn request_task(
        &self,
        worker_id: &WorkerId,
        capability: Option<WorkerCapability>,
    ) -> Result<Option<Assignment>, CoreError> {
        let handle = self
            .registry
            .get(worker_id)
            .await
            .ok_or_else(|| CoreError::WorkerNotFound(worker_id.to_string()))?;

        // Held for the whole dequeue so the liveness monitor cannot expire the
        // worker between the assignment and recording it as held.
        let mut worker = handle.lock().await;
        if worker.status == WorkerStatus::Unreachable {
            return Err(CoreError::WorkerUnreachable(worker_id.to_string()));
        }

        let now = Utc::now();
        worker.touch(now);
        if let Some(capability) = capability {
            worker.capability = capability;
        }
        if !worker.has_capacity() {
            debug!(
                worker_id = %worker_id,
                held = worker.current_tasks.len(),
                "Worker at capacity"
            );
            return Ok(None);
        }

        let assignment = self
            .queue
            .dequeue(&self.store, worker_id, &worker.capability, now)
            .await;

        if let Some(assignment) = &assignment {
            worker.hold(assignment.task_id.clone());
            Counters::incr(&self.counters.tasks_assigned);
            info!(
                task_id = %assignment.task_id,
                job_id = %assignment.job_id,
                worker_id = %worker_id,
                ordinal = assignment.ordinal,
                attempt = assignment.attempt,
                "Assigning task to worker"
            );
        }

        Ok(assignment)
    }
}
