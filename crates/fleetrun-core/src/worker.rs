//! Worker capability descriptors and worker records.

use crate::{TaskId, WorkerId, WorkerStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

fn default_max_concurrent_tasks() -> u32 {
    1
}

/// What a worker advertises at registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerCapability {
    /// Hostname of the worker machine.
    #[serde(default)]
    pub hostname: String,

    /// Capability tags (hardware, region, executor kinds, ...).
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Maximum tasks this worker runs at once.
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: u32,
}

impl WorkerCapability {
    /// Create a capability with no tags and a single task slot.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            tags: BTreeSet::new(),
            max_concurrent_tasks: 1,
        }
    }

    /// Builder method to add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Builder method to set the concurrency limit.
    pub fn with_max_concurrent_tasks(mut self, limit: u32) -> Self {
        self.max_concurrent_tasks = limit.max(1);
        self
    }

    /// Check if every required tag is advertised.
    pub fn satisfies(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.tags)
    }
}

impl Default for WorkerCapability {
    fn default() -> Self {
        Self::new("")
    }
}

/// Registry record of a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Worker {
    /// Unique worker identifier.
    pub id: WorkerId,

    /// Advertised capability.
    pub capability: WorkerCapability,

    /// Current status.
    pub status: WorkerStatus,

    /// Tasks currently held by this worker.
    pub current_tasks: BTreeSet<TaskId>,

    /// Tasks this worker completed successfully.
    pub completed_count: u64,

    /// Tasks this worker reported as failed.
    pub failed_count: u64,

    /// Timestamp of last heartbeat.
    pub last_heartbeat_at: DateTime<Utc>,

    /// When the worker (re-)registered.
    pub registered_at: DateTime<Utc>,

    /// When the liveness monitor expired this worker.
    pub unreachable_since: Option<DateTime<Utc>>,
}

impl Worker {
    /// Create a new idle Worker.
    pub fn new(id: WorkerId, capability: WorkerCapability, now: DateTime<Utc>) -> Self {
        Self {
            id,
            capability,
            status: WorkerStatus::Idle,
            current_tasks: BTreeSet::new(),
            completed_count: 0,
            failed_count: 0,
            last_heartbeat_at: now,
            registered_at: now,
            unreachable_since: None,
        }
    }

    /// First held task, for single-slot workers.
    pub fn current_task_id(&self) -> Option<&TaskId> {
        self.current_tasks.iter().next()
    }

    /// Check if another task fits under the concurrency limit.
    pub fn has_capacity(&self) -> bool {
        self.status.can_accept_tasks()
            && (self.current_tasks.len() as u32) < self.capability.max_concurrent_tasks
    }

    /// Check if the last heartbeat is older than `timeout`.
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now.signed_duration_since(self.last_heartbeat_at) > timeout
    }

    /// Record a heartbeat.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_heartbeat_at = now;
    }

    /// Record that the worker took a task.
    pub fn hold(&mut self, task_id: TaskId) {
        self.current_tasks.insert(task_id);
        self.status = WorkerStatus::Busy;
    }

    /// Record that the worker no longer holds a task.
    pub fn release(&mut self, task_id: &TaskId) -> bool {
        let removed = self.current_tasks.remove(task_id);
        if self.status == WorkerStatus::Busy && self.current_tasks.is_empty() {
            self.status = WorkerStatus::Idle;
        }
        removed
    }

    /// Expire the worker and hand back the tasks it held.
    pub fn mark_unreachable(&mut self, now: DateTime<Utc>) -> Vec<TaskId> {
        self.status = WorkerStatus::Unreachable;
        self.unreachable_since = Some(now);
        std::mem::take(&mut self.current_tasks).into_iter().collect()
    }

    /// Bring an expired worker back as if it had just registered.
    pub fn readmit(&mut self, now: DateTime<Utc>) {
        self.status = WorkerStatus::Idle;
        self.current_tasks.clear();
        self.registered_at = now;
        self.last_heartbeat_at = now;
        self.unreachable_since = None;
    }
}
