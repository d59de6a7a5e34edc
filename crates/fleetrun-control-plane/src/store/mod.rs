//! Job store: the authoritative record of jobs and their tasks.
//!
//! Each job lives behind its own mutex so that task transitions of one job
//! are serialized while unrelated jobs never contend. The outer maps are only
//! locked for lookups and inserts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::warn;

use fleetrun_core::{CoreError, Job, JobId, Task, TaskId, TaskStatus};

mod backend;

pub use backend::{FileBackend, MemoryBackend, StorageBackend};

/// A job together with its tasks, indexed by ordinal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEntry {
    pub job: Job,
    pub tasks: Vec<Task>,
}

impl JobEntry {
    pub fn new(job: Job, tasks: Vec<Task>) -> Self {
        Self { job, tasks }
    }

    pub fn task(&self, ordinal: u32) -> Option<&Task> {
        self.tasks.get(ordinal as usize)
    }

    pub fn task_mut(&mut self, ordinal: u32) -> Option<&mut Task> {
        self.tasks.get_mut(ordinal as usize)
    }

    /// Number of tasks currently held by a worker.
    pub fn in_flight(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_in_flight()).count()
    }

    /// Tasks still waiting in the queue.
    pub fn pending(&self) -> impl Iterator<Item = &Task> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
    }
}

/// Shared handle to one job's entry.
pub type JobHandle = Arc<Mutex<JobEntry>>;

/// In-memory index of jobs, written through to a [`StorageBackend`].
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, JobHandle>>,
    task_index: RwLock<HashMap<TaskId, (JobId, u32)>>,
    next_seq: AtomicU64,
    backend: Arc<dyn StorageBackend>,
}

impl JobStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            task_index: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            backend,
        }
    }

    /// Store backed by process memory only.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Reserve the next submission sequence number.
    pub fn next_submission_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Persist a new job and make it visible.
    ///
    /// Nothing is registered if the write fails.
    pub async fn insert(&self, entry: JobEntry) -> Result<JobHandle, CoreError> {
        self.backend.save(&entry).await?;
        Ok(self.register(entry).await)
    }

    /// Make an entry visible without writing it.
    pub async fn register(&self, entry: JobEntry) -> JobHandle {
        let job_id = entry.job.id.clone();
        self.next_seq
            .fetch_max(entry.job.submission_seq + 1, Ordering::SeqCst);

        {
            let mut index = self.task_index.write().await;
            for task in &entry.tasks {
                index.insert(task.id.clone(), (job_id.clone(), task.ordinal));
            }
        }

        let handle = Arc::new(Mutex::new(entry));
        self.jobs.write().await.insert(job_id, handle.clone());
        handle
    }

    /// Write the current state of a job.
    ///
    /// Failures are logged and swallowed: the in-memory state stays
    /// authoritative and the next write of the same job catches up.
    pub async fn persist(&self, entry: &JobEntry) {
        if let Err(e) = self.backend.save(entry).await {
            warn!(job_id = %entry.job.id, error = %e, "Failed to persist job");
        }
    }

    pub async fn get(&self, job_id: &JobId) -> Option<JobHandle> {
        self.jobs.read().await.get(job_id).cloned()
    }

    /// Find the job holding `task_id` and the task's ordinal within it.
    pub async fn locate(&self, task_id: &TaskId) -> Option<(JobHandle, u32)> {
        let (job_id, ordinal) = self.task_index.read().await.get(task_id).cloned()?;
        let handle = self.get(&job_id).await?;
        Some((handle, ordinal))
    }

    /// Handles of every known job, in no particular order.
    pub async fn handles(&self) -> Vec<JobHandle> {
        self.jobs.read().await.values().cloned().collect()
    }

    /// Read every document from the backend.
    pub async fn load_persisted(&self) -> Result<Vec<JobEntry>, CoreError> {
        self.backend.load_all().await
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleetrun_core::{JobSpec, TaskTemplate};

    fn entry(seq: u64) -> JobEntry {
        let spec = JobSpec::new("iris", TaskTemplate::new("train"), 4, "datasets/iris.csv");
        let job = Job::new(spec, "alice", seq);
        let tasks = job.spec.decompose(&job.id);
        JobEntry::new(job, tasks)
    }

    struct BrokenBackend;

    #[async_trait]
    impl StorageBackend for BrokenBackend {
        async fn save(&self, _entry: &JobEntry) -> Result<(), CoreError> {
            Err(CoreError::Storage("disk full".into()))
        }

        async fn load_all(&self) -> Result<Vec<JobEntry>, CoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_insert_indexes_tasks() {
        let store = JobStore::in_memory();
        let entry = entry(store.next_submission_seq());
        let job_id = entry.job.id.clone();
        let third = entry.tasks[2].id.clone();

        store.insert(entry).await.unwrap();

        assert!(store.get(&job_id).await.is_some());
        let (handle, ordinal) = store.locate(&third).await.unwrap();
        assert_eq!(ordinal, 2);
        assert_eq!(handle.lock().await.job.id, job_id);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_failed_insert_registers_nothing() {
        let store = JobStore::new(Arc::new(BrokenBackend));
        let entry = entry(0);
        let task_id = entry.tasks[0].id.clone();

        let err = store.insert(entry).await.unwrap_err();
        assert_eq!(err.kind(), "Storage");
        assert!(store.is_empty().await);
        assert!(store.locate(&task_id).await.is_none());
    }

    #[tokio::test]
    async fn test_register_advances_sequence() {
        let store = JobStore::in_memory();
        store.register(entry(41)).await;
        assert_eq!(store.next_submission_seq(), 42);
    }

    #[test]
    fn test_entry_counts() {
        let mut entry = entry(0);
        assert_eq!(entry.pending().count(), 4);

        let worker = fleetrun_core::WorkerId::new("w1");
        entry
            .task_mut(1)
            .unwrap()
            .assign(worker, chrono::Utc::now())
            .unwrap();
        assert_eq!(entry.in_flight(), 1);
        assert_eq!(entry.pending().count(), 3);
        assert!(entry.task(9).is_none());
    }
}
