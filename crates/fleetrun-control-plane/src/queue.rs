//! Pending-task queue.
//!
//! The queue is an ordered index of hints pointing into the [`JobStore`].
//! Task status in the store stays authoritative: an entry whose task is no
//! longer pending (cancelled, already assigned, job gone) is dropped the
//! next time a dequeue walks over it.
//!
//! Ordering: higher job priority first, then earlier submission, then task
//! ordinal. A requeued task reuses its original key and so goes back to its
//! original position.
//!
//! Entries are grouped by the capability set their job requires, so a
//! dequeue only walks the groups the worker satisfies.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::{Excluded, Unbounded};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use fleetrun_core::{
    Job, JobId, JobStatus, Task, TaskId, TaskStatus, WorkerCapability, WorkerId,
};
use fleetrun_proto::Assignment;

use crate::store::JobStore;

/// Position of a task in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct QueueKey {
    priority: Reverse<i32>,
    submission_seq: u64,
    ordinal: u32,
}

impl QueueKey {
    /// Last possible key of the same job. Every task of a job shares its
    /// priority and submission, so its entries are contiguous.
    fn end_of_job(self) -> Self {
        Self {
            ordinal: u32::MAX,
            ..self
        }
    }
}

#[derive(Debug, Clone)]
struct QueueEntry {
    job_id: JobId,
    task_id: TaskId,
}

/// A task ready to be placed in the queue.
#[derive(Debug, Clone)]
pub struct QueueItem {
    key: QueueKey,
    required: BTreeSet<String>,
    entry: QueueEntry,
}

impl QueueItem {
    pub fn new(job: &Job, task: &Task) -> Self {
        Self {
            key: QueueKey {
                priority: Reverse(job.spec.priority),
                submission_seq: job.submission_seq,
                ordinal: task.ordinal,
            },
            required: job.spec.required_capabilities.clone(),
            entry: QueueEntry {
                job_id: job.id.clone(),
                task_id: task.id.clone(),
            },
        }
    }
}

/// Pending entries keyed by the capabilities their job requires.
type Groups = BTreeMap<BTreeSet<String>, BTreeMap<QueueKey, QueueEntry>>;

/// What a dequeue found behind one entry.
enum Claim {
    Assigned(Assignment),
    /// The entry no longer points at a pending task.
    Stale,
    /// Another request holds the job; try again later.
    Busy,
}

/// Jobs whose pending tasks may be handed out.
fn accepts_assignments(status: JobStatus) -> bool {
    matches!(status, JobStatus::Queued | JobStatus::Running)
}

/// Ordered index of pending tasks.
///
/// Lock order: the queue lock is taken before any job lock, and job locks
/// are only ever tried from here. Callers holding a job lock must release
/// it before calling into the queue.
#[derive(Default)]
pub struct TaskQueue {
    pending: Mutex<Groups>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enqueue(&self, item: QueueItem) {
        trace!(task_id = %item.entry.task_id, "Task enqueued");
        self.pending
            .lock()
            .await
            .entry(item.required)
            .or_default()
            .insert(item.key, item.entry);
    }

    pub async fn enqueue_all(&self, items: impl IntoIterator<Item = QueueItem>) {
        let mut pending = self.pending.lock().await;
        for item in items {
            pending
                .entry(item.required)
                .or_default()
                .insert(item.key, item.entry);
        }
    }

    /// Hand the first eligible pending task to `worker_id`.
    ///
    /// Merges the groups whose requirements `capability` satisfies in queue
    /// order. The PENDING -> ASSIGNED transition happens under the queue lock
    /// and the job lock, so a task is never handed out twice. A job whose
    /// lock is held elsewhere is skipped and keeps its entries. Never blocks
    /// waiting for work.
    pub async fn dequeue(
        &self,
        store: &JobStore,
        worker_id: &WorkerId,
        capability: &WorkerCapability,
        now: DateTime<Utc>,
    ) -> Option<Assignment> {
        let mut pending = self.pending.lock().await;
        let mut groups: Vec<&mut BTreeMap<QueueKey, QueueEntry>> = pending
            .iter_mut()
            .filter(|(required, _)| capability.satisfies(required))
            .map(|(_, group)| group)
            .collect();
        // Exclusive lower bound per group.
        let mut cursors: Vec<Option<QueueKey>> = vec![None; groups.len()];
        let mut assignment = None;
        let mut discarded = 0;
        let mut busy = 0;

        loop {
            let next = groups
                .iter()
                .zip(&cursors)
                .enumerate()
                .filter_map(|(index, (group, cursor))| {
                    let first = match cursor {
                        Some(after) => group.range((Excluded(*after), Unbounded)).next(),
                        None => group.iter().next(),
                    };
                    first.map(|(key, _)| (*key, index))
                })
                .min();
            let Some((key, index)) = next else {
                break;
            };

            let outcome = match groups[index].get(&key) {
                Some(entry) => claim(store, &key, entry, worker_id, now).await,
                None => Claim::Stale,
            };
            match outcome {
                Claim::Assigned(claimed) => {
                    groups[index].remove(&key);
                    assignment = Some(claimed);
                    break;
                }
                Claim::Stale => {
                    groups[index].remove(&key);
                    cursors[index] = Some(key);
                    discarded += 1;
                }
                Claim::Busy => {
                    cursors[index] = Some(key.end_of_job());
                    busy += 1;
                }
            }
        }

        drop(groups);
        pending.retain(|_, group| !group.is_empty());
        if discarded > 0 {
            debug!(count = discarded, "Dropped stale queue entries");
        }
        if busy > 0 {
            trace!(jobs = busy, "Skipped jobs locked by another request");
        }

        assignment
    }

    /// Drop every entry belonging to `job_id`.
    pub async fn remove_job(&self, job_id: &JobId) -> usize {
        let mut pending = self.pending.lock().await;
        let mut removed = 0;
        for group in pending.values_mut() {
            let before = group.len();
            group.retain(|_, entry| &entry.job_id != job_id);
            removed += before - group.len();
        }
        pending.retain(|_, group| !group.is_empty());
        removed
    }

    /// Check whether the task has an entry (possibly stale).
    pub async fn contains(&self, task_id: &TaskId) -> bool {
        self.pending
            .lock()
            .await
            .values()
            .flat_map(BTreeMap::values)
            .any(|entry| &entry.task_id == task_id)
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.values().map(BTreeMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Try to move the task behind `entry` to ASSIGNED for `worker_id`.
async fn claim(
    store: &JobStore,
    key: &QueueKey,
    entry: &QueueEntry,
    worker_id: &WorkerId,
    now: DateTime<Utc>,
) -> Claim {
    let Some(handle) = store.get(&entry.job_id).await else {
        return Claim::Stale;
    };
    let Ok(mut guard) = handle.try_lock() else {
        return Claim::Busy;
    };
    let job_entry = &mut *guard;

    if !accepts_assignments(job_entry.job.status) {
        return Claim::Stale;
    }
    let Some(task) = job_entry.tasks.get_mut(key.ordinal as usize) else {
        return Claim::Stale;
    };
    if task.status != TaskStatus::Pending || task.assign(worker_id.clone(), now).is_err() {
        return Claim::Stale;
    }
    Claim::Assigned(Assignment::for_task(task, &job_entry.job))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JobEntry;
    use fleetrun_core::{JobSpec, TaskTemplate};

    async fn submit(store: &JobStore, queue: &TaskQueue, spec: JobSpec) -> JobId {
        let mut job = Job::new(spec, "test", store.next_submission_seq());
        let tasks = job.spec.decompose(&job.id);
        job.total_tasks = tasks.len() as u32;
        job.transition(JobStatus::Queued, Utc::now()).unwrap();
        let items: Vec<QueueItem> = tasks.iter().map(|t| QueueItem::new(&job, t)).collect();
        let job_id = job.id.clone();
        store.insert(JobEntry::new(job, tasks)).await.unwrap();
        queue.enqueue_all(items).await;
        job_id
    }

    fn spec(units: u64) -> JobSpec {
        JobSpec::new("job", TaskTemplate::new("echo"), units, "datasets/d")
    }

    fn tags(list: &[&str]) -> WorkerCapability {
        list.iter()
            .fold(WorkerCapability::new("node"), |capability, tag| capability.with_tag(*tag))
    }

    #[tokio::test]
    async fn test_fifo_within_job() {
        let store = JobStore::in_memory();
        let queue = TaskQueue::new();
        submit(&store, &queue, spec(3)).await;
        let worker = WorkerId::new("w1");

        for expected in 0..3 {
            let a = queue.dequeue(&store, &worker, &tags(&[]), Utc::now()).await.unwrap();
            assert_eq!(a.ordinal, expected);
            assert_eq!(a.attempt, 1);
        }
        assert!(queue.dequeue(&store, &worker, &tags(&[]), Utc::now()).await.is_none());
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_priority_then_submission_order() {
        let store = JobStore::in_memory();
        let queue = TaskQueue::new();
        let first = submit(&store, &queue, spec(1)).await;
        let second = submit(&store, &queue, spec(1)).await;
        let urgent = submit(&store, &queue, spec(1).with_priority(10)).await;
        let worker = WorkerId::new("w1");

        let mut got = Vec::new();
        while let Some(a) = queue.dequeue(&store, &worker, &tags(&[]), Utc::now()).await {
            got.push(a.job_id);
        }
        assert_eq!(got, vec![urgent, first, second]);
    }

    #[tokio::test]
    async fn test_capability_filter_skips_without_consuming() {
        let store = JobStore::in_memory();
        let queue = TaskQueue::new();
        let gpu_job = submit(&store, &queue, spec(1).with_capability("gpu")).await;
        let cpu_job = submit(&store, &queue, spec(1)).await;

        let cpu_worker = WorkerId::new("cpu");
        let a = queue.dequeue(&store, &cpu_worker, &tags(&["x86"]), Utc::now()).await.unwrap();
        assert_eq!(a.job_id, cpu_job);
        assert!(queue.dequeue(&store, &cpu_worker, &tags(&["x86"]), Utc::now()).await.is_none());
        assert_eq!(queue.len().await, 1);

        let gpu_worker = WorkerId::new("gpu");
        let a = queue.dequeue(&store, &gpu_worker, &tags(&["gpu"]), Utc::now()).await.unwrap();
        assert_eq!(a.job_id, gpu_job);
    }

    #[tokio::test]
    async fn test_stale_entries_are_discarded() {
        let store = JobStore::in_memory();
        let queue = TaskQueue::new();
        let job_id = submit(&store, &queue, spec(2)).await;

        {
            let handle = store.get(&job_id).await.unwrap();
            let mut entry = handle.lock().await;
            entry.tasks[0].cancel(Utc::now());
        }

        let a = queue
            .dequeue(&store, &WorkerId::new("w1"), &tags(&[]), Utc::now())
            .await
            .unwrap();
        assert_eq!(a.ordinal, 1);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_requeue_keeps_position() {
        let store = JobStore::in_memory();
        let queue = TaskQueue::new();
        let job_id = submit(&store, &queue, spec(3)).await;
        let worker = WorkerId::new("w1");

        let first = queue.dequeue(&store, &worker, &tags(&[]), Utc::now()).await.unwrap();
        let item = {
            let handle = store.get(&job_id).await.unwrap();
            let mut entry = handle.lock().await;
            entry.tasks[0].release().unwrap();
            QueueItem::new(&entry.job, &entry.tasks[0])
        };
        queue.enqueue(item).await;
        assert!(queue.contains(&first.task_id).await);

        let again = queue.dequeue(&store, &worker, &tags(&[]), Utc::now()).await.unwrap();
        assert_eq!(again.task_id, first.task_id);
    }

    #[tokio::test]
    async fn test_remove_job() {
        let store = JobStore::in_memory();
        let queue = TaskQueue::new();
        let doomed = submit(&store, &queue, spec(3)).await;
        submit(&store, &queue, spec(2)).await;

        assert_eq!(queue.remove_job(&doomed).await, 3);
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn test_busy_job_does_not_block_other_jobs() {
        let store = JobStore::in_memory();
        let queue = TaskQueue::new();
        let busy = submit(&store, &queue, spec(2)).await;
        let free = submit(&store, &queue, spec(1)).await;

        let handle = store.get(&busy).await.unwrap();
        let guard = handle.lock().await;

        let a = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            queue.dequeue(&store, &WorkerId::new("w1"), &tags(&[]), Utc::now()),
        )
        .await
        .expect("dequeue waited on a locked job")
        .unwrap();
        assert_eq!(a.job_id, free);
        // The locked job keeps its place.
        assert_eq!(queue.len().await, 2);

        drop(guard);
        let a = queue
            .dequeue(&store, &WorkerId::new("w1"), &tags(&[]), Utc::now())
            .await
            .unwrap();
        assert_eq!(a.job_id, busy);
        assert_eq!(a.ordinal, 0);
    }

    #[tokio::test]
    async fn test_unmatched_groups_are_not_walked() {
        let store = JobStore::in_memory();
        let queue = TaskQueue::new();
        let gpu_job = submit(&store, &queue, spec(3).with_capability("gpu")).await;
        let cpu_job = submit(&store, &queue, spec(1)).await;
        {
            let handle = store.get(&gpu_job).await.unwrap();
            let mut entry = handle.lock().await;
            for task in entry.tasks.iter_mut() {
                task.cancel(Utc::now());
            }
        }

        // The GPU entries are stale, but only a GPU worker would notice.
        let a = queue
            .dequeue(&store, &WorkerId::new("cpu"), &tags(&[]), Utc::now())
            .await
            .unwrap();
        assert_eq!(a.job_id, cpu_job);
        assert_eq!(queue.len().await, 3);

        assert!(queue
            .dequeue(&store, &WorkerId::new("gpu"), &tags(&["gpu"]), Utc::now())
            .await
            .is_none());
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_order_holds_across_capability_groups() {
        let store = JobStore::in_memory();
        let queue = TaskQueue::new();
        let first = submit(&store, &queue, spec(1)).await;
        let gpu = submit(&store, &queue, spec(1).with_capability("gpu")).await;
        let urgent = submit(&store, &queue, spec(1).with_capability("gpu").with_priority(5)).await;
        let last = submit(&store, &queue, spec(1)).await;
        let worker = WorkerId::new("gpu");

        let mut got = Vec::new();
        let capability = tags(&["gpu", "x86"]);
        while let Some(a) = queue.dequeue(&store, &worker, &capability, Utc::now()).await {
            got.push(a.job_id);
        }
        assert_eq!(got, vec![urgent, first, gpu, last]);
    }

    #[tokio::test]
    async fn test_remove_job_across_groups() {
        let store = JobStore::in_memory();
        let queue = TaskQueue::new();
        let gpu_job = submit(&store, &queue, spec(2).with_capability("gpu")).await;
        submit(&store, &queue, spec(1)).await;

        assert_eq!(queue.remove_job(&gpu_job).await, 2);
        assert_eq!(queue.len().await, 1);
        assert!(queue
            .dequeue(&store, &WorkerId::new("gpu"), &tags(&["gpu"]), Utc::now())
            .await
            .is_some());
    }
}
