//! Restart recovery through the file backend.

use std::sync::Arc;

use fleetrun_control_plane::{AppState, Config, FileBackend, PermissiveResolver, TracingSink};
use fleetrun_core::{JobSpec, JobStatus, TaskResult, TaskStatus, TaskTemplate, WorkerCapability};
use fleetrun_proto::ReportTaskResultRequest;
use tempfile::TempDir;

async fn open(dir: &TempDir) -> Arc<AppState> {
    let backend = FileBackend::open(dir.path()).await.unwrap();
    let state = AppState::new(
        Config::default(),
        Arc::new(backend),
        Arc::new(PermissiveResolver),
        Arc::new(TracingSink),
    );
    state.coordinator.restore().await.unwrap();
    state
}

#[tokio::test]
async fn restart_restores_pending_work() {
    let dir = TempDir::new().unwrap();

    let (job_id, in_flight) = {
        let state = open(&dir).await;
        let job = state
            .coordinator
            .submit(
                JobSpec::new("iris", TaskTemplate::new("train"), 4, "iris"),
                "alice",
            )
            .await
            .unwrap();
        let worker = state
            .scheduler
            .register_worker(WorkerCapability::new("node"))
            .await;

        let done = state
            .scheduler
            .request_task(&worker, None)
            .await
            .unwrap()
            .unwrap();
        state
            .coordinator
            .report(
                &done.task_id,
                &ReportTaskResultRequest::success(
                    worker.clone(),
                    TaskResult::default().with_metric("accuracy", 0.9),
                ),
            )
            .await
            .unwrap();

        let in_flight = state
            .scheduler
            .request_task(&worker, None)
            .await
            .unwrap()
            .unwrap();
        (job.id, in_flight.task_id)
    };

    let state = open(&dir).await;
    let job = state.coordinator.job(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert_eq!(job.completed_tasks, 1);
    assert_eq!(job.aggregate_metrics.samples, 1);
    assert_eq!(state.queue.len().await, 3);

    let tasks = state.coordinator.tasks(&job_id).await.unwrap();
    let reverted = tasks.iter().find(|t| t.id == in_flight).unwrap();
    assert_eq!(reverted.status, TaskStatus::Pending);

    let worker = state
        .scheduler
        .register_worker(WorkerCapability::new("node"))
        .await;
    while let Some(assignment) = state.scheduler.request_task(&worker, None).await.unwrap() {
        state
            .coordinator
            .report(
                &assignment.task_id,
                &ReportTaskResultRequest::success(worker.clone(), TaskResult::default()),
            )
            .await
            .unwrap();
    }

    let job = state.coordinator.job(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn restart_finalizes_cancelling_job() {
    let dir = TempDir::new().unwrap();

    let job_id = {
        let state = open(&dir).await;
        let job = state
            .coordinator
            .submit(
                JobSpec::new("iris", TaskTemplate::new("train"), 3, "iris"),
                "alice",
            )
            .await
            .unwrap();
        let worker = state
            .scheduler
            .register_worker(WorkerCapability::new("node"))
            .await;
        state.scheduler.request_task(&worker, None).await.unwrap();

        let response = state.coordinator.cancel(&job.id).await.unwrap();
        assert_eq!(response.status, JobStatus::Cancelling);
        job.id
    };

    let state = open(&dir).await;
    let job = state.coordinator.job(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.cancelled_tasks, 3);
    assert!(state.queue.is_empty().await);
}
