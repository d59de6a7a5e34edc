//! End-to-end scheduling scenarios driven through the library API.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use fleetrun_control_plane::{AppState, Config};
use fleetrun_core::{
    JobSpec, JobStatus, TaskResult, TaskStatus, TaskTemplate, WorkerCapability, WorkerId,
};
use fleetrun_proto::{Assignment, ReportTaskResultRequest};

fn spec(units: u64) -> JobSpec {
    JobSpec::new("iris", TaskTemplate::new("train"), units, "datasets/iris.csv")
}

fn config() -> Config {
    Config {
        heartbeat_interval_ms: 1_000,
        liveness_timeout_ms: 3_000,
        max_retries: 3,
        ..Config::default()
    }
}

async fn register(state: &AppState, hostname: &str) -> WorkerId {
    state
        .scheduler
        .register_worker(WorkerCapability::new(hostname))
        .await
}

async fn next(state: &AppState, worker_id: &WorkerId) -> Option<Assignment> {
    state.scheduler.request_task(worker_id, None).await.unwrap()
}

async fn complete(state: &AppState, worker_id: &WorkerId, assignment: &Assignment) {
    let loss = 2.5 / (1.0 + assignment.unit_start as f64 * 0.2);
    let report = ReportTaskResultRequest::success(
        worker_id.clone(),
        TaskResult::default().with_metric("loss", loss),
    );
    state
        .coordinator
        .report(&assignment.task_id, &report)
        .await
        .unwrap();
}

#[tokio::test]
async fn scenario_two_workers_split_ten_units() {
    let state = AppState::with_config(config());
    let job = state.coordinator.submit(spec(10), "alice").await.unwrap();
    assert_eq!(job.total_tasks, 10);

    let a = register(&state, "node-a").await;
    let b = register(&state, "node-b").await;
    let mut per_worker = [0, 0];

    loop {
        let mut progressed = false;
        for (i, worker) in [&a, &b].into_iter().enumerate() {
            if let Some(assignment) = next(&state, worker).await {
                complete(&state, worker, &assignment).await;
                per_worker[i] += 1;
                progressed = true;
            }
        }
        if !progressed {
            break;
        }
    }

    assert_eq!(per_worker, [5, 5]);
    let job = state.coordinator.job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress(), 1.0);
    assert_eq!(job.aggregate_metrics.samples, 10);
}

#[tokio::test]
async fn scenario_dead_worker_task_is_reassigned() {
    let state = AppState::with_config(config());
    let monitor = state.liveness_monitor();
    let job = state.coordinator.submit(spec(4), "alice").await.unwrap();
    let start = Utc::now();

    let doomed = register(&state, "node-a").await;
    for _ in 0..2 {
        let assignment = next(&state, &doomed).await.unwrap();
        complete(&state, &doomed, &assignment).await;
    }
    let held = next(&state, &doomed).await.unwrap();
    assert_eq!(held.ordinal, 2);

    // The worker dies; the liveness monitor notices after the timeout.
    let report = monitor.sweep(start + Duration::seconds(10)).await;
    assert_eq!(report.reclaimed_tasks, 1);

    let survivor = register(&state, "node-b").await;
    let retry = next(&state, &survivor).await.unwrap();
    assert_eq!(retry.task_id, held.task_id);
    assert_eq!(retry.attempt, 2);
    complete(&state, &survivor, &retry).await;

    let last = next(&state, &survivor).await.unwrap();
    assert_eq!(last.ordinal, 3);
    complete(&state, &survivor, &last).await;

    let job = state.coordinator.job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.completed_tasks, 4);

    // A late report from the dead worker is ignored.
    let late = ReportTaskResultRequest::success(doomed, TaskResult::default());
    let outcome = state
        .coordinator
        .report(&held.task_id, &late)
        .await
        .unwrap();
    assert!(!outcome.response().accepted);
    assert_eq!(
        state.coordinator.job(&job.id).await.unwrap().completed_tasks,
        4
    );
}

#[tokio::test]
async fn scenario_cancel_stops_assignment() {
    let state = AppState::with_config(config());
    let job = state.coordinator.submit(spec(5), "alice").await.unwrap();
    let worker = register(&state, "node-a").await;

    let response = state.coordinator.cancel(&job.id).await.unwrap();
    assert!(response.accepted);
    assert!(next(&state, &worker).await.is_none());
    assert!(state.queue.is_empty().await);

    let job = state.coordinator.job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.cancelled_tasks, 5);

    let tasks = state.coordinator.tasks(&job.id).await.unwrap();
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Cancelled));
}

#[tokio::test]
async fn scenario_repeated_failure_fails_job_partially() {
    let state = AppState::with_config(config());
    let job = state.coordinator.submit(spec(2), "alice").await.unwrap();
    let worker = register(&state, "node-a").await;

    let healthy = next(&state, &worker).await.unwrap();
    complete(&state, &worker, &healthy).await;

    for attempt in 1..=3 {
        let flaky = next(&state, &worker).await.unwrap();
        assert_eq!(flaky.ordinal, 1);
        assert_eq!(flaky.attempt, attempt);
        let failure = ReportTaskResultRequest::failure(worker.clone(), "out of memory");
        state
            .coordinator
            .report(&flaky.task_id, &failure)
            .await
            .unwrap();
    }

    assert!(next(&state, &worker).await.is_none());
    let job = state.coordinator.job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::FailedPartial);
    assert_eq!(job.completed_tasks, 1);
    assert_eq!(job.failed_tasks, 1);
}

#[tokio::test]
async fn concurrent_workers_never_share_a_task() {
    let state = AppState::with_config(config());
    state.coordinator.submit(spec(200), "alice").await.unwrap();

    let mut handles = Vec::new();
    for i in 0..16 {
        let state = Arc::clone(&state);
        handles.push(tokio::spawn(async move {
            let worker = register(&state, &format!("node-{i}")).await;
            let mut taken = Vec::new();
            loop {
                match next(&state, &worker).await {
                    Some(assignment) => {
                        taken.push(assignment.task_id.clone());
                        complete(&state, &worker, &assignment).await;
                    }
                    // A job locked by another worker's report is skipped, not drained.
                    None if !state.queue.is_empty().await => tokio::task::yield_now().await,
                    None => break,
                }
            }
            taken
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for task_id in handle.await.unwrap() {
            assert!(seen.insert(task_id), "task handed out twice");
        }
    }
    assert_eq!(seen.len(), 200);
}

#[tokio::test]
async fn no_task_lost_when_workers_die() {
    let state = AppState::with_config(config());
    let monitor = state.liveness_monitor();
    let job = state.coordinator.submit(spec(12), "alice").await.unwrap();
    let start = Utc::now();

    // Three workers each grab a task and vanish.
    for i in 0..3 {
        let worker = register(&state, &format!("doomed-{i}")).await;
        next(&state, &worker).await.unwrap();
    }
    let report = monitor.sweep(start + Duration::seconds(10)).await;
    assert_eq!(report.expired_workers.len(), 3);
    assert_eq!(report.reclaimed_tasks, 3);

    let survivor = register(&state, "survivor").await;
    while let Some(assignment) = next(&state, &survivor).await {
        complete(&state, &survivor, &assignment).await;
    }

    let job = state.coordinator.job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.completed_tasks, 12);
}

#[tokio::test]
async fn progress_never_decreases() {
    let state = AppState::with_config(config());
    let job = state.coordinator.submit(spec(6), "alice").await.unwrap();
    let worker = register(&state, "node-a").await;
    let mut last = 0.0;

    while let Some(assignment) = next(&state, &worker).await {
        if assignment.ordinal % 2 == 0 && assignment.attempt == 1 {
            let failure = ReportTaskResultRequest::failure(worker.clone(), "transient");
            state
                .coordinator
                .report(&assignment.task_id, &failure)
                .await
                .unwrap();
        } else {
            complete(&state, &worker, &assignment).await;
        }

        let progress = state.coordinator.job(&job.id).await.unwrap().progress();
        assert!(progress >= last);
        last = progress;
    }
    assert_eq!(last, 1.0);
}
