//! Workers against a real control plane over HTTP.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use fleetrun_client::http::HttpClient;
use fleetrun_control_plane::{http, AppState, Config};
use fleetrun_core::{JobSpec, JobStatus, TaskTemplate, WorkerCapability};
use fleetrun_worker::{AgentConfig, AgentStats, EchoExecutor, WorkerAgent};

async fn start_control_plane() -> (Arc<AppState>, HttpClient) {
    let state = AppState::with_config(Config {
        heartbeat_interval_ms: 20,
        liveness_timeout_ms: 2_000,
        ..Config::default()
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = http::create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (state, HttpClient::new(&format!("http://{addr}")))
}

fn agent(client: &HttpClient, hostname: &str) -> WorkerAgent {
    WorkerAgent::new(
        Arc::new(client.clone()),
        Arc::new(EchoExecutor::new().with_delay(Duration::from_millis(5))),
        AgentConfig {
            capability: WorkerCapability::new(hostname),
            poll_interval: Duration::from_millis(10),
            retry_delay: Duration::from_millis(10),
            idle_shutdown: Some(Duration::from_millis(300)),
            ..AgentConfig::default()
        },
    )
}

async fn run_all(agents: Vec<WorkerAgent>) -> Vec<AgentStats> {
    let handles: Vec<_> = agents
        .into_iter()
        .map(|agent| tokio::spawn(async move { agent.run(CancellationToken::new()).await }))
        .collect();

    let mut stats = Vec::new();
    for handle in handles {
        let result = tokio::time::timeout(Duration::from_secs(20), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        stats.push(result);
    }
    stats
}

#[tokio::test]
async fn test_two_workers_complete_a_job() {
    let (_state, client) = start_control_plane().await;
    let submitted = client
        .submit_job(
            JobSpec::new("iris", TaskTemplate::new("echo"), 10, "datasets/iris.csv"),
            "alice",
        )
        .await
        .unwrap();
    assert_eq!(submitted.total_tasks, 10);

    let stats = run_all(vec![agent(&client, "node-1"), agent(&client, "node-2")]).await;
    let succeeded: u64 = stats.iter().map(|s| s.tasks_succeeded).sum();
    assert_eq!(succeeded, 10);
    assert!(stats.iter().all(|s| s.reports_rejected == 0));

    let job = client.get_job(&submitted.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.completed_tasks, 10);
    assert!((job.progress - 1.0).abs() < f64::EPSILON);
    assert_eq!(job.aggregate_metrics.samples, 10);

    let workers = client.list_workers().await.unwrap().workers;
    assert_eq!(workers.len(), 2);
    let completed: u64 = workers.iter().map(|w| w.completed_count).sum();
    assert_eq!(completed, 10);
}

#[tokio::test]
async fn test_failing_task_exhausts_retries() {
    let (_state, client) = start_control_plane().await;
    let mut template = TaskTemplate::new("echo");
    template.parameters = serde_json::json!({ "fail": true });
    let submitted = client
        .submit_job(
            JobSpec::new("broken", template, 1, "datasets/iris.csv").with_max_retries(3),
            "alice",
        )
        .await
        .unwrap();

    let stats = run_all(vec![agent(&client, "node-1")]).await;
    assert_eq!(stats[0].tasks_failed, 3);

    let job = client.get_job(&submitted.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::FailedPartial);
    assert_eq!(job.failed_tasks, 1);
}

#[tokio::test]
async fn test_cancelled_job_stops_running_task() {
    let (state, client) = start_control_plane().await;
    let submitted = client
        .submit_job(
            JobSpec::new("long", TaskTemplate::new("echo"), 1, "datasets/iris.csv"),
            "alice",
        )
        .await
        .unwrap();

    let slow = WorkerAgent::new(
        Arc::new(client.clone()),
        Arc::new(EchoExecutor::new().with_delay(Duration::from_secs(30))),
        AgentConfig {
            capability: WorkerCapability::new("node-1"),
            poll_interval: Duration::from_millis(10),
            idle_shutdown: Some(Duration::from_millis(200)),
            ..AgentConfig::default()
        },
    );
    let handle = tokio::spawn(async move { slow.run(CancellationToken::new()).await });

    // Wait for the task to be picked up before cancelling.
    for _ in 0..200 {
        if state.queue.is_empty().await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    client.cancel_job(&submitted.job_id).await.unwrap();

    let stats = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(stats.tasks_failed, 1);

    let job = client.get_job(&submitted.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
}
