//! Worker handlers.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};

use fleetrun_core::WorkerId;
use fleetrun_proto::{
    HeartbeatRequest, HeartbeatResponse, ListWorkersResponse, RegisterWorkerRequest,
    RegisterWorkerResponse, RequestTaskRequest, RequestTaskResponse, WorkerSummary,
};

use crate::http::ApiError;
use crate::state::AppState;

/// Register a worker.
pub async fn register_worker(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterWorkerRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisterWorkerResponse>), ApiError> {
    let Json(request) = payload?;
    let worker_id = state.scheduler.register_worker(request.capability).await;

    Ok((
        StatusCode::CREATED,
        Json(RegisterWorkerResponse {
            worker_id,
            heartbeat_interval_ms: state.config.heartbeat_interval_ms,
        }),
    ))
}

/// List workers as JSON.
pub async fn list_workers(State(state): State<Arc<AppState>>) -> Json<ListWorkersResponse> {
    let workers = state.registry.snapshot().await;
    Json(ListWorkersResponse {
        workers: workers.iter().map(WorkerSummary::from).collect(),
    })
}

/// Record a heartbeat.
pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Path(worker_id): Path<String>,
    payload: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let Json(request) = payload?;
    let response = state
        .scheduler
        .heartbeat(&WorkerId::new(worker_id), &request)
        .await;
    Ok(Json(response))
}

/// Ask for the next task.
pub async fn request_task(
    State(state): State<Arc<AppState>>,
    Path(worker_id): Path<String>,
    payload: Option<Json<RequestTaskRequest>>,
) -> Result<Json<RequestTaskResponse>, ApiError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let task = state
        .scheduler
        .request_task(&WorkerId::new(worker_id), request.capability)
        .await?;
    Ok(Json(RequestTaskResponse { task }))
}
