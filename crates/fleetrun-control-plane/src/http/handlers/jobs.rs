//! Job handlers.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};

use fleetrun_core::JobId;
use fleetrun_proto::{
    CancelJobResponse, JobStatusResponse, ListJobsResponse, SubmitJobRequest, SubmitJobResponse,
};

use crate::http::{ApiError, SUBMITTED_BY_HEADER};
use crate::state::AppState;

/// Caller identity: the body field wins, then the router header.
fn submitter(request: &SubmitJobRequest, headers: &HeaderMap) -> String {
    if !request.submitted_by.is_empty() {
        return request.submitted_by.clone();
    }
    headers
        .get(SUBMITTED_BY_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
        .unwrap_or("anonymous")
        .to_string()
}

/// Submit a job.
pub async fn submit_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitJobResponse>), ApiError> {
    let Json(request) = payload?;
    let submitted_by = submitter(&request, &headers);
    let job = state.coordinator.submit(request.spec, &submitted_by).await?;

    Ok((
        StatusCode::CREATED,
        Json(SubmitJobResponse {
            job_id: job.id,
            status: job.status,
            total_tasks: job.total_tasks,
        }),
    ))
}

/// List all jobs in submission order.
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<ListJobsResponse> {
    let jobs = state.coordinator.list().await;
    Json(ListJobsResponse {
        jobs: jobs.iter().map(JobStatusResponse::from).collect(),
    })
}

/// Status of one job.
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state.coordinator.job(&JobId::new(job_id)).await?;
    Ok(Json(JobStatusResponse::from(&job)))
}

/// Cancel a job.
pub async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<CancelJobResponse>, ApiError> {
    let response = state.coordinator.cancel(&JobId::new(job_id)).await?;
    Ok(Json(response))
}
