//! Task result handler.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};

use fleetrun_core::TaskId;
use fleetrun_proto::{ReportTaskResultRequest, ReportTaskResultResponse};

use crate::http::ApiError;
use crate::state::AppState;

/// Report the outcome of a task.
pub async fn report_task_result(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
    payload: Result<Json<ReportTaskResultRequest>, JsonRejection>,
) -> Result<Json<ReportTaskResultResponse>, ApiError> {
    let Json(request) = payload?;
    let outcome = state
        .coordinator
        .report(&TaskId::new(task_id), &request)
        .await?;
    Ok(Json(outcome.response()))
}
