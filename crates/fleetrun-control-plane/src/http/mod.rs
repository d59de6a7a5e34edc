//! HTTP server for the control plane.
//!
//! Provides endpoints for:
//! - Jobs (`/v1/jobs`): submit, list, status, cancel
//! - Workers (`/v1/workers`): register, list, heartbeat, request work
//! - Task results (`/v1/tasks/{task_id}/result`)
//! - Health check (`/health`)
//! - Prometheus metrics (`/metrics`)

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

mod error;
mod handlers;

pub use error::ApiError;

/// Header carrying the caller identity set by the fronting request router.
pub const SUBMITTED_BY_HEADER: &str = "x-fleetrun-user";

/// Create the HTTP router.
pub fn create_router(state: Arc<AppState>) -> Router {
    // CORS layer for dashboards on other origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Job routes
        .route(
            "/v1/jobs",
            post(handlers::submit_job).get(handlers::list_jobs),
        )
        .route("/v1/jobs/:job_id", get(handlers::get_job))
        .route("/v1/jobs/:job_id/cancel", post(handlers::cancel_job))
        // Worker routes
        .route(
            "/v1/workers",
            post(handlers::register_worker).get(handlers::list_workers),
        )
        .route("/v1/workers/:worker_id/heartbeat", post(handlers::heartbeat))
        .route("/v1/workers/:worker_id/tasks", post(handlers::request_task))
        .route("/v1/tasks/:task_id/result", post(handlers::report_task_result))
        // Observability routes
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
