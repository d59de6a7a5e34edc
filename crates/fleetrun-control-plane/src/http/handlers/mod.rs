//! HTTP request handlers.

mod health;
mod jobs;
mod tasks;
mod workers;

pub use health::{health_check, metrics_handler};
pub use jobs::{cancel_job, get_job, list_jobs, submit_job};
pub use tasks::report_task_result;
pub use workers::{heartbeat, list_workers, register_worker, request_task};
