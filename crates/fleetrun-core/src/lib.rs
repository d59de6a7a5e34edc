//! FleetRun Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/HTTP
//! - Storage backends
//! - Runtime specifics
//!
//! Jobs are decomposed into Tasks, Tasks are executed by Workers, and the
//! per-task results fold back into a Job's aggregate metrics.

pub mod error;
pub mod ids;
pub mod job;
pub mod metrics;
pub mod status;
pub mod task;
pub mod worker;

// Re-export commonly used types
pub use error::CoreError;
pub use ids::{JobId, TaskId, WorkerId};
pub use job::{Job, JobSpec, TaskTemplate};
pub use metrics::AggregateMetrics;
pub use status::{JobStatus, TaskStatus, WorkerStatus};
pub use task::{Task, TaskResult};
pub use worker::{Worker, WorkerCapability};
