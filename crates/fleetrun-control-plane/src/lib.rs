//! FleetRun Control Plane Library
//!
//! This crate provides the scheduling authority for FleetRun: the job
//! coordinator, task queue, worker registry, liveness monitor and the
//! HTTP surface workers and clients talk to.

pub mod config;
pub mod coordinator;
pub mod events;
pub mod http;
pub mod liveness;
pub mod metrics;
pub mod queue;
pub mod registry;
pub mod resolver;
pub mod scheduler;
pub mod shutdown;
pub mod state;
pub mod store;

pub use config::Config;
pub use coordinator::{JobCoordinator, ReclaimReason, ReportOutcome, RetryPolicy, StuckTask};
pub use events::{ChannelSink, JobEvent, MetricsSink, TracingSink};
pub use liveness::{LivenessConfig, LivenessMonitor, SweepReport};
pub use queue::TaskQueue;
pub use registry::WorkerRegistry;
pub use resolver::{DatasetResolver, PermissiveResolver, StaticCatalog};
pub use scheduler::Scheduler;
pub use state::AppState;
pub use store::{FileBackend, JobEntry, JobStore, MemoryBackend, StorageBackend};
