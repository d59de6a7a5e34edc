//! FleetRun Worker Library
//!
//! The worker agent pulls tasks from the control plane, runs them through a
//! [`TaskExecutor`] and reports the outcome, heartbeating in the background.

pub mod agent;
pub mod config;
pub mod executor;
pub mod shutdown;

pub use agent::{AgentConfig, AgentError, AgentStats, ControlPlaneApi, WorkerAgent};
pub use config::{Config, ExecutorKind};
pub use executor::{
    EchoExecutor, ExecutorError, SimulatedTrainingExecutor, TaskContext, TaskExecutor, TaskOutput,
};
