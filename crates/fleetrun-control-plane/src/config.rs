//! Control plane configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::coordinator::RetryPolicy;
use crate::liveness::LivenessConfig;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 5_000;
const DEFAULT_LIVENESS_TIMEOUT_MS: u64 = 15_000;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_MAX_REASSIGNMENTS: u32 = 5;
const DEFAULT_WORKER_PURGE_AFTER_MS: u64 = 300_000;

/// Control plane configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "fleetrun-control-plane", version, about = "FleetRun control plane")]
pub struct Config {
    /// HTTP server bind address.
    #[arg(long, env = "FLEETRUN_BIND_ADDR", default_value = DEFAULT_BIND_ADDR)]
    pub bind_addr: String,

    /// Directory for persisted job documents. In-memory only when unset.
    #[arg(long, env = "FLEETRUN_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Expected heartbeat interval from workers.
    #[arg(long, env = "FLEETRUN_HEARTBEAT_INTERVAL_MS", default_value_t = DEFAULT_HEARTBEAT_INTERVAL_MS)]
    pub heartbeat_interval_ms: u64,

    /// Silence after which a worker is considered unreachable.
    #[arg(long, env = "FLEETRUN_LIVENESS_TIMEOUT_MS", default_value_t = DEFAULT_LIVENESS_TIMEOUT_MS)]
    pub liveness_timeout_ms: u64,

    /// Maximum time a task may stay assigned before it is reclaimed.
    #[arg(long, env = "FLEETRUN_TASK_TIMEOUT_MS")]
    pub task_timeout_ms: Option<u64>,

    /// Default number of execution attempts per task.
    #[arg(long, env = "FLEETRUN_MAX_RETRIES", default_value_t = DEFAULT_MAX_RETRIES)]
    pub max_retries: u32,

    /// Reclaims from dead or stuck workers before a task is failed.
    #[arg(long, env = "FLEETRUN_MAX_REASSIGNMENTS", default_value_t = DEFAULT_MAX_REASSIGNMENTS)]
    pub max_reassignments: u32,

    /// How long an unreachable worker stays listed before it is removed.
    #[arg(long, env = "FLEETRUN_WORKER_PURGE_AFTER_MS", default_value_t = DEFAULT_WORKER_PURGE_AFTER_MS)]
    pub worker_purge_after_ms: u64,

    /// Known dataset references. Any non-empty reference is accepted when empty.
    #[arg(long = "dataset", env = "FLEETRUN_DATASETS", value_delimiter = ',')]
    pub datasets: Vec<String>,
}

impl Config {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }

    pub fn worker_purge_after(&self) -> Duration {
        Duration::from_millis(self.worker_purge_after_ms)
    }

    /// Retry and reassignment budgets applied by the coordinator.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries.max(1),
            max_reassignments: self.max_reassignments,
        }
    }

    /// Timeouts used by the liveness monitor. It ticks at half the heartbeat interval.
    pub fn liveness(&self) -> LivenessConfig {
        LivenessConfig {
            check_interval: (self.heartbeat_interval() / 2).max(Duration::from_millis(1)),
            liveness_timeout: self.liveness_timeout(),
            task_timeout: self.task_timeout(),
            worker_purge_after: self.worker_purge_after(),
        }
    }

    /// Settings that are accepted but likely to misbehave.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.liveness_timeout_ms < self.heartbeat_interval_ms.saturating_mul(3) {
            warnings.push(format!(
                "liveness timeout {}ms is below 3x the heartbeat interval {}ms; healthy workers may be expired",
                self.liveness_timeout_ms, self.heartbeat_interval_ms
            ));
        }
        if self.max_retries == 0 {
            warnings.push("max_retries of 0 is treated as 1".to_string());
        }
        warnings
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            data_dir: None,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            liveness_timeout_ms: DEFAULT_LIVENESS_TIMEOUT_MS,
            task_timeout_ms: None,
            max_retries: DEFAULT_MAX_RETRIES,
            max_reassignments: DEFAULT_MAX_REASSIGNMENTS,
            worker_purge_after_ms: DEFAULT_WORKER_PURGE_AFTER_MS,
            datasets: Vec::new(),
        }
    }
}
