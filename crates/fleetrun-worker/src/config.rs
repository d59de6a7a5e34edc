//! Worker configuration.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use fleetrun_core::WorkerCapability;

use crate::agent::AgentConfig;
use crate::executor::{EchoExecutor, SimulatedTrainingExecutor, TaskExecutor};

const DEFAULT_CONTROL_PLANE: &str = "http://127.0.0.1:8080";
const DEFAULT_MAX_CONCURRENT_TASKS: u32 = 1;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 5_000;

/// Which built-in executor runs the tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExecutorKind {
    /// Simulated model training with random epoch durations.
    Simulated,
    /// Answers immediately with the unit count.
    Echo,
}

/// Worker configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "fleetrun-worker", version, about = "FleetRun worker agent")]
pub struct Config {
    /// Control plane base URL.
    #[arg(long, env = "FLEETRUN_CONTROL_PLANE", default_value = DEFAULT_CONTROL_PLANE)]
    pub control_plane: String,

    /// Hostname reported at registration. Defaults to $HOSTNAME.
    #[arg(long, env = "FLEETRUN_HOSTNAME")]
    pub hostname: Option<String>,

    /// Capability tags (e.g. gpu, region-eu).
    #[arg(long = "tag", env = "FLEETRUN_TAGS", value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Maximum tasks executed at once.
    #[arg(long, env = "FLEETRUN_MAX_CONCURRENT_TASKS", default_value_t = DEFAULT_MAX_CONCURRENT_TASKS)]
    pub max_concurrent_tasks: u32,

    /// Delay between requests when no task is available.
    #[arg(long, env = "FLEETRUN_POLL_INTERVAL_MS", default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    pub poll_interval_ms: u64,

    /// Heartbeat interval. Defaults to the interval the control plane advertises.
    #[arg(long, env = "FLEETRUN_HEARTBEAT_INTERVAL_MS")]
    pub heartbeat_interval_ms: Option<u64>,

    /// Reconnection delay when the control plane cannot be reached.
    #[arg(long, env = "FLEETRUN_RECONNECT_DELAY_MS", default_value_t = DEFAULT_RECONNECT_DELAY_MS)]
    pub reconnect_delay_ms: u64,

    /// Exit after this long without work. Runs forever when unset.
    #[arg(long, env = "FLEETRUN_IDLE_SHUTDOWN_MS")]
    pub idle_shutdown_ms: Option<u64>,

    /// Executor that runs the tasks.
    #[arg(long, env = "FLEETRUN_EXECUTOR", value_enum, default_value_t = ExecutorKind::Simulated)]
    pub executor: ExecutorKind,

    /// Probability that a simulated task fails.
    #[arg(long, env = "FLEETRUN_FAILURE_RATE", default_value_t = 0.0)]
    pub failure_rate: f64,
}

impl Config {
    /// Hostname to register with.
    pub fn hostname(&self) -> String {
        self.hostname
            .clone()
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// What this worker offers the scheduler.
    pub fn capability(&self) -> WorkerCapability {
        let capability = WorkerCapability::new(self.hostname())
            .with_max_concurrent_tasks(self.max_concurrent_tasks.max(1));
        self.tags
            .iter()
            .filter(|tag| !tag.is_empty())
            .fold(capability, |capability, tag| capability.with_tag(tag.clone()))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Loop timings for the agent.
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            capability: self.capability(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            heartbeat_interval: self.heartbeat_interval_ms.map(Duration::from_millis),
            retry_delay: self.reconnect_delay(),
            idle_shutdown: self.idle_shutdown_ms.map(Duration::from_millis),
            ..AgentConfig::default()
        }
    }

    /// Build the configured executor.
    pub fn build_executor(&self) -> Arc<dyn TaskExecutor> {
        match self.executor {
            ExecutorKind::Simulated => {
                Arc::new(SimulatedTrainingExecutor::new().with_failure_rate(self.failure_rate))
            }
            ExecutorKind::Echo => Arc::new(EchoExecutor::new()),
        }
    }

    /// Settings that are accepted but likely to misbehave.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !(0.0..=1.0).contains(&self.failure_rate) {
            warnings.push(format!(
                "failure rate {} is outside [0, 1] and will be clamped",
                self.failure_rate
            ));
        }
        if self.failure_rate > 0.0 && self.executor != ExecutorKind::Simulated {
            warnings.push("failure rate only applies to the simulated executor".to_string());
        }
        if self.max_concurrent_tasks == 0 {
            warnings.push("max_concurrent_tasks of 0 is treated as 1".to_string());
        }
        warnings
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            control_plane: DEFAULT_CONTROL_PLANE.to_string(),
            hostname: None,
            tags: Vec::new(),
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            heartbeat_interval_ms: None,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            idle_shutdown_ms: None,
            executor: ExecutorKind::Simulated,
            failure_rate: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flags() {
        let config = Config::try_parse_from([
            "fleetrun-worker",
            "--control-plane",
            "http://cp:9000",
            "--hostname",
            "gpu-01",
            "--tag",
            "gpu,region-eu",
            "--max-concurrent-tasks",
            "4",
            "--executor",
            "echo",
            "--idle-shutdown-ms",
            "2500",
        ])
        .unwrap();

        assert_eq!(config.control_plane, "http://cp:9000");
        assert_eq!(config.executor, ExecutorKind::Echo);

        let capability = config.capability();
        assert_eq!(capability.hostname, "gpu-01");
        assert!(capability.tags.contains("gpu"));
        assert!(capability.tags.contains("region-eu"));
        assert_eq!(capability.max_concurrent_tasks, 4);

        let agent = config.agent_config();
        assert_eq!(agent.idle_shutdown, Some(Duration::from_millis(2500)));
        assert_eq!(agent.heartbeat_interval, None);
    }

    #[test]
    fn test_defaults_match_parser() {
        let parsed = Config::try_parse_from(["fleetrun-worker"]).unwrap();
        let default = Config::default();
        assert_eq!(parsed.control_plane, default.control_plane);
        assert_eq!(parsed.poll_interval_ms, default.poll_interval_ms);
        assert_eq!(parsed.max_concurrent_tasks, default.max_concurrent_tasks);
        assert_eq!(parsed.executor, default.executor);
    }

    #[test]
    fn test_warnings() {
        assert!(Config::default().warnings().is_empty());

        let config = Config {
            failure_rate: 1.5,
            executor: ExecutorKind::Echo,
            max_concurrent_tasks: 0,
            ..Config::default()
        };
        assert_eq!(config.warnings().len(), 3);
        assert_eq!(config.capability().max_concurrent_tasks, 1);
    }
}
