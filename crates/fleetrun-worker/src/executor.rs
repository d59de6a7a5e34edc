//! Task executors.
//!
//! An executor turns one [`Assignment`] into a [`TaskOutput`]. The agent runs
//! each execution on its own tokio task, so an executor may block on timers
//! or I/O freely. It should watch [`TaskContext::cancel`] and return
//! [`ExecutorError::Cancelled`] when it fires.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use fleetrun_core::TaskResult;
use fleetrun_proto::Assignment;

/// Result payload of a successful execution.
pub type TaskOutput = TaskResult;

/// Errors that can occur during task execution.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("cancelled")]
    Cancelled,

    #[error("Invalid task parameters: {0}")]
    InvalidParameters(String),

    #[error("Execution failed: {0}")]
    Failed(String),
}

/// Everything an executor gets for one task.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub assignment: Assignment,

    /// Fires when the control plane asks the worker to abandon the task.
    pub cancel: CancellationToken,
}

impl TaskContext {
    pub fn new(assignment: Assignment, cancel: CancellationToken) -> Self {
        Self { assignment, cancel }
    }

    /// Number of units covered by the task.
    pub fn unit_count(&self) -> u64 {
        self.assignment
            .unit_end
            .saturating_sub(self.assignment.unit_start)
    }

    /// Sleep for `duration`, or fail early if the task is cancelled.
    pub async fn sleep(&self, duration: Duration) -> Result<(), ExecutorError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ExecutorError::Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Boolean flag from the task template parameters.
    fn flag(&self, name: &str) -> Result<bool, ExecutorError> {
        match self.assignment.task_template.parameters.get(name) {
            None | Some(serde_json::Value::Null) => Ok(false),
            Some(serde_json::Value::Bool(value)) => Ok(*value),
            Some(other) => Err(ExecutorError::InvalidParameters(format!(
                "'{name}' must be a boolean, got {other}"
            ))),
        }
    }
}

/// Executes tasks handed out by the control plane.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, ExecutorError>;
}

// ============================================================================
// Simulated training
// ============================================================================

/// Pretends to train a model, one epoch per unit.
///
/// Each epoch sleeps a random duration, and the reported `loss` falls while
/// `accuracy` rises with the epoch index, plus a little noise.
#[derive(Debug, Clone)]
pub struct SimulatedTrainingExecutor {
    min_epoch_duration: Duration,
    max_epoch_duration: Duration,
    failure_rate: f64,
}

impl SimulatedTrainingExecutor {
    pub fn new() -> Self {
        Self {
            min_epoch_duration: Duration::from_millis(1_000),
            max_epoch_duration: Duration::from_millis(4_000),
            failure_rate: 0.0,
        }
    }

    /// Bounds for the random per-epoch sleep.
    pub fn with_epoch_duration(mut self, min: Duration, max: Duration) -> Self {
        self.min_epoch_duration = min.min(max);
        self.max_epoch_duration = min.max(max);
        self
    }

    /// Probability in `[0, 1]` that a task fails after its last epoch.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    fn epoch_duration(&self) -> Duration {
        let min = self.min_epoch_duration.as_millis() as u64;
        let max = self.max_epoch_duration.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

impl Default for SimulatedTrainingExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Loss and accuracy after `epoch`, without noise.
pub fn training_curve(epoch: u64) -> (f64, f64) {
    let epoch = epoch as f64;
    let loss = 2.5 / (1.0 + epoch * 0.2);
    let accuracy = 0.1 + epoch * 0.08;
    (loss, accuracy)
}

#[async_trait]
impl TaskExecutor for SimulatedTrainingExecutor {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, ExecutorError> {
        let mut loss = 0.0;
        let mut accuracy = 0.0;

        for epoch in ctx.assignment.unit_start..ctx.assignment.unit_end {
            ctx.sleep(self.epoch_duration()).await?;

            let (base_loss, base_accuracy) = training_curve(epoch);
            let (loss_noise, accuracy_noise) = {
                let mut rng = rand::thread_rng();
                (rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5)
            };
            loss = (base_loss + loss_noise * 0.1).max(0.01);
            accuracy = (base_accuracy + accuracy_noise * 0.02).clamp(0.0, 0.99);

            debug!(
                task_id = %ctx.assignment.task_id,
                epoch,
                loss,
                accuracy,
                "Epoch finished"
            );
        }

        if self.failure_rate > 0.0 && rand::thread_rng().gen::<f64>() < self.failure_rate {
            return Err(ExecutorError::Failed(format!(
                "simulated failure on units {}..{}",
                ctx.assignment.unit_start, ctx.assignment.unit_end
            )));
        }

        Ok(TaskOutput::default()
            .with_metric("loss", loss)
            .with_metric("accuracy", accuracy)
            .with_message(format!(
                "trained {} epoch(s) on {}",
                ctx.unit_count(),
                ctx.assignment.data_ref
            )))
    }
}

// ============================================================================
// Echo
// ============================================================================

/// Reports how many units it was given.
///
/// Setting the template parameter `"fail": true` makes every execution fail.
#[derive(Debug, Clone, Default)]
pub struct EchoExecutor {
    delay: Duration,
}

impl EchoExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl TaskExecutor for EchoExecutor {
    fn name(&self) -> &str {
        "echo"
    }

    async fn execute(&self, ctx: TaskContext) -> Result<TaskOutput, ExecutorError> {
        if !self.delay.is_zero() {
            ctx.sleep(self.delay).await?;
        }
        if ctx.flag("fail")? {
            return Err(ExecutorError::Failed("failure requested by task".to_string()));
        }

        Ok(TaskOutput::default()
            .with_metric("units", ctx.unit_count() as f64)
            .with_message(format!(
                "{} units [{}, {})",
                ctx.assignment.task_template.kind,
                ctx.assignment.unit_start,
                ctx.assignment.unit_end
            )))
    }
}
