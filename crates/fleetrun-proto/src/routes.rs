//! HTTP paths of the RPC surface.

use fleetrun_core::{JobId, TaskId, WorkerId};

pub const HEALTH: &str = "/health";
pub const METRICS: &str = "/metrics";
pub const JOBS: &str = "/v1/jobs";
pub const WORKERS: &str = "/v1/workers";

pub fn job(job_id: &JobId) -> String {
    format!("{JOBS}/{job_id}")
}

pub fn cancel_job(job_id: &JobId) -> String {
    format!("{JOBS}/{job_id}/cancel")
}

pub fn heartbeat(worker_id: &WorkerId) -> String {
    format!("{WORKERS}/{worker_id}/heartbeat")
}

pub fn request_task(worker_id: &WorkerId) -> String {
    format!("{WORKERS}/{worker_id}/tasks")
}

pub fn task_result(task_id: &TaskId) -> String {
    format!("/v1/tasks/{task_id}/result")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(job(&JobId::new("j1")), "/v1/jobs/j1");
        assert_eq!(cancel_job(&JobId::new("j1")), "/v1/jobs/j1/cancel");
        assert_eq!(heartbeat(&WorkerId::new("w1")), "/v1/workers/w1/heartbeat");
        assert_eq!(request_task(&WorkerId::new("w1")), "/v1/workers/w1/tasks");
        assert_eq!(task_result(&TaskId::new("t1")), "/v1/tasks/t1/result");
    }
}
