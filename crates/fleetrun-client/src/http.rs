//! HTTP client for the control plane RPC surface.

use std::time::Duration;

use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use fleetrun_core::{JobId, JobSpec, TaskId, TaskResult, WorkerCapability, WorkerId, WorkerStatus};
use fleetrun_proto::{
    routes, Assignment, CancelJobResponse, ErrorResponse, HeartbeatRequest, HeartbeatResponse,
    JobStatusResponse, ListJobsResponse, ListWorkersResponse, RegisterWorkerRequest,
    RegisterWorkerResponse, ReportTaskResultRequest, ReportTaskResultResponse,
    RequestTaskRequest, RequestTaskResponse, SubmitJobRequest, SubmitJobResponse,
};

use crate::error::ClientError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the control plane.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: reqwest::Client,
    base_url: String,
}

impl HttpClient {
    /// Create a new HTTP client.
    pub fn new(base_url: &str) -> Self {
        let inner = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self::with_client(base_url, inner)
    }

    /// Create a client around a preconfigured `reqwest::Client`.
    pub fn with_client(base_url: &str, inner: reqwest::Client) -> Self {
        Self {
            inner,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if the control plane is healthy.
    pub async fn health(&self) -> Result<bool, ClientError> {
        let url = format!("{}{}", self.base_url, routes::HEALTH);
        debug!(url = %url, "Checking health");

        let response = self.inner.get(&url).send().await?;
        Ok(response.status().is_success())
    }

    // ========================================================================
    // Jobs
    // ========================================================================

    pub async fn submit_job(
        &self,
        spec: JobSpec,
        submitted_by: &str,
    ) -> Result<SubmitJobResponse, ClientError> {
        let body = SubmitJobRequest {
            spec,
            submitted_by: submitted_by.to_string(),
        };
        self.send(Method::POST, routes::JOBS, Some(&body)).await
    }

    pub async fn get_job(&self, job_id: &JobId) -> Result<JobStatusResponse, ClientError> {
        self.send::<(), _>(Method::GET, &routes::job(job_id), None)
            .await
    }

    pub async fn list_jobs(&self) -> Result<ListJobsResponse, ClientError> {
        self.send::<(), _>(Method::GET, routes::JOBS, None).await
    }

    pub async fn cancel_job(&self, job_id: &JobId) -> Result<CancelJobResponse, ClientError> {
        self.send::<(), _>(Method::POST, &routes::cancel_job(job_id), None)
            .await
    }

    // ========================================================================
    // Workers
    // ========================================================================

    pub async fn register_worker(
        &self,
        capability: WorkerCapability,
    ) -> Result<RegisterWorkerResponse, ClientError> {
        let body = RegisterWorkerRequest { capability };
        self.send(Method::POST, routes::WORKERS, Some(&body)).await
    }

    pub async fn list_workers(&self) -> Result<ListWorkersResponse, ClientError> {
        self.send::<(), _>(Method::GET, routes::WORKERS, None).await
    }

    pub async fn heartbeat(
        &self,
        worker_id: &WorkerId,
        status: WorkerStatus,
        current_tasks: Vec<TaskId>,
        capability: Option<WorkerCapability>,
    ) -> Result<HeartbeatResponse, ClientError> {
        let body = HeartbeatRequest {
            capability,
            ..HeartbeatRequest::new(status, current_tasks)
        };
        self.send(Method::POST, &routes::heartbeat(worker_id), Some(&body))
            .await
    }

    pub async fn request_task(
        &self,
        worker_id: &WorkerId,
        capability: Option<WorkerCapability>,
    ) -> Result<Option<Assignment>, ClientError> {
        let body = RequestTaskRequest { capability };
        let response: RequestTaskResponse = self
            .send(Method::POST, &routes::request_task(worker_id), Some(&body))
            .await?;
        Ok(response.task)
    }

    pub async fn report_success(
        &self,
        task_id: &TaskId,
        worker_id: &WorkerId,
        result: TaskResult,
    ) -> Result<ReportTaskResultResponse, ClientError> {
        let body = ReportTaskResultRequest::success(worker_id.clone(), result);
        self.report(task_id, &body).await
    }

    pub async fn report_failure(
        &self,
        task_id: &TaskId,
        worker_id: &WorkerId,
        error: &str,
    ) -> Result<ReportTaskResultResponse, ClientError> {
        let body = ReportTaskResultRequest::failure(worker_id.clone(), error);
        self.report(task_id, &body).await
    }

    pub async fn report(
        &self,
        task_id: &TaskId,
        body: &ReportTaskResultRequest,
    ) -> Result<ReportTaskResultResponse, ClientError> {
        self.send(Method::POST, &routes::task_result(task_id), Some(body))
            .await
    }

    // ========================================================================
    // Plumbing
    // ========================================================================

    async fn send<B, T>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!(method = %method, url = %url, "Control plane request");

        let mut request = self.inner.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        decode(response).await
    }
}

/// Turn a response into `T`, or into [`ClientError::Api`] for error statuses.
async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    let bytes = response.bytes().await?;

    if !status.is_success() {
        return Err(match serde_json::from_slice::<ErrorResponse>(&bytes) {
            Ok(error) => ClientError::Api {
                status,
                kind: error.kind,
                message: error.error,
            },
            Err(_) => ClientError::Api {
                status,
                kind: "Unknown".to_string(),
                message: String::from_utf8_lossy(&bytes).into_owned(),
            },
        });
    }

    serde_json::from_slice(&bytes).map_err(|e| ClientError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash() {
        let client = HttpClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let client = HttpClient::new("http://127.0.0.1:9");
        let err = client.list_jobs().await.unwrap_err();
        assert!(err.is_transport());
    }
}
