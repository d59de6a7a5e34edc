//! API error type and its HTTP mapping.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use fleetrun_core::CoreError;
use fleetrun_proto::ErrorResponse;

/// Error returned by any handler.
#[derive(Debug)]
pub enum ApiError {
    /// Domain error from the coordinator or scheduler.
    Core(CoreError),
    /// The request body could not be decoded.
    InvalidJson(String),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self::Core(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidJson(rejection.body_text())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidJson(_) => StatusCode::BAD_REQUEST,
            Self::Core(err) => match err {
                CoreError::InvalidSpec(_) => StatusCode::BAD_REQUEST,
                CoreError::JobNotFound(_)
                | CoreError::TaskNotFound(_)
                | CoreError::WorkerNotFound(_) => StatusCode::NOT_FOUND,
                CoreError::WorkerUnreachable(_) | CoreError::InvalidStateTransition { .. } => {
                    StatusCode::CONFLICT
                }
                CoreError::DuplicateReport(_) => StatusCode::OK,
                CoreError::TaskExecutionFailure { .. } | CoreError::Storage(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::InvalidJson(_) => "InvalidRequest",
            Self::Core(err) => err.kind(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let kind = self.kind();
        let message = match &self {
            Self::InvalidJson(message) => message.clone(),
            Self::Core(err) => err.to_string(),
        };

        if status.is_server_error() {
            error!(kind, error = %message, "Request failed");
        }

        let body = ErrorResponse {
            error: message,
            kind: kind.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (CoreError::InvalidSpec("x".into()), StatusCode::BAD_REQUEST),
            (CoreError::JobNotFound("j".into()), StatusCode::NOT_FOUND),
            (CoreError::WorkerNotFound("w".into()), StatusCode::NOT_FOUND),
            (CoreError::WorkerUnreachable("w".into()), StatusCode::CONFLICT),
            (CoreError::Storage("disk".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), status);
        }
    }
}
