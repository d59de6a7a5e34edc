//! Error types for the control plane client.

use reqwest::StatusCode;
use thiserror::Error;

/// Errors that can occur when talking to the control plane.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure (connection refused, timeout, ...).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The control plane answered with an error body.
    #[error("{kind} ({status}): {message}")]
    Api {
        status: StatusCode,
        kind: String,
        message: String,
    },

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ClientError {
    /// Error kind reported by the control plane, if any.
    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::Api { kind, .. } => Some(kind),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == Some("NotFound")
    }

    pub fn is_worker_unreachable(&self) -> bool {
        self.kind() == Some("WorkerUnreachable")
    }

    /// The request never got an answer from the control plane.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(kind: &str) -> ClientError {
        ClientError::Api {
            status: StatusCode::NOT_FOUND,
            kind: kind.to_string(),
            message: "Worker not found: w1".to_string(),
        }
    }

    #[test]
    fn test_kind_helpers() {
        assert!(api("NotFound").is_not_found());
        assert!(!api("NotFound").is_worker_unreachable());
        assert!(api("WorkerUnreachable").is_worker_unreachable());
        assert!(!api("NotFound").is_transport());
        assert_eq!(
            api("NotFound").to_string(),
            "NotFound (404 Not Found): Worker not found: w1"
        );
    }

    #[test]
    fn test_serialization_has_no_kind() {
        assert!(ClientError::Serialization("eof".into()).kind().is_none());
    }
}
