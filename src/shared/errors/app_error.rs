use serde::Serialize;
use thiserror::Error;

use crate::modules::jobs::domain::entities::FailureKind;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "message")]
pub enum AppError {
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Whether a poll cycle that hit this error should simply wait for the
    /// next scheduled attempt.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            AppError::NotFound(_) | AppError::InvalidInput(_) | AppError::InvalidOperation(_)
        )
    }

    /// The failure kind this error surfaces as when it ends a job, if any.
    /// Reported failures and timeouts come from snapshots and the poll
    /// ceiling, never from a backend call.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            AppError::NotFound(_) => Some(FailureKind::NotFound),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::BackendUnavailable("Request timeout".to_string())
        } else if err.is_connect() {
            AppError::BackendUnavailable("Failed to connect to job backend".to_string())
        } else if let Some(status) = err.status() {
            match status.as_u16() {
                429 => AppError::RateLimitError("Too many requests".to_string()),
                404 => AppError::NotFound("Job not found on backend".to_string()),
                500..=599 => AppError::BackendUnavailable(format!("HTTP {}: {}", status, err)),
                _ => AppError::ApiError(format!("HTTP {}: {}", status, err)),
            }
        } else if err.is_decode() {
            AppError::SerializationError(err.to_string())
        } else {
            AppError::BackendUnavailable(err.to_string())
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerializationError(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for AppError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        AppError::BackendUnavailable(format!("Push channel error: {}", err))
    }
}

// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AppError::BackendUnavailable("down".into()).is_transient());
        assert!(AppError::RateLimitError("slow down".into()).is_transient());
        assert!(AppError::SerializationError("bad json".into()).is_transient());
        assert!(!AppError::NotFound("gone".into()).is_transient());
        assert!(!AppError::InvalidOperation("retired".into()).is_transient());
    }

    #[test]
    fn test_failure_kind_mapping() {
        assert_eq!(
            AppError::NotFound("x".into()).failure_kind(),
            Some(FailureKind::NotFound)
        );
        assert_eq!(AppError::BackendUnavailable("x".into()).failure_kind(), None);
        assert_eq!(AppError::InvalidOperation("x".into()).failure_kind(), None);
    }

    #[test]
    fn test_serializes_as_tagged_message() {
        let json = serde_json::to_value(AppError::NotFound("job-1".into())).unwrap();
        assert_eq!(json["type"], "NotFound");
        assert_eq!(json["message"], "job-1");
    }
}
