//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use nvenc_storage::StorageError;
use nvenc_worker::RunError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    MissingFile(String),

    #[error("missing job_id")]
    MissingJobId,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn missing_file(msg: impl Into<String>) -> Self {
        Self::MissingFile(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable identifier reported in the `kind` field.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::MissingFile(_) => "missing_file",
            ApiError::MissingJobId => "missing_job_id",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::NotFound(_) => "not_found",
            ApiError::Run(e) => e.kind(),
            ApiError::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingFile(_) | ApiError::MissingJobId | ApiError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Run(e) => match e {
                RunError::NotFound(_) => StatusCode::NOT_FOUND,
                RunError::MissingInput(_)
                | RunError::MissingCommand
                | RunError::InvalidCommand(_)
                | RunError::InvalidOutputName(_) => StatusCode::BAD_REQUEST,
                RunError::QueueTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
                RunError::ToolTimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
                RunError::BuildFailed
                | RunError::ExecutionFailed(_)
                | RunError::ToolFailed(_)
                | RunError::Storage(_)
                | RunError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Whether the message may leak server internals.
    fn is_internal(&self) -> bool {
        matches!(
            self,
            ApiError::Internal(_) | ApiError::Run(RunError::Storage(_) | RunError::Internal(_))
        )
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(_)
            | StorageError::FileNotFound(_)
            | StorageError::InvalidName(_)
            | StorageError::MissingInput(_) => ApiError::not_found("not found"),
            StorageError::Io(e) => ApiError::internal(e.to_string()),
        }
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::internal(err.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    status: &'static str,
    kind: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stderr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
}

/// Marks a response whose message may leak server internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalDetail {
    pub kind: &'static str,
}

impl InternalDetail {
    /// Same status and kind, generic message.
    pub fn redacted(self, status: StatusCode) -> Response {
        let body = ErrorResponse {
            status: "error",
            kind: self.kind,
            message: "An internal error occurred".to_string(),
            stdout: None,
            stderr: None,
            code: None,
            duration_ms: None,
        };
        (status, Json(body)).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let kind = self.kind();
        let record = match &self {
            ApiError::Run(e) => e.record(),
            _ => None,
        };

        let body = ErrorResponse {
            status: "error",
            kind,
            message: self.to_string(),
            stdout: record.map(|r| r.stdout.clone()),
            stderr: record.map(|r| r.stderr.clone()),
            code: record.and_then(|r| r.exit_code),
            duration_ms: record.map(|r| r.duration_ms),
        };

        let mut response = (status, Json(body)).into_response();
        if self.is_internal() {
            response.extensions_mut().insert(InternalDetail { kind });
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nvenc_media::TemplateError;
    use std::time::Duration;

    #[test]
    fn test_status_codes() {
        assert_eq!(ApiError::MissingJobId.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(RunError::NotFound("x".into())).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(RunError::InvalidCommand(TemplateError::MissingOutput)).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(RunError::QueueTimeout(Duration::from_secs(1))).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(RunError::BuildFailed).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_kind_passes_through_run_errors() {
        assert_eq!(ApiError::from(RunError::MissingCommand).kind(), "missing_command");
        assert_eq!(ApiError::missing_file("missing file").kind(), "missing_file");
    }

    #[test]
    fn test_internal_errors_are_marked() {
        let response = ApiError::internal("disk at /srv/jobs is full").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.extensions().get::<InternalDetail>(),
            Some(&InternalDetail { kind: "internal" })
        );

        let response = ApiError::from(RunError::MissingCommand).into_response();
        assert!(response.extensions().get::<InternalDetail>().is_none());
    }

    #[test]
    fn test_storage_errors_hide_as_not_found() {
        let err = ApiError::from(StorageError::invalid_name("../etc/passwd"));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert!(!err.to_string().contains("passwd"));
    }
}
