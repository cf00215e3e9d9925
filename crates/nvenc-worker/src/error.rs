//! Run error types.

use std::time::Duration;

use nvenc_media::{MediaError, TemplateError};
use nvenc_models::ExecutionRecord;
use nvenc_storage::StorageError;
use thiserror::Error;

pub type RunResult<T> = Result<T, RunError>;

/// Terminal failure of a single run. Nothing is retried.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {0} has no input file")]
    MissingInput(String),

    #[error("No command given")]
    MissingCommand,

    #[error("Invalid command: {0}")]
    InvalidCommand(#[from] TemplateError),

    #[error("Invalid output name: {0}")]
    InvalidOutputName(String),

    /// Validation accepted a template that could not be built.
    #[error("Failed to build command from a validated template")]
    BuildFailed,

    #[error("Failed to execute tool: {0}")]
    ExecutionFailed(String),

    #[error("Tool exited with code {}", exit_code_label(.0))]
    ToolFailed(Box<ExecutionRecord>),

    #[error("Timed out after {}ms waiting for an execution slot", .0.as_millis())]
    QueueTimeout(Duration),

    #[error("Tool killed after running for {}ms", .0.as_millis())]
    ToolTimedOut(Duration),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn exit_code_label(record: &ExecutionRecord) -> String {
    record
        .exit_code
        .map_or_else(|| "none (killed by signal)".to_string(), |c| c.to_string())
}

impl RunError {
    pub fn execution_failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable identifier reported to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            RunError::NotFound(_) => "not_found",
            RunError::MissingInput(_) => "missing_input",
            RunError::MissingCommand => "missing_command",
            RunError::InvalidCommand(_) => "invalid_command",
            RunError::InvalidOutputName(_) => "invalid_output_name",
            RunError::BuildFailed => "build_failed",
            RunError::ExecutionFailed(_) => "execution_failed",
            RunError::ToolFailed(_) => "tool_failed",
            RunError::QueueTimeout(_) => "queue_timeout",
            RunError::ToolTimedOut(_) => "tool_timed_out",
            RunError::Storage(_) => "storage",
            RunError::Internal(_) => "internal",
        }
    }

    /// Whether the caller sent something unusable, as opposed to a server fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RunError::NotFound(_)
                | RunError::MissingInput(_)
                | RunError::MissingCommand
                | RunError::InvalidCommand(_)
                | RunError::InvalidOutputName(_)
        )
    }

    /// Captured diagnostics, when the tool ran and failed.
    pub fn record(&self) -> Option<&ExecutionRecord> {
        match self {
            RunError::ToolFailed(record) => Some(record.as_ref()),
            _ => None,
        }
    }
}

impl From<StorageError> for RunError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(id) => RunError::NotFound(id),
            StorageError::FileNotFound(name) => RunError::NotFound(name),
            StorageError::MissingInput(id) => RunError::MissingInput(id),
            StorageError::InvalidName(msg) => RunError::InvalidOutputName(msg),
            StorageError::Io(e) => RunError::Storage(e.to_string()),
        }
    }
}

impl From<MediaError> for RunError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::QueueTimeout(waited) => RunError::QueueTimeout(waited),
            MediaError::Timeout(limit) => RunError::ToolTimedOut(limit),
            MediaError::EmptyCommand => RunError::BuildFailed,
            MediaError::GateClosed => RunError::internal(err.to_string()),
            MediaError::ToolNotFound(_) | MediaError::SpawnFailed { .. } | MediaError::Io(_) => {
                RunError::execution_failed(err.to_string())
            }
        }
    }
}
