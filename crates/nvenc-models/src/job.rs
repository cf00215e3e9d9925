//! Job identity and lifecycle definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Longest job id accepted from a client.
pub const MAX_JOB_ID_LEN: usize = 64;

/// Error returned when a client-supplied job id is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobIdError {
    #[error("job id is empty")]
    Empty,

    #[error("job id exceeds {MAX_JOB_ID_LEN} characters")]
    TooLong,

    #[error("job id contains invalid character {0:?}")]
    InvalidChar(char),
}

/// Unique identifier for a job.
///
/// Generated ids are the 32-character lowercase hex form of a random UUID.
/// Ids parsed from requests are restricted to `[A-Za-z0-9_-]` so that they can
/// never name anything outside the storage root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Validate a client-supplied id.
    pub fn parse(s: &str) -> Result<Self, JobIdError> {
        if s.is_empty() {
            return Err(JobIdError::Empty);
        }
        if s.len() > MAX_JOB_ID_LEN {
            return Err(JobIdError::TooLong);
        }
        if let Some(c) = s
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(JobIdError::InvalidChar(c));
        }
        Ok(Self(s.to_string()))
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = JobIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Directory exists, no input yet
    #[default]
    Created,
    /// Input artifact present
    InputReceived,
    /// Holds an execution slot and the external tool is running. A run still
    /// queued for the gate leaves the previous state in place.
    Processing,
    /// Last run exited with code 0
    Completed,
    /// Last run exited non-zero or could not start
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Created => "created",
            JobState::InputReceived => "input_received",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    /// Whether a run has finished, either way.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a job directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_hex() {
        let id = JobId::new();
        assert_eq!(id.as_str().len(), 32);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, JobId::new());
    }

    #[test]
    fn test_generated_ids_round_trip_through_parse() {
        let id = JobId::new();
        assert_eq!(JobId::parse(id.as_str()).unwrap(), id);
    }

    #[test]
    fn test_parse_rejects_traversal() {
        assert_eq!(JobId::parse(""), Err(JobIdError::Empty));
        assert_eq!(JobId::parse("../etc"), Err(JobIdError::InvalidChar('.')));
        assert_eq!(JobId::parse("a/b"), Err(JobIdError::InvalidChar('/')));
        assert_eq!(
            JobId::parse(&"a".repeat(MAX_JOB_ID_LEN + 1)),
            Err(JobIdError::TooLong)
        );
        assert!(JobId::parse("job_01-ab").is_ok());
    }

    #[test]
    fn test_state_serialization() {
        assert_eq!(
            serde_json::to_string(&JobState::InputReceived).unwrap(),
            "\"input_received\""
        );
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Processing.is_terminal());
    }
}
