//! Shared data models for the nvenc transcoding server.
//!
//! This crate provides Serde-serializable types for:
//! - Job identity and lifecycle state
//! - Execution records of the external tool

pub mod execution;
pub mod job;

// Re-export common types
pub use execution::ExecutionRecord;
pub use job::{JobId, JobIdError, JobSnapshot, JobState, MAX_JOB_ID_LEN};
