//! Job runner for the nvenc transcoding server.
//!
//! This crate provides:
//! - Run orchestration over the job store, template engine and execution gate
//! - Run-state tracking for job snapshots
//! - Structured job logging and run metrics

pub mod error;
pub mod logging;
pub mod metrics;
pub mod processor;

pub use error::{RunError, RunResult};
pub use logging::JobLogger;
pub use processor::{download_path, JobRunner, RunOutcome, UploadedJob};
