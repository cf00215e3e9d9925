//! Structured run logging.
//!
//! Every event carries `job_id` and `stage`; run events add `argv`,
//! `exit_code` and `duration_ms` as fields rather than in the message.

use nvenc_media::display_argv;
use nvenc_models::{ExecutionRecord, JobId};
use tracing::{error, info, warn, Span};

use crate::error::RunError;

/// Logs the events of one request against one job.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    stage: &'static str,
}

impl JobLogger {
    pub fn new(job_id: &JobId, stage: &'static str) -> Self {
        Self::unchecked(job_id.as_str(), stage)
    }

    /// For a raw client-supplied id that may not name a job.
    pub fn unchecked(job_id: &str, stage: &'static str) -> Self {
        Self {
            job_id: job_id.to_string(),
            stage,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn input_stored(&self, input: &str) {
        info!(job_id = %self.job_id, stage = self.stage, input, "Input stored");
    }

    /// The run passed validation and is about to queue for the gate.
    pub fn accepted(&self, argv: &[String]) {
        info!(
            job_id = %self.job_id,
            stage = self.stage,
            argv = %display_argv(argv),
            "Run accepted"
        );
    }

    pub fn completed(&self, output: &str, record: &ExecutionRecord) {
        info!(
            job_id = %self.job_id,
            stage = self.stage,
            output,
            exit_code = ?record.exit_code,
            duration_ms = record.duration_ms,
            "Run completed"
        );
    }

    /// Client mistakes are warnings; everything else is an error.
    pub fn failed(&self, err: &RunError) {
        let kind = err.kind();
        match err.record() {
            Some(record) => error!(
                job_id = %self.job_id,
                stage = self.stage,
                kind,
                exit_code = ?record.exit_code,
                duration_ms = record.duration_ms,
                "Tool failed: {}",
                stderr_tail(&record.stderr)
            ),
            None if err.is_client_error() => warn!(
                job_id = %self.job_id,
                stage = self.stage,
                kind,
                "Run rejected: {}",
                err
            ),
            None => error!(
                job_id = %self.job_id,
                stage = self.stage,
                kind,
                "Run failed: {}",
                err
            ),
        }
    }

    /// Span for the detached run task.
    pub fn span(&self) -> Span {
        tracing::info_span!("run", job_id = %self.job_id, stage = self.stage)
    }
}

/// Last non-empty line of the tool's stderr, where ffmpeg puts its reason.
fn stderr_tail(stderr: &str) -> &str {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_keeps_raw_ids() {
        let id = JobId::new();
        assert_eq!(JobLogger::new(&id, "run").job_id(), id.as_str());

        let logger = JobLogger::unchecked("../not-an-id", "run");
        assert_eq!(logger.job_id(), "../not-an-id");
        assert_eq!(logger.stage(), "run");
    }

    #[test]
    fn test_stderr_tail() {
        assert_eq!(
            stderr_tail("ffmpeg version 6\n  built with gcc\nUnknown encoder 'x'\n\n"),
            "Unknown encoder 'x'"
        );
        assert_eq!(stderr_tail(""), "");
    }
}
