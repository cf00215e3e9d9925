//! Process runner for the external tool.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::Utc;
use nvenc_models::ExecutionRecord;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MediaError, MediaResult};
use crate::template::display_argv;

/// Runs a prepared argument vector directly, without a shell.
///
/// Output is fully captured. A non-zero exit is not an error here; callers
/// read it from the returned [`ExecutionRecord`].
#[derive(Debug, Clone, Default)]
pub struct ToolRunner {
    /// Kill the process after this long
    timeout: Option<Duration>,
}

impl ToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set timeout. `None` lets the tool run as long as it likes.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Spawn `argv[0]` with the remaining arguments and wait for it to exit.
    ///
    /// Fails only if the process could not be started or was killed for
    /// exceeding the timeout.
    pub async fn run(&self, argv: &[String]) -> MediaResult<ExecutionRecord> {
        let (program, args) = argv.split_first().ok_or(MediaError::EmptyCommand)?;
        debug!("Running tool: {}", display_argv(argv));

        let started_at = Utc::now();
        let start = Instant::now();

        // kill_on_drop: a timed-out wait drops the child, which kills it
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MediaError::spawn_failed(program.clone(), e))?;

        let output = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(
                        program = %program,
                        timeout_ms = timeout.as_millis() as u64,
                        "Tool timed out, killing process"
                    );
                    return Err(MediaError::Timeout(timeout));
                }
            },
            None => child.wait_with_output().await?,
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let record = ExecutionRecord {
            argv: argv.to_vec(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms,
            started_at,
            finished_at: Utc::now(),
        };

        debug!(
            exit_code = ?record.exit_code,
            duration_ms,
            "Tool exited"
        );
        Ok(record)
    }
}

/// Resolve `program` the way the runner would, for startup checks.
pub fn check_tool(program: &str) -> MediaResult<PathBuf> {
    which::which(program).map_err(|_| MediaError::ToolNotFound(program.to_string()))
}
