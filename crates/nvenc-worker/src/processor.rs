//! Job run orchestration.
//!
//! A run validates everything it can before touching the execution gate:
//! job lookup, input discovery, the command template and the output name.
//! Only then does it queue for a slot, spawn the tool and collect the result.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinError;
use tracing::{debug, Instrument};

use nvenc_media::{ExecutionGate, TemplateEngine, ToolRunner};
use nvenc_models::{ExecutionRecord, JobId, JobSnapshot, JobState};
use nvenc_storage::{output_file_name, JobDir, JobStore};

use crate::error::{RunError, RunResult};
use crate::logging::JobLogger;
use crate::metrics;

/// Successful run, ready to be reported to the caller.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub job_id: JobId,
    /// Stored input file name
    pub input: String,
    /// Output file name inside the job directory
    pub output: String,
    /// Relative URL the output can be fetched from
    pub download_path: String,
    pub record: ExecutionRecord,
}

impl RunOutcome {
    pub fn duration_ms(&self) -> u64 {
        self.record.duration_ms
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.record.exit_code
    }
}

/// A job that has just received its input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedJob {
    pub job_id: JobId,
    pub input: String,
}

/// Relative download locator for a file inside a job.
pub fn download_path(job_id: &JobId, file_name: &str) -> String {
    format!("/download/{}/{}", job_id, file_name)
}

/// Runs jobs against the external tool.
///
/// Cloning is cheap; clones share the gate and run-state table.
#[derive(Debug, Clone)]
pub struct JobRunner {
    store: JobStore,
    engine: TemplateEngine,
    gate: ExecutionGate,
    tool: ToolRunner,
    /// Last run state per job, for jobs that were run since startup
    states: Arc<RwLock<HashMap<JobId, JobState>>>,
}

/// Everything a run needs once validation passed.
struct PreparedRun {
    dir: JobDir,
    input: String,
    output: String,
    argv: Vec<String>,
}

impl JobRunner {
    pub fn new(store: JobStore, engine: TemplateEngine, gate: ExecutionGate, tool: ToolRunner) -> Self {
        Self {
            store,
            engine,
            gate,
            tool,
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn engine(&self) -> &TemplateEngine {
        &self.engine
    }

    pub fn gate(&self) -> &ExecutionGate {
        &self.gate
    }

    /// Validate a run request without touching the filesystem.
    pub fn check_request(&self, template: Option<&str>, output_name: Option<&str>) -> RunResult<()> {
        let template = require_template(template)?;
        self.engine.check(template)?;
        output_file_name(output_name)?;
        Ok(())
    }

    /// Create a job and move a spooled upload into it as the input.
    pub async fn accept_upload(&self, spooled: &Path, original_name: &str) -> RunResult<UploadedJob> {
        let dir = self.store.create().await?;
        let input = self.store.adopt_input(&dir, spooled, original_name).await?;
        JobLogger::new(dir.id(), "upload").input_stored(&input);
        Ok(UploadedJob {
            job_id: dir.id().clone(),
            input,
        })
    }

    /// Create a job from an upload and run it, in one step.
    ///
    /// The template and output name are checked first, so a rejected request
    /// leaves no job directory behind.
    pub async fn run_upload(
        &self,
        spooled: &Path,
        original_name: &str,
        template: Option<&str>,
        output_name: Option<&str>,
    ) -> RunResult<RunOutcome> {
        if let Err(e) = self.check_request(template, output_name) {
            metrics::record_run(e.kind());
            return Err(e);
        }
        let job = self.accept_upload(spooled, original_name).await?;
        self.run(job.job_id.as_str(), template, output_name).await
    }

    /// Run `template` against an existing job.
    ///
    /// The tool runs in a detached task: dropping the returned future does not
    /// stop the process or release its slot early.
    pub async fn run(
        &self,
        job_id: &str,
        template: Option<&str>,
        output_name: Option<&str>,
    ) -> RunResult<RunOutcome> {
        let result = self.run_inner(job_id, template, output_name).await;
        metrics::record_run(match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        });
        result
    }

    async fn run_inner(
        &self,
        job_id: &str,
        template: Option<&str>,
        output_name: Option<&str>,
    ) -> RunResult<RunOutcome> {
        let logger = JobLogger::unchecked(job_id, "run");
        let result = self.run_logged(&logger, job_id, template, output_name).await;
        match &result {
            Ok(outcome) => logger.completed(&outcome.output, &outcome.record),
            Err(e) => logger.failed(e),
        }
        result
    }

    async fn run_logged(
        &self,
        logger: &JobLogger,
        job_id: &str,
        template: Option<&str>,
        output_name: Option<&str>,
    ) -> RunResult<RunOutcome> {
        let PreparedRun {
            dir,
            input,
            output,
            argv,
        } = self.prepare(job_id, template, output_name).await?;
        logger.accepted(&argv);

        let runner = self.clone();
        let task_dir = dir.clone();
        let handle =
            tokio::spawn(async move { runner.execute(&task_dir, argv).await }.instrument(logger.span()));
        let record = self.settle(dir.id(), handle.await).await?;

        if !record.success() {
            return Err(RunError::ToolFailed(Box::new(record)));
        }

        Ok(RunOutcome {
            download_path: download_path(dir.id(), &output),
            job_id: dir.id().clone(),
            input,
            output,
            record,
        })
    }

    /// Collect the run task's result. A task that died without reporting
    /// leaves the job `Failed` rather than stuck in `Processing`.
    async fn settle(
        &self,
        id: &JobId,
        joined: Result<RunResult<ExecutionRecord>, JoinError>,
    ) -> RunResult<ExecutionRecord> {
        match joined {
            Ok(result) => result,
            Err(e) => {
                self.set_state(id, JobState::Failed).await;
                Err(RunError::internal(format!("run task failed: {e}")))
            }
        }
    }

    /// Steps that must pass before the gate is touched, in reporting order.
    async fn prepare(
        &self,
        job_id: &str,
        template: Option<&str>,
        output_name: Option<&str>,
    ) -> RunResult<PreparedRun> {
        let dir = self.store.resolve_str(job_id).await?;
        let input = self.store.locate_input(&dir).await?;

        let template = require_template(template)?;
        self.engine.check(template)?;

        let output_path = self.store.output_path(&dir, output_name)?;
        let argv = self
            .engine
            .build(template, &input, &output_path)
            .ok_or(RunError::BuildFailed)?;

        Ok(PreparedRun {
            input: file_name(&input),
            output: file_name(&output_path),
            dir,
            argv,
        })
    }

    /// Hold a slot for exactly the lifetime of the tool process.
    async fn execute(&self, dir: &JobDir, argv: Vec<String>) -> RunResult<ExecutionRecord> {
        let permit = self.gate.acquire().await?;
        metrics::record_gate_wait(permit.waited().as_secs_f64());
        self.report_gate();
        debug!(waited_ms = permit.waited().as_millis() as u64, "Execution slot granted");

        self.set_state(dir.id(), JobState::Processing).await;
        let result = self.invoke(dir, &argv).await;
        drop(permit);
        self.report_gate();

        let state = match &result {
            Ok(record) if record.success() => JobState::Completed,
            _ => JobState::Failed,
        };
        self.set_state(dir.id(), state).await;

        if let Ok(record) = &result {
            metrics::record_tool_duration(record.success(), record.duration().as_secs_f64());
        }
        result
    }

    async fn invoke(&self, dir: &JobDir, argv: &[String]) -> RunResult<ExecutionRecord> {
        self.store.clear_outputs(dir).await?;
        Ok(self.tool.run(argv).await?)
    }

    /// Describe a job, including the outcome of runs since startup.
    pub async fn snapshot(&self, job_id: &str) -> RunResult<JobSnapshot> {
        let dir = self.store.resolve_str(job_id).await?;
        let mut snapshot = self.store.snapshot(&dir).await?;
        if let Some(state) = self.states.read().await.get(dir.id()) {
            snapshot.state = *state;
        }
        Ok(snapshot)
    }

    async fn set_state(&self, id: &JobId, state: JobState) {
        self.states.write().await.insert(id.clone(), state);
    }

    fn report_gate(&self) {
        metrics::set_gate_occupancy(self.gate.in_flight(), self.gate.waiting());
    }
}

fn require_template(template: Option<&str>) -> RunResult<&str> {
    template
        .filter(|t| !t.is_empty())
        .ok_or(RunError::MissingCommand)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nvenc_media::TemplateError;
    use tempfile::TempDir;

    fn runner(tmp: &TempDir) -> JobRunner {
        JobRunner::new(
            JobStore::new(tmp.path().join("jobs")),
            TemplateEngine::new("sh"),
            ExecutionGate::serial(),
            ToolRunner::new(),
        )
    }

    #[test]
    fn test_download_path() {
        let id = JobId::parse("abc123").unwrap();
        assert_eq!(download_path(&id, "output.mp4"), "/download/abc123/output.mp4");
    }

    #[test]
    fn test_check_request() {
        let tmp = TempDir::new().unwrap();
        let runner = runner(&tmp);

        assert!(runner
            .check_request(Some("sh -c true {input} {output}"), None)
            .is_ok());
        assert!(matches!(
            runner.check_request(None, None),
            Err(RunError::MissingCommand)
        ));
        assert!(matches!(
            runner.check_request(Some(""), None),
            Err(RunError::MissingCommand)
        ));
        assert!(matches!(
            runner.check_request(Some("bash {input} {output}"), None),
            Err(RunError::InvalidCommand(TemplateError::WrongTool { .. }))
        ));
        assert!(matches!(
            runner.check_request(Some("sh -c true {input} {output}"), Some("../x.mp4")),
            Err(RunError::InvalidOutputName(_))
        ));
        assert!(!tmp.path().join("jobs").exists());
    }

    #[tokio::test]
    async fn test_checks_run_in_order() {
        let tmp = TempDir::new().unwrap();
        let runner = runner(&tmp);

        let err = runner.run("nope", None, None).await.unwrap_err();
        assert!(matches!(err, RunError::NotFound(_)));

        let dir = runner.store().create().await.unwrap();
        let err = runner.run(dir.id().as_str(), None, None).await.unwrap_err();
        assert!(matches!(err, RunError::MissingInput(_)));

        runner
            .store()
            .save_input(&dir, b"data", "a.mp4")
            .await
            .unwrap();
        let err = runner.run(dir.id().as_str(), None, None).await.unwrap_err();
        assert!(matches!(err, RunError::MissingCommand));

        let err = runner
            .run(dir.id().as_str(), Some("ffmpeg {input} {output}"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::InvalidCommand(_)));
    }

    #[tokio::test]
    async fn test_snapshot_tracks_run_state() {
        let tmp = TempDir::new().unwrap();
        let runner = runner(&tmp);
        let dir = runner.store().create().await.unwrap();
        let id = dir.id().as_str().to_string();

        assert_eq!(runner.snapshot(&id).await.unwrap().state, JobState::Created);

        runner.store().save_input(&dir, b"data", "a.mp4").await.unwrap();
        assert_eq!(
            runner.snapshot(&id).await.unwrap().state,
            JobState::InputReceived
        );

        let err = runner
            .run(&id, Some("sh -c 'exit 1' {input} {output}"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::ToolFailed(_)));
        assert_eq!(runner.snapshot(&id).await.unwrap().state, JobState::Failed);

        runner
            .run(&id, Some("sh -c 'cp \"$0\" \"$1\"' {input} {output}"), None)
            .await
            .unwrap();
        let snapshot = runner.snapshot(&id).await.unwrap();
        assert_eq!(snapshot.state, JobState::Completed);
        assert_eq!(snapshot.outputs, vec!["output.mp4".to_string()]);
    }

    #[tokio::test]
    async fn test_dead_run_task_marks_job_failed() {
        let tmp = TempDir::new().unwrap();
        let runner = runner(&tmp);
        let dir = runner.store().create().await.unwrap();
        runner.store().save_input(&dir, b"data", "a.mp4").await.unwrap();
        runner.set_state(dir.id(), JobState::Processing).await;

        let handle = tokio::spawn(std::future::pending::<RunResult<ExecutionRecord>>());
        handle.abort();
        let err = runner.settle(dir.id(), handle.await).await.unwrap_err();

        assert_eq!(err.kind(), "internal");
        let snapshot = runner.snapshot(dir.id().as_str()).await.unwrap();
        assert_eq!(snapshot.state, JobState::Failed);
    }

    #[tokio::test]
    async fn test_panicking_run_task_marks_job_failed() {
        let tmp = TempDir::new().unwrap();
        let runner = runner(&tmp);
        let dir = runner.store().create().await.unwrap();
        runner.set_state(dir.id(), JobState::Processing).await;

        let handle = tokio::spawn(faulty_run());
        let err = runner.settle(dir.id(), handle.await).await.unwrap_err();

        assert!(err.to_string().contains("run task failed"));
        assert_eq!(
            runner.snapshot(dir.id().as_str()).await.unwrap().state,
            JobState::Failed
        );
    }

    async fn faulty_run() -> RunResult<ExecutionRecord> {
        panic!("tool runner fault")
    }
}
