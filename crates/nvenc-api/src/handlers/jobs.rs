//! Job handlers: upload, run and inspect.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use tracing::info;

use nvenc_models::JobSnapshot;
use nvenc_worker::RunOutcome;

use crate::error::{ApiError, ApiResult};
use crate::extract::{ProcessPayload, UploadPayload};
use crate::state::AppState;

/// Response to a successful run.
#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub job_id: String,
    pub input: String,
    pub output: String,
    pub download_path: String,
    pub duration_ms: u64,
    pub exit_code: Option<i32>,
}

impl From<RunOutcome> for RunResponse {
    fn from(outcome: RunOutcome) -> Self {
        Self {
            status: "success",
            message: "ok",
            duration_ms: outcome.duration_ms(),
            exit_code: outcome.exit_code(),
            job_id: outcome.job_id.to_string(),
            input: outcome.input,
            output: outcome.output,
            download_path: outcome.download_path,
        }
    }
}

/// Response to an upload without a run.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub job_id: String,
    pub input: String,
}

/// Create a job from an uploaded file and run the command on it.
///
/// POST /upload
pub async fn upload(
    State(state): State<AppState>,
    mut payload: UploadPayload,
) -> ApiResult<Json<RunResponse>> {
    let upload = payload.require_file()?;
    let fields = payload.fields;
    info!(
        file = %upload.original_name,
        size = upload.size,
        command = fields.command.as_deref().unwrap_or_default(),
        "Upload received"
    );

    let outcome = state
        .runner
        .run_upload(
            upload.file.path(),
            &upload.original_name,
            fields.command.as_deref(),
            fields.output_filename.as_deref(),
        )
        .await?;

    Ok(Json(outcome.into()))
}

/// Create a job from an uploaded file.
///
/// POST /upload_file
pub async fn upload_file(
    State(state): State<AppState>,
    mut payload: UploadPayload,
) -> ApiResult<Json<UploadResponse>> {
    let upload = payload.require_file()?;
    let job = state
        .runner
        .accept_upload(upload.file.path(), &upload.original_name)
        .await?;

    Ok(Json(UploadResponse {
        status: "success",
        message: "ok",
        job_id: job.job_id.to_string(),
        input: job.input,
    }))
}

/// Run a command on an existing job.
///
/// POST /process
pub async fn process(
    State(state): State<AppState>,
    ProcessPayload(fields): ProcessPayload,
) -> ApiResult<Json<RunResponse>> {
    let job_id = fields.job_id.ok_or(ApiError::MissingJobId)?;

    let outcome = state
        .runner
        .run(
            &job_id,
            fields.command.as_deref(),
            fields.output_filename.as_deref(),
        )
        .await?;

    Ok(Json(outcome.into()))
}

/// Describe a job.
///
/// GET /jobs/:job_id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    Ok(Json(state.runner.snapshot(&job_id).await?))
}
