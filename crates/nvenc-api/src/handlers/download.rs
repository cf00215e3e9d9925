//! Output download.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::Response;
use tokio_util::io::ReaderStream;

use nvenc_models::JobId;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn content_type(file_name: &str) -> &'static str {
    let lower = file_name.to_ascii_lowercase();
    match lower.rsplit_once('.').map(|(_, ext)| ext) {
        Some("mp4" | "m4v") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("mkv") => "video/x-matroska",
        Some("webm") => "video/webm",
        Some("ts") => "video/mp2t",
        Some("mp3") => "audio/mpeg",
        Some("m4a" | "aac") => "audio/aac",
        Some("wav") => "audio/wav",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}

/// Stream a file from a job directory as an attachment.
///
/// GET /download/:job_id/:filename
pub async fn download(
    State(state): State<AppState>,
    Path((job_id, file_name)): Path<(String, String)>,
) -> ApiResult<Response> {
    let id = JobId::parse(&job_id).map_err(|_| ApiError::not_found("not found"))?;
    let path = state.runner.store().file_path(&id, &file_name).await?;

    let file = tokio::fs::File::open(&path).await?;
    let len = file.metadata().await?.len();
    let body = Body::from_stream(ReaderStream::new(file));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type(&file_name))
        .header(header::CONTENT_LENGTH, len)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", file_name),
        )
        .body(body)
        .map_err(|e| ApiError::internal(format!("Failed to build response: {}", e)))
}
