//! Request payload extraction.
//!
//! Run parameters may arrive as JSON, as an urlencoded form, as multipart
//! fields or in the query string, and the command may also be sent in the
//! `X-Command` header. Uploaded files are spooled to a temporary file and
//! never buffered whole in memory.

use axum::async_trait;
use axum::extract::{FromRequest, Multipart, Query, Request};
use axum::extract::multipart::Field;
use axum::http::{header, HeaderMap};
use axum::{Form, Json};
use serde::Deserialize;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::middleware::COMMAND_HEADER;

/// Multipart field holding the uploaded file.
const FILE_FIELD: &str = "file";

/// Run parameters, wherever they came from.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RunFields {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub output_filename: Option<String>,
}

impl RunFields {
    /// Fill gaps from `other`, keeping values already present.
    fn or(self, other: RunFields) -> Self {
        Self {
            job_id: non_empty(self.job_id).or(non_empty(other.job_id)),
            command: non_empty(self.command).or(non_empty(other.command)),
            output_filename: non_empty(self.output_filename).or(non_empty(other.output_filename)),
        }
    }

    fn with_command_header(mut self, headers: &HeaderMap) -> Self {
        if non_empty(self.command.clone()).is_none() {
            self.command = headers
                .get(COMMAND_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
        }
        self
    }

    fn set(&mut self, name: &str, value: String) {
        match name {
            "job_id" => self.job_id = Some(value),
            "command" => self.command = Some(value),
            "output_filename" => self.output_filename = Some(value),
            _ => {}
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// A file received in a multipart body, spooled to disk.
#[derive(Debug)]
pub struct SpooledUpload {
    /// Name the client gave the file
    pub original_name: String,
    pub file: NamedTempFile,
    pub size: u64,
}

/// Body of `/process`.
#[derive(Debug)]
pub struct ProcessPayload(pub RunFields);

/// Body of `/upload` and `/upload_file`.
#[derive(Debug)]
pub struct UploadPayload {
    pub file: Option<SpooledUpload>,
    pub fields: RunFields,
}

impl UploadPayload {
    /// The uploaded file, rejecting requests without one.
    pub fn require_file(&mut self) -> ApiResult<SpooledUpload> {
        let upload = self
            .file
            .take()
            .ok_or_else(|| ApiError::missing_file("missing file"))?;
        if upload.original_name.is_empty() {
            return Err(ApiError::missing_file("empty filename"));
        }
        Ok(upload)
    }
}

fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn query_fields(req: &Request) -> RunFields {
    Query::<RunFields>::try_from_uri(req.uri())
        .map(|Query(fields)| fields)
        .unwrap_or_default()
}

#[async_trait]
impl<S> FromRequest<S> for ProcessPayload
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let headers = req.headers().clone();
        let query = query_fields(&req);
        let content_type = content_type(&headers);

        let body = if content_type.starts_with("application/json") {
            let Json(fields) = Json::<RunFields>::from_request(req, state)
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            fields
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(fields) = Form::<RunFields>::from_request(req, state)
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            fields
        } else if content_type.starts_with("multipart/form-data") {
            let mut multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| ApiError::bad_request(e.body_text()))?;
            let mut fields = RunFields::default();
            while let Some(field) = next_field(&mut multipart).await? {
                let Some(name) = field.name().map(str::to_string) else {
                    continue;
                };
                if name != FILE_FIELD {
                    fields.set(&name, read_text(field).await?);
                }
            }
            fields
        } else {
            RunFields::default()
        };

        Ok(ProcessPayload(body.or(query).with_command_header(&headers)))
    }
}

#[async_trait]
impl<S> FromRequest<S> for UploadPayload
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let headers = req.headers().clone();
        let query = query_fields(&req);
        if !content_type(&headers).starts_with("multipart/form-data") {
            return Err(ApiError::missing_file("missing file"));
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;

        let mut file = None;
        let mut fields = RunFields::default();
        while let Some(field) = next_field(&mut multipart).await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if name == FILE_FIELD {
                if file.is_none() {
                    file = Some(spool(field).await?);
                }
            } else {
                fields.set(&name, read_text(field).await?);
            }
        }

        Ok(UploadPayload {
            file,
            fields: fields.or(query).with_command_header(&headers),
        })
    }
}

async fn next_field<'a>(multipart: &'a mut Multipart) -> ApiResult<Option<Field<'a>>> {
    multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))
}

async fn read_text(field: Field<'_>) -> ApiResult<String> {
    field
        .text()
        .await
        .map_err(|e| ApiError::bad_request(format!("unreadable form field: {e}")))
}

/// Stream a file field into a temporary file.
async fn spool(mut field: Field<'_>) -> ApiResult<SpooledUpload> {
    let original_name = field.file_name().unwrap_or_default().to_string();
    let file = NamedTempFile::new().map_err(|e| ApiError::internal(e.to_string()))?;
    let handle = file.reopen().map_err(|e| ApiError::internal(e.to_string()))?;
    let mut out = tokio::fs::File::from_std(handle);

    let mut size = 0u64;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::bad_request(format!("upload interrupted: {e}")))?
    {
        size += chunk.len() as u64;
        out.write_all(&chunk)
            .await
            .map_err(|e| ApiError::internal(e.to_string()))?;
    }
    out.flush().await.map_err(|e| ApiError::internal(e.to_string()))?;

    metrics::record_upload_bytes(size);
    debug!(original_name = %original_name, size, "Spooled upload");
    Ok(SpooledUpload {
        original_name,
        file,
        size,
    })
}
