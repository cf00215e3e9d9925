//! Job store: one private directory per job under a storage root.
//!
//! On-disk layout, relied upon by external cleanup tooling:
//!
//! ```text
//! <root>/<job_id>/input.<ext>      at most one, written once
//! <root>/<job_id>/<output name>    at most one, replaced on every run
//! ```

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};

use nvenc_models::{JobId, JobSnapshot, JobState};

use crate::error::{StorageError, StorageResult};
use crate::filename::{input_file_name, is_input_name, is_valid_file_name, output_file_name};
use crate::fs_utils::move_file;

/// Handle to an existing job directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDir {
    id: JobId,
    path: PathBuf,
}

impl JobDir {
    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

/// Filesystem-backed job store.
#[derive(Debug, Clone)]
pub struct JobStore {
    root: PathBuf,
}

impl JobStore {
    /// Create a store rooted at `root`. Nothing is touched until [`init`](Self::init).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Make sure the storage root exists.
    pub async fn init(&self) -> StorageResult<()> {
        fs::create_dir_all(&self.root).await?;
        info!(root = %self.root.display(), "Job store ready");
        Ok(())
    }

    /// Allocate a fresh id and an empty directory for it.
    pub async fn create(&self) -> StorageResult<JobDir> {
        let id = JobId::new();
        let path = self.root.join(id.as_str());
        fs::create_dir_all(&self.root).await?;
        // fails on an id collision rather than sharing a directory
        fs::create_dir(&path).await?;
        debug!(job_id = %id, path = %path.display(), "Created job directory");
        Ok(JobDir { id, path })
    }

    /// Look up an existing job directory.
    pub async fn resolve(&self, id: &JobId) -> StorageResult<JobDir> {
        let path = self.root.join(id.as_str());
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(JobDir {
                id: id.clone(),
                path,
            }),
            Ok(_) => Err(StorageError::not_found(id.as_str())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::not_found(id.as_str()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up a job by a raw, client-supplied id.
    ///
    /// Malformed ids are reported as `NotFound` without touching the filesystem.
    pub async fn resolve_str(&self, raw: &str) -> StorageResult<JobDir> {
        let id = JobId::parse(raw).map_err(|_| StorageError::not_found(raw))?;
        self.resolve(&id).await
    }

    /// Find the input artifact of a job.
    ///
    /// If the directory was tampered with and holds several candidates, the
    /// lexicographically smallest name wins.
    pub async fn locate_input(&self, dir: &JobDir) -> StorageResult<PathBuf> {
        let mut candidates = Vec::new();
        let mut entries = fs::read_dir(dir.path()).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if is_input_name(name) && entry.file_type().await?.is_file() {
                candidates.push(name.to_string());
            }
        }

        if candidates.len() > 1 {
            warn!(job_id = %dir.id(), count = candidates.len(), "Multiple input files in job directory");
        }

        candidates
            .into_iter()
            .min()
            .map(|name| dir.join(&name))
            .ok_or_else(|| StorageError::missing_input(dir.id().as_str()))
    }

    /// Write uploaded bytes as the job's input. Returns the stored file name.
    pub async fn save_input(
        &self,
        dir: &JobDir,
        bytes: &[u8],
        original_name: &str,
    ) -> StorageResult<String> {
        let name = input_file_name(original_name);
        self.remove_inputs(dir).await?;
        fs::write(dir.join(&name), bytes).await?;
        debug!(job_id = %dir.id(), input = %name, size = bytes.len(), "Saved input");
        Ok(name)
    }

    /// Move an already spooled upload into the job as its input.
    pub async fn adopt_input(
        &self,
        dir: &JobDir,
        spooled: &Path,
        original_name: &str,
    ) -> StorageResult<String> {
        let name = input_file_name(original_name);
        self.remove_inputs(dir).await?;
        move_file(spooled, dir.join(&name)).await?;
        debug!(job_id = %dir.id(), input = %name, "Adopted spooled input");
        Ok(name)
    }

    /// Path the external tool should write its output to.
    pub fn output_path(&self, dir: &JobDir, requested: Option<&str>) -> StorageResult<PathBuf> {
        let name = output_file_name(requested)?;
        Ok(dir.join(&name))
    }

    /// Delete every previous output artifact. Returns how many were removed.
    pub async fn clear_outputs(&self, dir: &JobDir) -> StorageResult<usize> {
        let mut removed = 0;
        for name in list_files(dir.path()).await? {
            if !is_input_name(&name) {
                fs::remove_file(dir.join(&name)).await?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(job_id = %dir.id(), removed, "Cleared previous outputs");
        }
        Ok(removed)
    }

    /// Resolve a file inside a job for download.
    pub async fn file_path(&self, id: &JobId, file_name: &str) -> StorageResult<PathBuf> {
        let dir = self.resolve(id).await?;
        if !is_valid_file_name(file_name) {
            return Err(StorageError::invalid_name(file_name));
        }
        let path = dir.join(file_name);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            _ => Err(StorageError::FileNotFound(file_name.to_string())),
        }
    }

    /// Describe a job from what is on disk.
    ///
    /// Only `Created`, `InputReceived` and `Completed` can be told apart from
    /// the directory alone.
    pub async fn snapshot(&self, dir: &JobDir) -> StorageResult<JobSnapshot> {
        let mut input = None;
        let mut outputs = Vec::new();
        for name in list_files(dir.path()).await? {
            if is_input_name(&name) {
                if input.as_ref().map_or(true, |current: &String| name < *current) {
                    input = Some(name);
                }
            } else {
                outputs.push(name);
            }
        }
        outputs.sort();

        let state = match (&input, outputs.is_empty()) {
            (None, _) => JobState::Created,
            (Some(_), true) => JobState::InputReceived,
            (Some(_), false) => JobState::Completed,
        };

        Ok(JobSnapshot {
            job_id: dir.id().clone(),
            state,
            input,
            outputs,
        })
    }

    async fn remove_inputs(&self, dir: &JobDir) -> StorageResult<()> {
        for name in list_files(dir.path()).await? {
            if is_input_name(&name) {
                fs::remove_file(dir.join(&name)).await?;
            }
        }
        Ok(())
    }
}

/// Names of regular, visible files directly inside `dir`.
async fn list_files(dir: &Path) -> StorageResult<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if !name.starts_with('.') {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}
