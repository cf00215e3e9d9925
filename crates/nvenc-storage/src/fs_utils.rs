//! Filesystem helpers for placing spooled uploads into job directories.
//!
//! Uploads are spooled to the system temp directory, which is frequently a
//! different filesystem than the storage root, so a plain rename can fail
//! with EXDEV.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::StorageResult;

/// Move a file from `src` to `dst`, falling back to copy+delete across devices.
///
/// The fallback copies into a hidden sibling of `dst` first and renames it into
/// place, so `dst` never appears half-written.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> StorageResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                "Cross-device rename detected, falling back to copy+delete: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_and_delete(src, dst).await
        }
        Err(e) => Err(e.into()),
    }
}

/// Check if an IO error is EXDEV (cross-device link).
fn is_cross_device_error(e: &std::io::Error) -> bool {
    // EXDEV is error code 18 on Linux/macOS
    e.raw_os_error() == Some(18)
}

/// Hidden staging path next to `dst`; never carries the input prefix.
fn staging_path(dst: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(dst.file_name().unwrap_or_default());
    name.push(".part");
    dst.with_file_name(name)
}

async fn copy_and_delete(src: &Path, dst: &Path) -> StorageResult<()> {
    let staging = staging_path(dst);

    if let Err(e) = fs::copy(src, &staging).await {
        tracing::error!(
            "Failed to copy file during cross-device move: {} -> {}: {}",
            src.display(),
            staging.display(),
            e
        );
        let _ = fs::remove_file(&staging).await;
        return Err(e.into());
    }

    if let Err(e) = fs::rename(&staging, dst).await {
        let _ = fs::remove_file(&staging).await;
        tracing::error!(
            "Failed to rename staged file: {} -> {}: {}",
            staging.display(),
            dst.display(),
            e
        );
        return Err(e.into());
    }

    // Best effort; the upload already landed.
    if let Err(e) = fs::remove_file(src).await {
        tracing::warn!(
            "Failed to remove source file after cross-device move: {}: {}",
            src.display(),
            e
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_move_file_same_filesystem() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("upload.bin");
        let dst = dir.path().join("input.mov");

        fs::write(&src, b"frames").await.unwrap();
        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"frames");
    }

    #[tokio::test]
    async fn test_copy_and_delete_leaves_no_staging_file() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("upload.bin");
        let dst = dir.path().join("input.mp4");

        fs::write(&src, b"frames").await.unwrap();
        copy_and_delete(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert!(!staging_path(&dst).exists());
        assert_eq!(fs::read(&dst).await.unwrap(), b"frames");
    }

    #[test]
    fn test_staging_path_is_hidden() {
        let staged = staging_path(Path::new("/jobs/abc/input.mov"));
        assert_eq!(staged, Path::new("/jobs/abc/.input.mov.part"));
    }

    #[test]
    fn test_is_cross_device_error() {
        assert!(is_cross_device_error(&std::io::Error::from_raw_os_error(18)));
        assert!(!is_cross_device_error(&std::io::Error::from_raw_os_error(2)));
    }
}
