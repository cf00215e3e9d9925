//! Local filesystem job store.
//!
//! This crate provides:
//! - Job directory allocation and lookup
//! - Input artifact discovery by the reserved `input` prefix
//! - Safe normalization of attacker-controlled file names
//! - Cross-device moves of spooled uploads

pub mod error;
pub mod filename;
pub mod fs_utils;
pub mod store;

pub use error::{StorageError, StorageResult};
pub use filename::{
    input_file_name, output_file_name, secure_filename, DEFAULT_OUTPUT_NAME, INPUT_PREFIX,
};
pub use store::{JobDir, JobStore};
