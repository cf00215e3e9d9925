#![deny(unreachable_patterns)]
//! External tool integration.
//!
//! This crate provides:
//! - Validation of untrusted command templates
//! - Shell-free argument vector construction
//! - A process-wide execution gate
//! - A process runner with output capture and optional timeout

pub mod command;
pub mod error;
pub mod gate;
pub mod template;

pub use command::{check_tool, ToolRunner};
pub use error::{MediaError, MediaResult};
pub use gate::{ExecutionGate, GateCapacity, GatePermit};
pub use template::{display_argv, TemplateEngine, TemplateError, INPUT_PLACEHOLDER, OUTPUT_PLACEHOLDER};
