//! Axum HTTP API for the nvenc transcoding server.
//!
//! This crate provides:
//! - Upload, run, download and job status endpoints
//! - Environment and command-line configuration
//! - Rate limiting and security headers
//! - Prometheus metrics

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::{ApiConfig, Cli};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
