//! Application state.

use nvenc_media::{ExecutionGate, TemplateEngine, ToolRunner};
use nvenc_storage::JobStore;
use nvenc_worker::JobRunner;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub runner: JobRunner,
}

impl AppState {
    /// Wire the job store, template engine, gate and tool runner from config.
    ///
    /// The gate is created here once and shared by every request.
    pub fn new(config: ApiConfig) -> Self {
        let store = JobStore::new(config.storage_root.clone());
        let engine =
            TemplateEngine::new(config.tool_name.clone()).with_program(config.tool_program.clone());
        let gate = ExecutionGate::new(config.exec_capacity).with_queue_timeout(config.queue_timeout);
        let tool = ToolRunner::new().with_timeout(config.tool_timeout);

        Self {
            runner: JobRunner::new(store, engine, gate, tool),
            config,
        }
    }
}
