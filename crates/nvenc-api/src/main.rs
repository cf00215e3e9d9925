//! nvenc-server binary.

use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use nvenc_api::{create_router, metrics, ApiConfig, AppState, Cli};
use nvenc_media::check_tool;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,nvenc_api=info,nvenc_worker=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting nvenc-server");

    let config = ApiConfig::from_env().with_cli(&cli);
    info!(
        host = %config.host,
        port = config.port,
        storage_root = %config.storage_root.display(),
        tool = %config.tool_program,
        concurrency = %config.exec_capacity,
        "API config"
    );
    if !config.exec_capacity.is_serial() {
        warn!(
            concurrency = %config.exec_capacity,
            "Tool runs may overlap; the encoder may be contended"
        );
    }

    match check_tool(&config.tool_program) {
        Ok(path) => info!(path = %path.display(), "Found {}", config.tool_name),
        Err(e) => warn!("{}; runs will fail until it is installed", e),
    }

    let state = AppState::new(config.clone());
    state
        .runner
        .store()
        .init()
        .await
        .with_context(|| format!("cannot create {}", config.storage_root.display()))?;

    let metrics_handle = if config.metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().context("failed to install Prometheus recorder")?)
    } else {
        None
    };

    let app = create_router(state, metrics_handle);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid bind address")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
