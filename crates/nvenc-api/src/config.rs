//! API configuration.
//!
//! Values come from the environment first and are then overridden by
//! command-line flags.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use nvenc_media::GateCapacity;

/// Command-line flags.
#[derive(Parser, Debug, Default, Clone)]
#[command(name = "nvenc-server")]
#[command(version)]
#[command(about = "Runs ffmpeg jobs behind a small HTTP API")]
pub struct Cli {
    /// Port to listen on
    #[arg(long)]
    pub port: Option<u16>,

    /// Let tool runs overlap without limit
    #[arg(long, conflicts_with = "concurrency")]
    pub parallel: bool,

    /// Allow at most N concurrent tool runs
    #[arg(long, value_name = "N")]
    pub concurrency: Option<GateCapacity>,

    /// Directory holding one subdirectory per job
    #[arg(long)]
    pub storage_root: Option<PathBuf>,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Root of the job store
    pub storage_root: PathBuf,
    /// Name a command template must start with
    pub tool_name: String,
    /// Executable actually launched
    pub tool_program: String,
    /// Execution gate capacity, fixed for the process lifetime
    pub exec_capacity: GateCapacity,
    /// Give up waiting for an execution slot after this long
    pub queue_timeout: Option<Duration>,
    /// Kill the tool after this long
    pub tool_timeout: Option<Duration>,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Rate limit requests per second
    pub rate_limit_rps: u32,
    /// Max request body size
    pub max_body_size: usize,
    /// Environment (development/production)
    pub environment: String,
    pub metrics_enabled: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            storage_root: PathBuf::from("storage"),
            tool_name: "ffmpeg".to_string(),
            tool_program: "ffmpeg".to_string(),
            exec_capacity: GateCapacity::SERIAL,
            queue_timeout: None,
            tool_timeout: None,
            cors_origins: vec!["*".to_string()],
            rate_limit_rps: 10,
            max_body_size: 2 * 1024 * 1024 * 1024, // 2GB
            environment: "development".to_string(),
            metrics_enabled: true,
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let tool_name = std::env::var("TOOL_NAME").unwrap_or(defaults.tool_name);

        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_parse("API_PORT").unwrap_or(defaults.port),
            storage_root: std::env::var("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_root),
            tool_program: std::env::var("TOOL_PROGRAM").unwrap_or_else(|_| tool_name.clone()),
            tool_name,
            exec_capacity: env_parse("EXEC_CONCURRENCY").unwrap_or(defaults.exec_capacity),
            queue_timeout: env_secs("EXEC_QUEUE_TIMEOUT_SECS"),
            tool_timeout: env_secs("TOOL_TIMEOUT_SECS"),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            rate_limit_rps: env_parse("RATE_LIMIT_RPS").unwrap_or(defaults.rate_limit_rps),
            max_body_size: env_parse("MAX_BODY_SIZE").unwrap_or(defaults.max_body_size),
            environment: std::env::var("ENVIRONMENT").unwrap_or(defaults.environment),
            metrics_enabled: std::env::var("METRICS_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.metrics_enabled),
        }
    }

    /// Apply command-line overrides.
    pub fn with_cli(mut self, cli: &Cli) -> Self {
        if let Some(port) = cli.port {
            self.port = port;
        }
        if cli.parallel {
            self.exec_capacity = GateCapacity::Unlimited;
        } else if let Some(capacity) = cli.concurrency {
            self.exec_capacity = capacity;
        }
        if let Some(root) = &cli.storage_root {
            self.storage_root = root.clone();
        }
        self
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Positive number of seconds; unset, zero or garbage means no limit.
fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key)
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_serial_and_unbounded_in_time() {
        let config = ApiConfig::default();
        assert_eq!(config.port, 5000);
        assert!(config.exec_capacity.is_serial());
        assert!(config.queue_timeout.is_none());
        assert!(config.tool_timeout.is_none());
        assert_eq!(config.tool_program, "ffmpeg");
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from(["nvenc-server", "--port", "8080", "--parallel"]);
        let config = ApiConfig::default().with_cli(&cli);
        assert_eq!(config.port, 8080);
        assert_eq!(config.exec_capacity, GateCapacity::Unlimited);

        let cli = Cli::parse_from(["nvenc-server", "--concurrency", "3", "--storage-root", "/srv/jobs"]);
        let config = ApiConfig::default().with_cli(&cli);
        assert_eq!(config.exec_capacity, GateCapacity::bounded(3));
        assert_eq!(config.storage_root, PathBuf::from("/srv/jobs"));
        assert_eq!(config.port, 5000);
    }

    #[test]
    fn test_is_production() {
        assert!(!ApiConfig::default().is_production());
        let config = ApiConfig {
            environment: "Production".to_string(),
            ..ApiConfig::default()
        };
        assert!(config.is_production());
    }

    #[test]
    fn test_parallel_conflicts_with_concurrency() {
        assert!(Cli::try_parse_from(["nvenc-server", "--parallel", "--concurrency", "2"]).is_err());
    }
}
