//! Logging configuration and initialization
//!
//! Console output (compact or JSON) and optional daily-rotated log files,
//! filtered through `VOUT_LOG` / `RUST_LOG`.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Keeps the file writer flushing; hold it for the life of the program
pub use tracing_appender::non_blocking::WorkerGuard as LogGuard;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Enable console output (default: true)
    pub console_enabled: bool,
    /// Enable file logging (default: false)
    pub file_enabled: bool,
    /// Directory for log files (default: system cache directory)
    pub log_dir: Option<PathBuf>,
    /// Use JSON format for console logs (default: false)
    pub json_format: bool,
    /// Default log level filter (default: "info")
    pub default_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_enabled: true,
            file_enabled: false,
            log_dir: None,
            json_format: false,
            default_level: "info".to_string(),
        }
    }
}

impl LogConfig {
    /// Directory log files are written to
    pub fn resolved_log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .map(|p| p.join("ImmersiveVout").join("logs"))
                .unwrap_or_else(|| PathBuf::from("logs"))
        })
    }
}

/// Initialize the global subscriber
///
/// # Environment Variables
///
/// - `VOUT_LOG`: log level filter (e.g. "debug", "info,immersive_vout::pool=trace")
/// - `VOUT_LOG_FORMAT`: set to "json" for JSON console output
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_env("VOUT_LOG")
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let use_json = std::env::var("VOUT_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(config.json_format);

    let mut file_guard = None;
    let file_layer = if config.file_enabled {
        let dir = config.resolved_log_dir();
        std::fs::create_dir_all(&dir)?;
        let appender = tracing_appender::rolling::daily(&dir, "vout.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);
        eprintln!("Logging to directory: {}", dir.display());
        Some(
            fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_ansi(false),
        )
    } else {
        None
    };

    let (json_layer, console_layer) = match (config.console_enabled, use_json) {
        (false, _) => (None, None),
        (true, true) => (
            Some(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            ),
            None,
        ),
        (true, false) => (None, Some(fmt::layer().with_target(true).compact())),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(json_layer)
        .with(console_layer)
        .try_init()?;

    tracing::info!(
        target: "immersive_vout",
        version = env!("CARGO_PKG_VERSION"),
        json_format = use_json,
        file_enabled = config.file_enabled,
        "Logging initialized"
    );

    Ok(file_guard)
}
