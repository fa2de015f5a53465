//! Logging initialization for chatapp binaries.
//!
//! Thin wrapper over the observability package so every binary configures
//! `tracing` the same way.

use std::path::PathBuf;

/// Initialize the logging system.
///
/// - `RUST_LOG` wins over `level` when set; unknown levels mean `info`
/// - with `also_stderr`, stderr gets compact human-readable output
/// - when `log_path` is given, structured JSONL is appended there
///
/// ```ignore
/// init_logging("chatapp-cli", "info", Some(paths.log_file()), false);
/// tracing::info!("client started");
/// ```
pub fn init_logging(service_name: &str, level: &str, log_path: Option<PathBuf>, also_stderr: bool) {
    observability::init_with_config(observability::LogConfig {
        service_name: service_name.into(),
        default_level: parse_level(level).to_string().to_lowercase(),
        log_path,
        also_stderr,
    });
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
