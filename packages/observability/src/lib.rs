//! # observability
//!
//! Logging initialization shared by every chatapp binary.
//!
//! Library crates never configure logging. They use plain `tracing` macros
//! and leave sink selection to the binary, which calls
//! [`init_with_config`] once at startup.
//!
//! Two sinks are available:
//!
//! - compact human-readable output on stderr
//! - structured JSONL appended to a file (one object per event, credentials
//!   redacted), suitable for `tail -f client.jsonl | jq`
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init_with_config(observability::LogConfig {
//!         service_name: "chatapp-cli".into(),
//!         default_level: "debug".into(),
//!         also_stderr: true,
//!         ..Default::default()
//!     });
//!
//!     tracing::info!("ready");
//! }
//! ```

mod file_writer;
mod json_layer;

use std::path::PathBuf;

pub use json_layer::LogEntry;

/// Sinks and filter for one process.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Written as `service` on every JSONL line.
    pub service_name: String,

    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub default_level: String,

    /// JSONL log file. When `None`, no file sink is installed.
    pub log_path: Option<PathBuf>,

    /// Also emit compact logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: env!("CARGO_PKG_NAME").into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: true,
        }
    }
}

/// Initialize logging with custom configuration.
///
/// Calling this more than once is harmless: later calls leave the first
/// subscriber installed.
pub fn init_with_config(config: LogConfig) {
    file_writer::init_subscriber(&config);
}
