//! Logging initialization for CardBridge.
//!
//! Supports three formats:
//! - `pretty`: multi-line human-readable output
//! - `component`: compact single-line output; use the [`log_component!`] macro
//!   to add a `component` field for per-subsystem filtering
//! - `json`: structured JSON lines for log aggregators
//!
//! Output goes to stderr unless `logging.file` is set, so command output on
//! stdout stays clean.

use std::sync::Mutex;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggingConfig};
use crate::error::{BridgeError, Result};

/// Initialize the global tracing subscriber from config.
///
/// `RUST_LOG` wins over `cfg.level`. Fails when the log file cannot be opened
/// or a subscriber is already installed.
pub fn init_logging(cfg: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .map_err(|e| BridgeError::Config(format!("invalid log level '{}': {}", cfg.level, e)))?;

    let (writer, ansi) = match &cfg.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| BridgeError::Config(format!("cannot open log file {}: {}", path, e)))?;
            (BoxMakeWriter::new(Mutex::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(ansi);

    let installed = match cfg.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Component => builder.with_target(true).compact().try_init(),
    };
    installed.map_err(|e| BridgeError::Config(format!("logging already initialized: {}", e)))
}

/// Emit a component-tagged tracing event.
///
/// ```
/// # use cardbridge::log_component;
/// log_component!(info, "watcher", "artifact detected");
/// log_component!(warn, "scheduler", "check failed", errors = 3u64);
/// ```
#[macro_export]
macro_rules! log_component {
    ($level:ident, $component:expr, $msg:expr) => {
        tracing::$level!(component = $component, $msg)
    };
    ($level:ident, $component:expr, $msg:expr, $($key:ident = $val:expr),+ $(,)?) => {
        tracing::$level!(component = $component, $($key = $val,)+ $msg)
    };
}
