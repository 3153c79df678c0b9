mod common;
mod config;
mod engine;
mod storage;
mod tx;
mod version;

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

pub use common::{DriftError, DriftResult};
pub use engine::Engine;
pub use tx::{IsolationLevel, SUPER_XID};

// Keeps the file writer's flush thread alive for the process lifetime.
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Route the engine's tracing output to stdout and a daily-rolling file at
/// the configured path. For embedders that want the engine's own logs;
/// nothing in the engine calls this itself.
pub fn init_log() -> DriftResult<()> {
    init_log_to(config::LOG_PATH)
}

/// [`init_log`] with an explicit log file path. Only the first call
/// installs anything; later calls are no-ops.
pub fn init_log_to<P: AsRef<Path>>(log_path: P) -> DriftResult<()> {
    let log_path = log_path.as_ref();
    let log_dir = match log_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let log_filename = log_path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("driftdb.log");
    fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, log_filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    if LOG_GUARD.set(guard).is_err() {
        return Ok(());
    }

    let stdout_log = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_thread_names(true);

    let file_log = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_thread_names(true);

    // Lost only when the embedder installed a subscriber of its own first;
    // the engine's events then flow through that one.
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config::LOG_LEVEL))
        .with(stdout_log)
        .with(file_log)
        .try_init();
    Ok(())
}
