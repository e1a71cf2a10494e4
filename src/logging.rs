use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::combinator::Or;
use tracing_subscriber::filter::{FilterExt, Targets};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static LOG_GUARD: Mutex<Option<WorkerGuard>> = Mutex::new(None);
static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

pub const TOOL_NAME: &str = "cryptgrow";

/// `cryptgrow_<YYYYMMDD_HHMMSS>.log`
pub fn log_file_name(now: chrono::DateTime<chrono::Local>) -> String {
    format!("{}_{}.log", TOOL_NAME, now.format("%Y%m%d_%H%M%S"))
}

/// Create the run log in `dir` and route tracing events into it.
///
/// Terminal output is produced by [`crate::ui`]; the subscriber only writes
/// the file, so every line the user sees lands in the log exactly once.
pub fn init(dir: &Path, debug: bool) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("creating log directory {}", dir.display()))?;

    let file_name = log_file_name(chrono::Local::now());
    let path = dir.join(&file_name);

    let appender = tracing_appender::rolling::never(dir, &file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_filter(file_filter(debug, rust_log.as_deref()));

    tracing_subscriber::registry()
        .with(file_layer)
        .try_init()
        .context("installing log subscriber")?;

    if let Ok(mut slot) = LOG_GUARD.lock() {
        *slot = Some(guard);
    }
    let _ = LOG_PATH.set(path.clone());

    Ok(path)
}

/// `RUST_LOG` when set and valid, otherwise `info` (`debug` with `--debug`).
///
/// Our own info events always pass, so the log keeps every line the user saw.
pub fn file_filter<S>(debug: bool, rust_log: Option<&str>) -> Or<EnvFilter, Targets, S> {
    let default_directive = if debug { "debug" } else { "info" };
    let env_filter = rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(format!("{TOOL_NAME}={default_directive}")));
    env_filter.or(Targets::new().with_target(TOOL_NAME, Level::INFO))
}

/// Flush buffered lines to the log file. Call once, right before exiting.
pub fn shutdown() {
    if let Ok(mut slot) = LOG_GUARD.lock() {
        slot.take();
    }
}

/// Path of the current run log, once [`init`] has succeeded.
pub fn log_path() -> Option<&'static Path> {
    LOG_PATH.get().map(PathBuf::as_path)
}
