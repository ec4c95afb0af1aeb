//! Tracing configuration and log routing.
//!
//! Console logs use a compact formatter. Batch commands (`ingest`, `build-index`, `search`,
//! `ask`) print their results on stdout, so their logs go to stderr; the server logs to stdout.
//! A file layer is added on top: `NOTESRAG_LOG_FILE` selects the path, otherwise
//! `logs/notesrag.log` is used. Set `NOTESRAG_LOG_FILE=off` to disable file logging.
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_FILE: &str = "notesrag.log";

/// Where console output should be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleTarget {
    /// Long-running server: logs are the primary output.
    Stdout,
    /// Batch command: stdout is reserved for results.
    Stderr,
}

/// Configure tracing subscribers for the console and optional file logging.
///
/// Respects `RUST_LOG` for filtering and defaults to `info`.
pub fn init_tracing(console: ConsoleTarget) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let console_layer = match console {
        ConsoleTarget::Stdout => fmt::layer().with_target(false).compact().boxed(),
        ConsoleTarget::Stderr => fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .boxed(),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    match configure_file_writer(log_file_path()) {
        Some(writer) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_ansi(false)
                .compact();
            registry.with(file_layer).init();
        }
        None => registry.init(),
    }
}

fn log_file_path() -> Option<PathBuf> {
    match std::env::var("NOTESRAG_LOG_FILE") {
        Ok(value) if value.eq_ignore_ascii_case("off") => None,
        Ok(value) if !value.trim().is_empty() => Some(PathBuf::from(value)),
        _ => Some(Path::new(DEFAULT_LOG_DIR).join(DEFAULT_LOG_FILE)),
    }
}

fn configure_file_writer(path: Option<PathBuf>) -> Option<NonBlocking> {
    let path = path?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty())
        && let Err(err) = std::fs::create_dir_all(parent)
    {
        eprintln!("Failed to create log directory {}: {err}", parent.display());
        return None;
    }

    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
    {
        Ok(file) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let _ = LOG_GUARD.set(guard);
            Some(non_blocking)
        }
        Err(err) => {
            eprintln!("Failed to open log file {}: {err}", path.display());
            None
        }
    }
}
