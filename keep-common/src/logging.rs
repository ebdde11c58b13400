//! Logging bootstrap shared by all three binaries.
//!
//! `RUST_LOG` is honored via `EnvFilter`; `--debug` raises the default
//! filter to `debug` when the variable is unset, matching the teacher's
//! `RUST_LOG`-forwarding convention (`controller::spawn::spawn_subprocess`).

use std::fs::OpenOptions;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}', expected text|json")),
        }
    }
}

/// Installs the process-wide `tracing` subscriber.
///
/// When `log_file` is `Some`, output goes to that file instead of stderr —
/// this is the runtime's `--log <file>` surface (spec §6), and it must be a
/// real file write: the shim's `last_json_log_error` reads this exact path
/// back. The returned `WorkerGuard` flushes the non-blocking writer on drop
/// and must be held for the life of the process.
pub fn init(debug: bool, format: LogFormat, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));

    let (writer, guard) = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .unwrap_or_else(|e| panic!("failed to open log file {}: {e}", path.display()));
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            (non_blocking, Some(guard))
        }
        None => {
            let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stderr());
            (non_blocking, Some(guard))
        }
    };

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_writer(writer);

    match format {
        LogFormat::Text => {
            let _ = subscriber.try_init();
        }
        LogFormat::Json => {
            let _ = subscriber.json().try_init();
        }
    }

    guard
}
