//! Process-wide tracing setup.
//!
//! Events are printed to stdout and mirrored to a log file through a non-blocking writer.
//! `SOF_EXTRACT_LOG_FILE` names a file to append to; without it `logs/sof-extract.log` is
//! used. If the file cannot be opened, file logging is skipped with a note on stderr.
use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_FILE_VAR: &str = "SOF_EXTRACT_LOG_FILE";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_FILE: &str = "sof-extract.log";
const DEFAULT_FILTER: &str = "info,tower_http=debug";

static FILE_WRITER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where file logs are written.
enum LogSink {
    /// Operator-chosen file, appended to.
    Explicit(PathBuf),
    /// `logs/sof-extract.log` under the working directory.
    Default,
}

impl LogSink {
    fn from_env() -> Self {
        match std::env::var_os(LOG_FILE_VAR) {
            Some(path) if !path.is_empty() => Self::Explicit(path.into()),
            _ => Self::Default,
        }
    }

    fn path(&self) -> PathBuf {
        match self {
            Self::Explicit(path) => path.clone(),
            Self::Default => PathBuf::from(DEFAULT_LOG_DIR).join(DEFAULT_LOG_FILE),
        }
    }

    /// Open the sink and park its flush guard for the rest of the process.
    fn open(&self) -> io::Result<NonBlocking> {
        let (writer, guard) = match self {
            Self::Explicit(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                tracing_appender::non_blocking(file)
            }
            Self::Default => {
                std::fs::create_dir_all(DEFAULT_LOG_DIR)?;
                tracing_appender::non_blocking(tracing_appender::rolling::never(
                    DEFAULT_LOG_DIR,
                    DEFAULT_LOG_FILE,
                ))
            }
        };
        let _ = FILE_WRITER_GUARD.set(guard);
        Ok(writer)
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the `info,tower_http=debug` default.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let stdout = fmt::layer().with_target(false).compact();

    let sink = LogSink::from_env();
    let file = match sink.open() {
        Ok(writer) => Some(fmt::layer().with_writer(writer).with_ansi(false).compact()),
        Err(err) => {
            eprintln!("File logging disabled, cannot open {}: {err}", sink.path().display());
            None
        }
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn explicit_sink_creates_missing_file() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("server.log");
        let sink = LogSink::Explicit(path.clone());

        sink.open().expect("open sink");
        assert!(path.exists());
        assert_eq!(sink.path(), path);
    }

    #[test]
    fn explicit_sink_in_missing_directory_fails() {
        let dir = TempDir::new().expect("tempdir");
        let sink = LogSink::Explicit(dir.path().join("absent").join("server.log"));

        assert!(sink.open().is_err());
    }
}
