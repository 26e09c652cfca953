//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins; otherwise `-v` raises the configured `log.level`.
//! With `log.file` set, output goes through a non-blocking file writer
//! whose guard must be held for the lifetime of the process.

use std::ffi::OsStr;
use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use panelsync_config::{LogConfig, LogFormat};

use crate::error::CliError;

fn directive(log: &LogConfig, verbosity: u8) -> &str {
    match verbosity {
        0 => &log.level,
        1 => "debug",
        _ => "trace",
    }
}

pub fn init(log: &LogConfig, verbosity: u8) -> Result<Option<WorkerGuard>, CliError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive(log, verbosity)))
        .map_err(|e| CliError::Logging {
            message: format!("invalid level '{}': {e}", log.level),
        })?;

    let (writer, guard) = match &log.file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            std::fs::create_dir_all(dir)?;
            let name = path.file_name().unwrap_or(OsStr::new("panelsync.log"));
            let appender = tracing_appender::rolling::never(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stderr), None),
    };

    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(log.file.is_none())
        .with_target(true);
    let registry = tracing_subscriber::registry().with(filter);

    match log.format {
        LogFormat::Text => registry.with(layer).try_init(),
        LogFormat::Json => registry.with(layer.json()).try_init(),
    }
    .map_err(|e| CliError::Logging {
        message: e.to_string(),
    })?;

    Ok(guard)
}
