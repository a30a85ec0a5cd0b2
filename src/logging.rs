use std::path::Path;

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::{AppError, AppResult};

pub const ENV_LOG_FILTER: &str = "ICONVAULT_LOG";
pub const DEFAULT_LOG_FILTER: &str = "iconvault=info,sqlx=warn";
const LOG_FILE_PREFIX: &str = "iconvault.log";

static INITIALIZED: OnceCell<()> = OnceCell::new();

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(ENV_LOG_FILTER).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Install the JSON console subscriber. Repeated calls are no-ops.
pub fn init_logging() {
    let _ = init_logging_with(None);
}

/// Like [`init_logging`], plus a daily-rolling file sink under `log_dir`.
/// Keep the returned guard alive for as long as logs should be flushed.
pub fn init_logging_with(log_dir: Option<&Path>) -> AppResult<Option<WorkerGuard>> {
    if INITIALIZED.get().is_some() {
        return Ok(None);
    }

    // stdout carries command output, so console logs go to stderr.
    let console_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|err| {
                AppError::from(err).with_context("operation", "create_log_dir")
            })?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_ansi(false)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter())
        .with(console_layer)
        .with(file_layer);
    tracing::subscriber::set_global_default(subscriber).map_err(|err| {
        AppError::new("LOGGING/ALREADY_SET", err.to_string())
            .with_context("operation", "install_subscriber")
    })?;
    // A `log` logger installed elsewhere keeps its records; tracing is unaffected.
    let _ = tracing_log::LogTracer::init();
    let _ = INITIALIZED.set(());
    Ok(guard)
}
