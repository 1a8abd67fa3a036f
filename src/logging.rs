//! Logging and tracing initialization

use std::fs::File;
use std::path::Path;

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::ConfigError;

/// Initialize structured logging for a worker process
pub fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<(), ConfigError> {
    let default_filter = if verbose {
        "registre_pool=debug"
    } else {
        "registre_pool=info"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| ConfigError::Logging(format!("failed to create log filter: {e}")))?;

    if let Some(path) = log_file {
        init_file_logging(path, env_filter)
    } else {
        init_stdout_logging(env_filter);
        Ok(())
    }
}

/// Compact human-readable output on stdout
fn init_stdout_logging(env_filter: EnvFilter) {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_span_events(FmtSpan::NONE)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// JSON lines to a file, with thread info for postmortems
fn init_file_logging(log_path: &Path, env_filter: EnvFilter) -> Result<(), ConfigError> {
    let file = File::create(log_path)
        .map_err(|e| ConfigError::Logging(format!("failed to create log file: {e}")))?;

    let fmt_layer = fmt::layer()
        .with_writer(std::sync::Arc::new(file))
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(false)
        .json();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    Ok(())
}

/// Idempotent logging init for tests
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("registre_pool=debug"));

        let fmt_layer = fmt::layer().with_test_writer().with_target(false).compact();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .ok();
    });
}
