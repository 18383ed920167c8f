//! Logging setup and configuration

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Build the filter from `RUST_LOG`, falling back to `default_level`
pub fn build_filter(default_level: &str) -> crate::Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::Error::Config(format!("Invalid log filter: {}", e)))
}

/// Setup tracing subscriber for the application
///
/// With `log_file` set, output is appended to that file without ANSI
/// colours; otherwise it goes to stderr.
pub fn setup_logging(default_level: &str, log_file: Option<&Path>) -> crate::Result<()> {
    let filter = build_filter(default_level)?;

    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| {
                    crate::Error::Config(format!(
                        "Cannot open log file {}: {}",
                        path.display(),
                        e
                    ))
                })?;

            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}
