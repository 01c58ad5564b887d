//! Observability: structured logs through `tracing`, metrics through
//! `metrics` with an optional Prometheus scrape endpoint.

mod logging;
mod metrics;

pub use logging::{LOG_ENV, LogFileWriter, build_filter, open_log_file};
pub use metrics::{MetricsHandle, install_prometheus, parse_listen_addr};

use crate::config::{LogFormat, LoggingConfig};
use crate::{Error, Result};
use std::sync::OnceLock;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static OBSERVABILITY_INIT: OnceLock<()> = OnceLock::new();

/// Handle for observability runtime components.
#[derive(Debug, Default)]
pub struct ObservabilityHandle {
    metrics: Option<MetricsHandle>,
}

impl ObservabilityHandle {
    /// The Prometheus handle, if an exporter was installed.
    #[must_use]
    pub const fn metrics(&self) -> Option<&MetricsHandle> {
        self.metrics.as_ref()
    }
}

/// Initializes logging and metrics for the process.
///
/// Logs go to stderr, or to `config.file` when set, as pretty text or JSON
/// lines. `WORLD_MEMORY_LOG` overrides `config.level`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if observability was already initialized,
/// the log file cannot be opened, or the metrics exporter fails to start.
pub fn init(config: &LoggingConfig) -> Result<ObservabilityHandle> {
    if OBSERVABILITY_INIT.get().is_some() {
        return Err(Error::InvalidInput(
            "observability already initialized".to_string(),
        ));
    }

    let filter = build_filter(&config.level);
    match (&config.file, config.format) {
        (Some(path), LogFormat::Json) => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(open_log_file(path)?)
                    .with_current_span(true)
                    .with_target(true),
            )
            .with(filter)
            .try_init()
            .map_err(init_error)?,
        (Some(path), LogFormat::Pretty) => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(open_log_file(path)?)
                    .with_ansi(false)
                    .with_target(true),
            )
            .with(filter)
            .try_init()
            .map_err(init_error)?,
        (None, LogFormat::Json) => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_target(true),
            )
            .with(filter)
            .try_init()
            .map_err(init_error)?,
        (None, LogFormat::Pretty) => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true),
            )
            .with(filter)
            .try_init()
            .map_err(init_error)?,
    }

    let metrics = install_prometheus(config.metrics_listen.as_deref())?;

    OBSERVABILITY_INIT
        .set(())
        .map_err(|()| Error::InvalidInput("observability already initialized".to_string()))?;

    Ok(ObservabilityHandle { metrics })
}

#[allow(clippy::needless_pass_by_value)]
fn init_error(e: tracing_subscriber::util::TryInitError) -> Error {
    Error::InvalidInput(format!("logging init failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            file: Some(dir.path().join("world.log")),
            ..LoggingConfig::default()
        };
        let _first = init(&config);
        assert!(init(&config).is_err());
    }
}
