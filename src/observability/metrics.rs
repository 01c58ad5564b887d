//! Prometheus metrics.
//!
//! Every component records through the `metrics` facade. Installing the
//! exporter is optional; without it the macros are no-ops.

use crate::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use std::net::SocketAddr;
use std::thread;

/// Handle to the installed Prometheus recorder.
#[derive(Debug, Clone)]
pub struct MetricsHandle {
    prometheus: PrometheusHandle,
    listen_addr: SocketAddr,
}

impl MetricsHandle {
    /// Current metrics in the Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.prometheus.render()
    }

    /// Address the scrape endpoint listens on.
    #[must_use]
    pub const fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }
}

/// Parses a listen address such as `127.0.0.1:9464`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the address does not parse.
pub fn parse_listen_addr(listen: &str) -> Result<SocketAddr> {
    listen
        .trim()
        .parse()
        .map_err(|e| Error::InvalidInput(format!("invalid metrics listen address '{listen}': {e}")))
}

/// Installs the global Prometheus recorder with an HTTP scrape endpoint.
///
/// Returns `None` when `listen` is `None`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] for a bad address or when a recorder is
/// already installed.
pub fn install_prometheus(listen: Option<&str>) -> Result<Option<MetricsHandle>> {
    let Some(listen) = listen else {
        return Ok(None);
    };
    let listen_addr = parse_listen_addr(listen)?;
    let builder = PrometheusBuilder::new().with_http_listener(listen_addr);
    let prometheus = install_listener(builder)?;
    tracing::info!(%listen_addr, "Serving Prometheus metrics");
    Ok(Some(MetricsHandle {
        prometheus,
        listen_addr,
    }))
}

fn install_listener(builder: PrometheusBuilder) -> Result<PrometheusHandle> {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        return install_with_runtime(builder, &handle);
    }
    // The exporter needs a runtime; park a current-thread one on its own thread.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::InvalidInput(format!("metrics runtime: {e}")))?;
    let handle = runtime.handle().clone();
    let prometheus = install_with_runtime(builder, &handle)?;
    thread::Builder::new()
        .name("metrics-exporter-prometheus-http".to_string())
        .spawn(move || runtime.block_on(std::future::pending::<()>()))
        .map_err(|e| Error::InvalidInput(format!("metrics runtime thread: {e}")))?;
    Ok(prometheus)
}

fn install_with_runtime(
    builder: PrometheusBuilder,
    runtime_handle: &tokio::runtime::Handle,
) -> Result<PrometheusHandle> {
    let (recorder, exporter) = {
        let _guard = runtime_handle.enter();
        builder
            .build()
            .map_err(|e| Error::InvalidInput(format!("metrics exporter: {e}")))?
    };
    let handle = recorder.handle();
    set_global_recorder(recorder)?;
    runtime_handle.spawn(exporter);
    Ok(handle)
}

fn set_global_recorder(recorder: PrometheusRecorder) -> Result<()> {
    metrics::set_global_recorder(recorder)
        .map_err(|e| Error::InvalidInput(format!("metrics recorder: {e}")))
}
