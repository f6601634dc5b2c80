//! Prometheus recorder installation.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the process-global Prometheus recorder.
///
/// Returns `None` when a recorder is already installed (tests, embedders);
/// the `/metrics` route then reports 404 instead of panicking.
#[must_use]
pub fn install_recorder() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "failed to install metrics recorder");
            None
        }
    }
}
