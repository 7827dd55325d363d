//! Prometheus recorder, installed once per process.
//!
//! The delivery stream server exposes the rendered text on its own router,
//! so no separate HTTP listener is started here.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use snafu::prelude::*;
use std::sync::OnceLock;
use tracing::info;

use crate::error::{AlreadyInitializedSnafu, MetricsError, NotInitializedSnafu, PrometheusInitSnafu};

/// Histogram buckets for duration metrics (in seconds).
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

static CONTROLLER: OnceLock<MetricsController> = OnceLock::new();

/// Handle to the installed recorder.
pub struct MetricsController {
    handle: PrometheusHandle,
}

fn install() -> Result<(), MetricsError> {
    let handle = PrometheusBuilder::new()
        .set_buckets(DURATION_BUCKETS)
        .context(PrometheusInitSnafu)?
        .install_recorder()
        .context(PrometheusInitSnafu)?;

    CONTROLLER
        .set(MetricsController { handle })
        .map_err(|_| AlreadyInitializedSnafu.build())
}

/// Install the global Prometheus recorder.
///
/// # Errors
///
/// Fails if a recorder is already installed.
pub fn init() -> Result<(), MetricsError> {
    install()?;
    info!("Metrics recorder installed");
    Ok(())
}

/// Install the recorder for tests; safe to call from many test threads.
pub fn init_test() {
    if install().is_err() {
        while CONTROLLER.get().is_none() {
            std::hint::spin_loop();
        }
    }
}

impl MetricsController {
    /// Get the global controller.
    pub fn get() -> Result<&'static Self, MetricsError> {
        CONTROLLER.get().context(NotInitializedSnafu)
    }

    /// Render metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit;
    use crate::metrics::events::RecordsAccepted;

    #[test]
    fn test_render_after_emit() {
        init_test();
        emit!(RecordsAccepted {
            count: 2,
            stream: "render-test".to_string(),
        });

        let text = MetricsController::get().unwrap().render();
        assert!(text.contains("sluice_records_accepted_total"));
    }
}
