//! Metrics recorder initialization.

use tracing::info;

use crate::Result;

/// Handle to the installed recorder.
#[derive(Clone)]
pub struct MetricsHandle {
    #[cfg(feature = "prometheus")]
    prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl MetricsHandle {
    /// Render metrics in Prometheus text format (empty when nothing is exported).
    #[must_use]
    pub fn render(&self) -> String {
        #[cfg(feature = "prometheus")]
        {
            self.prometheus_handle
                .as_ref()
                .map(|h| h.render())
                .unwrap_or_default()
        }
        #[cfg(not(feature = "prometheus"))]
        {
            String::new()
        }
    }
}

/// Configuration for the metrics system.
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorderConfig {
    pub enabled: bool,
    /// Labels added to every metric.
    pub global_labels: Vec<(String, String)>,
}

/// Install the global recorder. Call once at startup.
///
/// When disabled, or built without `prometheus`, no recorder is installed and
/// the facade macros are no-ops.
pub fn init_metrics(config: MetricsRecorderConfig) -> Result<MetricsHandle> {
    if !config.enabled {
        info!("metrics collection is disabled");
        return Ok(MetricsHandle {
            #[cfg(feature = "prometheus")]
            prometheus_handle: None,
        });
    }

    #[cfg(feature = "prometheus")]
    {
        let handle = init_prometheus(config)?;
        info!("prometheus metrics recorder installed");
        Ok(MetricsHandle {
            prometheus_handle: Some(handle),
        })
    }

    #[cfg(not(feature = "prometheus"))]
    {
        let _ = config;
        info!("metrics enabled but the prometheus exporter is not compiled in");
        Ok(MetricsHandle {})
    }
}

#[cfg(feature = "prometheus")]
fn init_prometheus(
    config: MetricsRecorderConfig,
) -> Result<metrics_exporter_prometheus::PrometheusHandle> {
    Ok(prometheus_builder(config)?.install_recorder()?)
}

#[cfg(feature = "prometheus")]
fn prometheus_builder(
    config: MetricsRecorderConfig,
) -> Result<metrics_exporter_prometheus::PrometheusBuilder> {
    use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

    let mut builder = PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full(crate::relay::DELIVERY_DURATION_SECONDS.to_string()),
        &crate::buckets::DELIVERY_DURATION,
    )?;
    for (key, value) in config.global_labels {
        builder = builder.add_global_label(key, value);
    }
    Ok(builder)
}
