//! Prometheus metrics.

use crate::config::{MetricsSettings, parse_bool_env, parse_string_env};
use crate::{Error, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const DEFAULT_METRICS_PORT: u16 = 9090;

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether metrics are enabled.
    pub enabled: bool,
    /// Address to bind the metrics exporter.
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_METRICS_PORT),
        }
    }
}

impl MetricsConfig {
    /// Builds metrics configuration from config settings with env overrides.
    #[must_use]
    pub fn from_settings(settings: Option<&MetricsSettings>) -> Self {
        let enabled = settings.and_then(|config| config.enabled).unwrap_or(false);
        let port = settings
            .and_then(|config| config.port)
            .unwrap_or(DEFAULT_METRICS_PORT);

        let mut config = Self {
            enabled,
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
        };

        if let Some(enabled) = parse_bool_env("MOODSCAN_METRICS_ENABLED") {
            config.enabled = enabled;
        }
        if let Some(port) = parse_string_env("MOODSCAN_METRICS_PORT").and_then(|v| v.parse().ok())
        {
            config.listen_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        }

        config
    }
}

/// Installs the Prometheus recorder, optionally with its HTTP listener.
///
/// The listener needs a running tokio runtime; callers outside one should
/// pass `expose = false`.
pub fn install_prometheus(config: &MetricsConfig, expose: bool) -> Result<Option<PrometheusHandle>> {
    if !config.enabled {
        return Ok(None);
    }

    let builder = PrometheusBuilder::new();
    let handle = if expose {
        let (recorder, exporter) = builder
            .with_http_listener(config.listen_addr)
            .build()
            .map_err(|e| Error::OperationFailed {
                operation: "metrics_exporter_build".to_string(),
                cause: e.to_string(),
            })?;
        let handle = recorder.handle();
        metrics::set_global_recorder(recorder).map_err(|e| Error::OperationFailed {
            operation: "metrics_recorder_install".to_string(),
            cause: e.to_string(),
        })?;
        tokio::spawn(exporter);
        tracing::info!(addr = %config.listen_addr, "Prometheus metrics listener started");
        handle
    } else {
        builder
            .install_recorder()
            .map_err(|e| Error::OperationFailed {
                operation: "metrics_recorder_install".to_string(),
                cause: e.to_string(),
            })?
    };

    Ok(Some(handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_disabled_by_default() {
        if std::env::var("MOODSCAN_METRICS_ENABLED").is_ok() {
            return;
        }
        let config = MetricsConfig::from_settings(None);
        assert!(!config.enabled);
        assert!(install_prometheus(&config, false).unwrap().is_none());
    }

    #[test]
    fn test_metrics_port_from_settings() {
        if std::env::var("MOODSCAN_METRICS_PORT").is_ok() {
            return;
        }
        let settings = MetricsSettings {
            enabled: Some(true),
            port: Some(9464),
        };
        let config = MetricsConfig::from_settings(Some(&settings));
        assert_eq!(config.listen_addr.port(), 9464);
    }

    #[test]
    fn test_metrics_registry_smoke() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            metrics::counter!("detection_requests_total", "status" => "success").increment(1);
        });
        let rendered = handle.render();
        assert!(rendered.contains("detection_requests_total"));
    }
}
