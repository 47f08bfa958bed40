//! Telemetry initialization
//!
//! TigerStyle: One subscriber per process, one metrics observer per process.
//!
//! [`init_telemetry`] installs the `tracing` subscriber and builds the
//! [`LrpMetrics`] observer that every controller and the event hubs share.
//! With the `otel` feature spans are also exported over OTLP, and the observer
//! can mirror its counters into a Prometheus registry that the host serves.

use crate::config::env_parse;
use crate::error::{Error, Result};
use crate::metrics::LrpMetrics;
use std::sync::Arc;
use tracing::Subscriber;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::fmt::TestWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer};

const SERVICE_NAME_DEFAULT: &str = "bulletin";

const LOG_LEVEL_DEFAULT: &str = "info";

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    /// Filter used when `RUST_LOG` is unset
    pub log_level: String,
    /// OTLP collector, e.g. `http://localhost:4317`; needs `otel`
    pub otlp_endpoint: Option<String>,
    /// Back the metrics observer with a Prometheus registry; needs `otel`
    pub metrics_enabled: bool,
    /// Log through the libtest capture instead of stdout
    pub test_writer: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: SERVICE_NAME_DEFAULT.to_string(),
            log_level: LOG_LEVEL_DEFAULT.to_string(),
            otlp_endpoint: None,
            metrics_enabled: false,
            test_writer: false,
        }
    }
}

impl TelemetryConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    pub fn with_otlp_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_metrics(mut self) -> Self {
        self.metrics_enabled = true;
        self
    }

    pub fn with_test_writer(mut self) -> Self {
        self.test_writer = true;
        self
    }

    /// Defaults overlaid with `OTEL_SERVICE_NAME`,
    /// `OTEL_EXPORTER_OTLP_ENDPOINT` and `BULLETIN_METRICS_ENABLED`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(name) = std::env::var("OTEL_SERVICE_NAME") {
            config.service_name = name;
        }
        config.otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();
        if let Some(enabled) = env_parse::<bool>("BULLETIN_METRICS_ENABLED")? {
            config.metrics_enabled = enabled;
        }
        Ok(config)
    }
}

/// Held by the host for the life of the process
pub struct Telemetry {
    metrics: Arc<LrpMetrics>,
    #[cfg(feature = "otel")]
    exporting_spans: bool,
    #[cfg(feature = "otel")]
    registry: Option<prometheus::Registry>,
}

impl Telemetry {
    /// The observer to hand to the controllers and the event emitter
    pub fn metrics(&self) -> Arc<LrpMetrics> {
        self.metrics.clone()
    }

    /// Registry for the scrape endpoint, when metrics are enabled
    #[cfg(feature = "otel")]
    pub fn metrics_registry(&self) -> Option<&prometheus::Registry> {
        self.registry.as_ref()
    }
}

#[cfg(feature = "otel")]
impl Drop for Telemetry {
    fn drop(&mut self) {
        if self.exporting_spans {
            opentelemetry::global::shutdown_tracer_provider();
        }
    }
}

fn env_filter(config: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
}

fn fmt_layer<S>(config: &TelemetryConfig) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let writer = if config.test_writer {
        BoxMakeWriter::new(TestWriter::default())
    } else {
        BoxMakeWriter::new(std::io::stdout)
    };
    tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(writer)
}

fn subscriber_init_failed(e: impl std::fmt::Display) -> Error {
    Error::internal(format!("failed to initialize tracing subscriber: {}", e))
}

/// Install the subscriber and build the metrics observer
///
/// Fails if a global subscriber is already installed.
///
/// ```rust,ignore
/// let telemetry = init_telemetry(&TelemetryConfig::from_env()?)?;
/// let emitter = EventEmitter::new(&config.events, telemetry.metrics());
/// ```
#[cfg(not(feature = "otel"))]
pub fn init_telemetry(config: &TelemetryConfig) -> Result<Telemetry> {
    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(fmt_layer(config))
        .try_init()
        .map_err(subscriber_init_failed)?;

    if config.otlp_endpoint.is_some() || config.metrics_enabled {
        tracing::warn!("built without the otel feature, exporters are disabled");
    }
    tracing::info!(service = %config.service_name, "telemetry initialized");

    Ok(Telemetry {
        metrics: Arc::new(LrpMetrics::new()),
    })
}

/// Install the subscriber, the OTLP span exporter and the metrics observer
#[cfg(feature = "otel")]
pub fn init_telemetry(config: &TelemetryConfig) -> Result<Telemetry> {
    let otel_layer = match &config.otlp_endpoint {
        Some(endpoint) => {
            let tracer = otlp_tracer(config, endpoint)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };
    let exporting_spans = otel_layer.is_some();

    tracing_subscriber::registry()
        .with(env_filter(config))
        .with(fmt_layer(config))
        .with(otel_layer)
        .try_init()
        .map_err(subscriber_init_failed)?;

    tracing::info!(
        service = %config.service_name,
        otlp_endpoint = ?config.otlp_endpoint,
        "telemetry initialized"
    );

    let (metrics, registry) = if config.metrics_enabled {
        let (metrics, registry) = prometheus_metrics(config)?;
        (metrics, Some(registry))
    } else {
        (LrpMetrics::new(), None)
    };

    Ok(Telemetry {
        metrics: Arc::new(metrics),
        exporting_spans,
        registry,
    })
}

#[cfg(feature = "otel")]
fn service_resource(config: &TelemetryConfig) -> opentelemetry_sdk::Resource {
    opentelemetry_sdk::Resource::new(vec![opentelemetry::KeyValue::new(
        "service.name",
        config.service_name.clone(),
    )])
}

#[cfg(feature = "otel")]
fn otlp_tracer(
    config: &TelemetryConfig,
    endpoint: &str,
) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_otlp::WithExportConfig;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint);

    opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(exporter)
        .with_trace_config(
            opentelemetry_sdk::trace::Config::default().with_resource(service_resource(config)),
        )
        .install_batch(opentelemetry_sdk::runtime::Tokio)
        .map_err(|e| Error::internal(format!("failed to initialize OTLP exporter: {}", e)))
}

/// Global meter provider reading into a fresh registry, and an observer on it
#[cfg(feature = "otel")]
fn prometheus_metrics(config: &TelemetryConfig) -> Result<(LrpMetrics, prometheus::Registry)> {
    use opentelemetry_sdk::metrics::MeterProviderBuilder;

    let registry = prometheus::Registry::new();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()
        .map_err(|e| Error::internal(format!("failed to create Prometheus exporter: {}", e)))?;

    let provider = MeterProviderBuilder::default()
        .with_resource(service_resource(config))
        .with_reader(exporter)
        .build();
    opentelemetry::global::set_meter_provider(provider);

    let meter = opentelemetry::global::meter(SERVICE_NAME_DEFAULT);
    tracing::info!(service = %config.service_name, "lrp metrics exported to prometheus");
    Ok((LrpMetrics::with_meter(&meter), registry))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "bulletin");
        assert_eq!(config.log_level, "info");
        assert!(config.otlp_endpoint.is_none());
        assert!(!config.metrics_enabled);
        assert!(!config.test_writer);
    }

    #[test]
    fn test_telemetry_config_builder() {
        let config = TelemetryConfig::new("bbs")
            .with_otlp_endpoint("http://localhost:4317")
            .with_log_level("debug")
            .with_metrics()
            .with_test_writer();

        assert_eq!(config.service_name, "bbs");
        assert_eq!(
            config.otlp_endpoint.as_deref(),
            Some("http://localhost:4317")
        );
        assert_eq!(config.log_level, "debug");
        assert!(config.metrics_enabled);
        assert!(config.test_writer);
    }

    #[test]
    fn test_init_telemetry_once_per_process() {
        let config = TelemetryConfig::new("bulletin-test").with_test_writer();
        let telemetry = init_telemetry(&config).unwrap();

        let metrics = telemetry.metrics();
        metrics.record_lrp_crash();
        assert_eq!(telemetry.metrics().snapshot().lrp_crashes, 1);

        assert!(init_telemetry(&config).is_err());
    }
}
