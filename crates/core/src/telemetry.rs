// Logging and OpenTelemetry setup
//
// Console logging through tracing-subscriber is always on. Spans are also
// exported over OTLP when OTEL_EXPORTER_OTLP_ENDPOINT is set.
//
// Every scan cycle opens a span carrying its cycle_id, and the notification
// jobs it spawns open their own span with the same cycle_id, so the logs of a
// cycle can be followed across the dispatcher's tasks.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, SdkTracerProvider},
    Resource,
};
use std::fmt::Display;
use std::time::Duration;
use tracing::Span;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Default filter when neither RUST_LOG nor LOG_LEVEL is set
pub const DEFAULT_LOG_FILTER: &str = "info,sqlx=warn";

/// Resource attribute holding the booking time zone
pub const TIME_ZONE_ATTRIBUTE: &str = "eventhook.time_zone";

// ============================================================================
// Telemetry Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name for traces
    pub service_name: String,
    pub service_version: Option<String>,
    /// OTLP endpoint (e.g., "http://localhost:4317")
    pub otlp_endpoint: Option<String>,
    /// Deployment environment (e.g., "production")
    pub environment: Option<String>,
    pub enable_console: bool,
    /// Log filter (e.g., "info", "eventhook_worker=debug")
    pub log_filter: Option<String>,
    /// Zone the booking times are interpreted in, exported as a resource attribute
    pub time_zone: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "eventhook-worker".to_string(),
            service_version: None,
            otlp_endpoint: None,
            environment: None,
            enable_console: true,
            log_filter: None,
            time_zone: None,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `OTEL_SERVICE_NAME`: Service name (default: "eventhook-worker")
    /// - `OTEL_SERVICE_VERSION`: Service version
    /// - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint
    /// - `OTEL_ENVIRONMENT`: Deployment environment
    /// - `RUST_LOG` or `LOG_LEVEL`: Log filter
    /// - `APP_TIME_ZONE`: Booking time zone
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| "eventhook-worker".to_string()),
            service_version: std::env::var("OTEL_SERVICE_VERSION").ok(),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            environment: std::env::var("OTEL_ENVIRONMENT").ok(),
            enable_console: true,
            log_filter: std::env::var("RUST_LOG")
                .ok()
                .or_else(|| std::env::var("LOG_LEVEL").ok()),
            time_zone: std::env::var("APP_TIME_ZONE")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        }
    }

    pub fn with_service_version(mut self, version: impl Into<String>) -> Self {
        self.service_version = Some(version.into());
        self
    }

    pub fn with_time_zone(mut self, zone: impl Into<String>) -> Self {
        self.time_zone = Some(zone.into());
        self
    }

    /// OTel resource attributes describing this worker
    pub fn resource_attributes(&self) -> Vec<KeyValue> {
        let mut attrs = vec![KeyValue::new("service.name", self.service_name.clone())];
        if let Some(version) = &self.service_version {
            attrs.push(KeyValue::new("service.version", version.clone()));
        }
        if let Some(env) = &self.environment {
            attrs.push(KeyValue::new("deployment.environment", env.clone()));
        }
        if let Some(zone) = &self.time_zone {
            attrs.push(KeyValue::new(TIME_ZONE_ATTRIBUTE, zone.clone()));
        }
        attrs
    }

    fn filter(&self) -> EnvFilter {
        self.log_filter
            .as_ref()
            .and_then(|f| EnvFilter::try_new(f).ok())
            .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Shuts the tracer provider down on drop, flushing pending spans
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.provider.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("Failed to shutdown tracer provider: {:?}", e);
            }
        }
    }
}

/// Install the global subscriber. Keep the returned guard alive until exit.
///
/// ```ignore
/// use eventhook_core::telemetry::{init_telemetry, TelemetryConfig};
///
/// let _guard = init_telemetry(TelemetryConfig::from_env());
/// ```
pub fn init_telemetry(config: TelemetryConfig) -> TelemetryGuard {
    let resource = Resource::builder()
        .with_attributes(config.resource_attributes())
        .build();

    let console_layer = if config.enable_console {
        Some(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_filter(config.filter()),
        )
    } else {
        None
    };

    let (tracer_provider, otel_layer, otel_status) = match &config.otlp_endpoint {
        Some(endpoint) => match build_otlp_tracer(endpoint, resource) {
            Ok((provider, tracer)) => {
                let layer = tracing_opentelemetry::layer().with_tracer(tracer);
                (Some(provider), Some(layer), Some(Ok(endpoint.clone())))
            }
            Err(e) => (None, None, Some(Err(e.to_string()))),
        },
        None => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(otel_layer)
        .init();

    // Reported only now that the subscriber exists
    match otel_status {
        Some(Ok(endpoint)) => {
            tracing::info!(endpoint = %endpoint, "OpenTelemetry tracing enabled");
        }
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Failed to initialize OTLP tracer, continuing without tracing");
        }
        None => {
            tracing::debug!("OpenTelemetry tracing disabled: OTEL_EXPORTER_OTLP_ENDPOINT not set");
        }
    }

    TelemetryGuard {
        provider: tracer_provider,
    }
}

fn build_otlp_tracer(
    endpoint: &str,
    resource: Resource,
) -> Result<(SdkTracerProvider, opentelemetry_sdk::trace::Tracer), opentelemetry::trace::TraceError>
{
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(Duration::from_secs(10))
        .build()?;

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(Sampler::AlwaysOn)
        .with_id_generator(RandomIdGenerator::default())
        .with_resource(resource)
        .build();

    let tracer = provider.tracer("eventhook");

    Ok((provider, tracer))
}

// ============================================================================
// Span Helpers
// ============================================================================

/// Exported name of a scan cycle span, e.g. "scan start"
pub fn scan_span_name(transition: impl Display) -> String {
    format!("scan {}", transition)
}

/// Exported name of a notification job span, e.g. "notify EVENT_END"
pub fn job_span_name(kind: impl Display) -> String {
    format!("notify {}", kind)
}

/// Root span of one scan cycle
pub fn scan_cycle_span(transition: impl Display, cycle_id: impl Display) -> Span {
    tracing::info_span!(
        "scan_cycle",
        otel.name = %scan_span_name(&transition),
        transition = %transition,
        cycle_id = %cycle_id
    )
}

/// Span of one notification job, tied to the cycle that produced it
pub fn notification_job_span(cycle_id: impl Display, kind: impl Display, user_id: &str) -> Span {
    tracing::info_span!(
        "notification_job",
        otel.name = %job_span_name(&kind),
        cycle_id = %cycle_id,
        kind = %kind,
        user_id = %user_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "eventhook-worker");
        assert!(config.otlp_endpoint.is_none());
        assert!(config.enable_console);
    }

    #[test]
    fn test_with_service_version() {
        let config = TelemetryConfig::default().with_service_version("1.2.3");
        assert_eq!(config.service_version.as_deref(), Some("1.2.3"));
    }

    #[test]
    fn test_resource_attributes() {
        let config = TelemetryConfig::default()
            .with_service_version("1.2.3")
            .with_time_zone("Europe/Rome");
        let attrs = config.resource_attributes();

        let value = |key: &str| {
            attrs
                .iter()
                .find(|kv| kv.key.as_str() == key)
                .map(|kv| kv.value.to_string())
        };
        assert_eq!(value("service.name").as_deref(), Some("eventhook-worker"));
        assert_eq!(value("service.version").as_deref(), Some("1.2.3"));
        assert_eq!(value(TIME_ZONE_ATTRIBUTE).as_deref(), Some("Europe/Rome"));
        assert!(value("deployment.environment").is_none());
    }

    #[test]
    fn test_span_names() {
        assert_eq!(scan_span_name("start"), "scan start");
        assert_eq!(job_span_name("EVENT_END"), "notify EVENT_END");
    }
}
