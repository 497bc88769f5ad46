//! Logging and optional OpenTelemetry export

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Boxed layer so the formatter and exporter can be chosen at runtime
type BoxedLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>;

const DEFAULT_FILTER: &str = "queuedeck=info,tower_http=info";

/// Install the global subscriber
///
/// # Environment Variables
///
/// - `RUST_LOG`: filter directives (default: `queuedeck=info`)
/// - `QUEUEDECK_LOG_FORMAT`: `json` for structured logs, anything else for pretty output
/// - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (e.g., http://localhost:4317);
///   requires the `telemetry` feature
/// - `OTEL_SERVICE_NAME`: Service name (default: queuedeck)
pub fn init_logging() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;

    let log_format = std::env::var("QUEUEDECK_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let fmt_layer: BoxedLayer = match log_format.as_str() {
        // Production: JSON structured logging
        "json" => fmt::layer().json().boxed(),
        // Development: Pretty formatting with colors
        _ => fmt::layer().pretty().boxed(),
    };

    let mut layers = vec![fmt_layer];
    let otel_requested = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok();
    let otel_error = match otel_layer(otel_requested) {
        Ok(Some(layer)) => {
            layers.push(layer);
            None
        }
        Ok(None) => None,
        Err(e) => Some(e),
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()?;

    if let Some(e) = otel_error {
        tracing::warn!(error = ?e, "Failed to initialize OpenTelemetry (continuing without it)");
    }
    #[cfg(not(feature = "telemetry"))]
    if otel_requested {
        tracing::warn!("OpenTelemetry endpoint set but feature 'telemetry' not enabled");
    }
    Ok(())
}

#[cfg(not(feature = "telemetry"))]
fn otel_layer(_requested: bool) -> Result<Option<BoxedLayer>> {
    Ok(None)
}

#[cfg(feature = "telemetry")]
fn otel_layer(requested: bool) -> Result<Option<BoxedLayer>> {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime, trace::TracerProvider, Resource};

    if !requested {
        return Ok(None);
    }

    let service_name =
        std::env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "queuedeck".to_string());
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&endpoint)
        .build()?;
    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_resource(Resource::new(vec![KeyValue::new(
            "service.name",
            service_name.clone(),
        )]))
        .build();
    let tracer = provider.tracer(service_name);
    opentelemetry::global::set_tracer_provider(provider);

    Ok(Some(tracing_opentelemetry::layer().with_tracer(tracer).boxed()))
}

/// Flush pending spans before exit
pub fn shutdown() {
    #[cfg(feature = "telemetry")]
    opentelemetry::global::shutdown_tracer_provider();
}
