//! OpenTelemetry integration for distributed tracing
//!
//! Bridges `tracing` spans to an OTLP collector when enabled. Without it the
//! subscriber is the plain or JSON formatter from `common::logging`.

use common::{Error, Result};
use opentelemetry::{KeyValue, trace::TracerProvider as _};
use opentelemetry_sdk::{
    Resource, runtime,
    trace::{RandomIdGenerator, Sampler, TracerProvider},
};
use tracing_subscriber::{Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// OpenTelemetry tracer guard
///
/// When dropped, flushes all pending spans and shuts down the tracer
pub struct TelemetryGuard;

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        opentelemetry::global::shutdown_tracer_provider();
    }
}

/// Build the OTLP (gRPC) tracer provider and install it globally
pub fn init_telemetry(service_name: &str, otlp_endpoint: &str) -> Result<TracerProvider> {
    use opentelemetry_otlp::WithExportConfig;

    tracing::info!(
        service_name = service_name,
        otlp_endpoint = otlp_endpoint,
        "Initializing OpenTelemetry tracing"
    );

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(otlp_endpoint)
        .build()
        .map_err(Error::other)?;

    let resource = Resource::new(vec![
        KeyValue::new("service.name", service_name.to_string()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION").to_string()),
    ]);

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(resource),
        )
        .build();

    opentelemetry::global::set_tracer_provider(provider.clone());

    Ok(provider)
}

/// Setup tracing-subscriber, with an OpenTelemetry layer when enabled.
///
/// `RUST_LOG` overrides `log_level`; `format` selects plain or JSON output.
pub fn setup_tracing(
    service_name: &str,
    otlp_endpoint: &str,
    enabled: bool,
    log_level: &str,
    format: Option<&str>,
) -> Result<Option<TelemetryGuard>> {
    if !enabled {
        common::logging::init_with_format(log_level, format);
        tracing::info!("Tracing initialized without OpenTelemetry");
        return Ok(None);
    }

    let provider = init_telemetry(service_name, otlp_endpoint)?;
    let telemetry_layer =
        tracing_opentelemetry::layer().with_tracer(provider.tracer("healthcheck-proxy-server"));

    let fmt_layer = match format {
        Some(f) if f.eq_ignore_ascii_case("json") => {
            tracing_subscriber::fmt::layer().json().boxed()
        }
        _ => tracing_subscriber::fmt::layer().boxed(),
    };

    tracing_subscriber::registry()
        .with(common::logging::env_filter(log_level))
        .with(fmt_layer)
        .with(telemetry_layer)
        .init();

    tracing::info!("Tracing initialized with OpenTelemetry integration");
    Ok(Some(TelemetryGuard))
}
