use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing::Subscriber;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use crate::utils::telemetry::SERVICE_NAME;

/// Install the global subscriber. `RUST_LOG` overrides the default `info` filter.
/// With a tracer provider, spans are also exported over OTLP.
pub fn init(json: bool, tracer_provider: Option<&SdkTracerProvider>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(otel_layer(tracer_provider))
            .with(fmt::layer().json().with_current_span(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(otel_layer(tracer_provider))
            .with(fmt::layer().with_target(false))
            .init();
    }
}

fn otel_layer<S>(tracer_provider: Option<&SdkTracerProvider>) -> Option<impl Layer<S>>
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    tracer_provider
        .map(|provider| tracing_opentelemetry::layer().with_tracer(provider.tracer(SERVICE_NAME)))
}
