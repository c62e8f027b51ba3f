use anyhow::{Context, Result};
use opentelemetry::KeyValue;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use std::time::Duration;
use tracing::{info, warn};

pub const SERVICE_NAME: &str = "token-service";

/// Upper bound on flushing buffered spans at exit.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a batching OTLP/HTTP tracer provider for `endpoint`.
///
/// No connection is made here; an unreachable collector only costs dropped
/// spans at export time.
pub fn init_provider(endpoint: &str, environment: &str) -> Result<SdkTracerProvider> {
    let exporter = SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .with_context(|| format!("building OTLP span exporter for {endpoint}"))?;

    let resource = Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_attributes([KeyValue::new("environment", environment.to_string())])
        .build();

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}

/// Flush and stop the provider without letting a stuck collector hold up exit.
pub async fn shutdown(provider: SdkTracerProvider) {
    let flush = tokio::task::spawn_blocking(move || provider.shutdown());
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, flush).await {
        Ok(Ok(Ok(()))) => info!("trace exporter flushed"),
        Ok(Ok(Err(e))) => warn!("trace exporter shutdown failed: {}", e),
        Ok(Err(e)) => warn!("trace exporter shutdown task failed: {}", e),
        Err(_) => warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "trace exporter shutdown timed out"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_without_collector() {
        let provider = init_provider("http://127.0.0.1:9/v1/traces", "test").unwrap();

        let rt = tokio::runtime::Runtime::new().unwrap();
        let started = std::time::Instant::now();
        rt.block_on(shutdown(provider));
        assert!(started.elapsed() < SHUTDOWN_TIMEOUT + Duration::from_secs(1));
    }
}
