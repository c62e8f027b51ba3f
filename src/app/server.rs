use anyhow::{Context, Result};
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, info};

use crate::app::config::Config;
use crate::comms::api::{create_router, AppState, ROUTES};
use crate::security::sweeper::spawn_sweeper;
use crate::utils::telemetry;

pub fn log_routes() {
    for route in ROUTES {
        info!(
            method = route.method,
            path = route.path,
            middlewares = route.middlewares,
            "route registered"
        );
    }
}

/// Bind, serve until SIGINT/SIGTERM, then drain in-flight requests and flush
/// any buffered spans.
pub async fn serve(config: Config, tracer_provider: Option<SdkTracerProvider>) -> Result<()> {
    debug!(?config, "effective configuration");
    let address = config.server.bind_address();
    let sweep_interval = config.token.sweep_interval();

    let state = Arc::new(AppState::new(Arc::new(config)));

    let sweeper = sweep_interval.map(|interval| {
        info!(interval_secs = interval.as_secs(), "token sweeper started");
        spawn_sweeper(state.store.clone(), state.clock.clone(), interval)
    });

    let app = create_router(state);
    log_routes();

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("binding {address}"))?;
    info!("HTTP server listening on {}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    if let Some(handle) = sweeper {
        handle.abort();
        let _ = handle.await; // cancellation error expected
    }

    if let Some(provider) = tracer_provider {
        telemetry::shutdown(provider).await;
    }

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining connections");
}
