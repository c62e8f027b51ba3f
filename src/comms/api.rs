use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{middleware, Extension, Json, Router};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::timeout::{RequestBodyTimeoutLayer, TimeoutBody, TimeoutLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info_span, instrument};
use uuid::Uuid;

use crate::app::config::Config;
use crate::security::audit_log::AuditLogger;
use crate::security::gate::{require_bearer, AuthGate, Authenticated};
use crate::security::issuer::TokenIssuer;
use crate::security::token_store::TokenStore;
use crate::utils::clock::{Clock, SystemClock};

pub type SharedState = Arc<AppState>;

/// Everything the handlers share. Built once at startup.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: TokenStore,
    pub clock: Arc<dyn Clock>,
    pub issuer: TokenIssuer,
    pub gate: AuthGate,
    pub audit: AuditLogger,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: Arc<Config>, clock: Arc<dyn Clock>) -> Self {
        let store = TokenStore::new();
        let issuer = TokenIssuer::new(store.clone(), clock.clone(), config.token.ttl());
        Self::from_parts(config, store, clock, issuer)
    }

    /// Assemble state around an existing issuer; it must write into `store`.
    pub fn from_parts(
        config: Arc<Config>,
        store: TokenStore,
        clock: Arc<dyn Clock>,
        issuer: TokenIssuer,
    ) -> Self {
        let gate = AuthGate::new(store.clone(), clock.clone());
        Self {
            config,
            store,
            clock,
            issuer,
            gate,
            audit: AuditLogger::new(),
        }
    }
}

/// One row of the route table printed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteInfo {
    pub method: &'static str,
    pub path: &'static str,
    pub middlewares: usize,
}

/// Routes registered by [`create_router`], with the number of route-specific
/// middlewares each one passes through.
pub const ROUTES: &[RouteInfo] = &[
    RouteInfo { method: "POST", path: "/api/token", middlewares: 0 },
    RouteInfo { method: "GET", path: "/api/healthz", middlewares: 0 },
    RouteInfo { method: "POST", path: "/api/compute", middlewares: 1 },
];

// Liveness
async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn create_token(State(state): State<SharedState>) -> Response {
    match state.issuer.create_token().await {
        Ok(token) => {
            state.audit.token_issued(&token.identifier, token.expires_at);
            Json(token).into_response()
        }
        Err(e) => {
            error!("failed to issue token: {}", e);
            state.audit.internal_error(&e.to_string());
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// Placeholder for the protected business operation.
#[instrument(name = "provision-compute", skip_all)]
async fn provision_compute(Extension(_auth): Extension<Authenticated>) -> &'static str {
    "Provisioning!\n"
}

pub fn create_router(state: SharedState) -> Router {
    let protected = Router::new()
        .route("/compute", post(provision_compute))
        .route_layer(middleware::from_fn_with_state(
            state.gate.clone(),
            require_bearer,
        ));

    let api = Router::new()
        .route("/token", post(create_token))
        .route("/healthz", get(healthz))
        .merge(protected);

    // Body reads are bounded by the read timeout, handler processing by the
    // write timeout (408 on expiry).
    let timeouts = ServiceBuilder::new()
        .layer(RequestBodyTimeoutLayer::new(state.config.server.read_timeout()))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            state.config.server.write_timeout(),
        ))
        .map_request(unwrap_timeout_body);

    Router::new()
        .nest("/api", api)
        .layer(timeouts)
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            info_span!(
                "request",
                method = %request.method(),
                path = %request.uri().path(),
                request_id = %Uuid::new_v4(),
            )
        }))
        .with_state(state)
}

fn unwrap_timeout_body(request: Request<TimeoutBody<Body>>) -> Request {
    request.map(Body::new)
}
