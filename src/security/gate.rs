use axum::extract::{Request, State};
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

use crate::security::audit_log::AuditLogger;
use crate::security::token_store::TokenStore;
use crate::utils::clock::Clock;

const BEARER_PREFIX: &str = "Bearer ";

/// Why a request was turned away. Only ever logged; every variant renders
/// as the same bare 403.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("no bearer credential presented")]
    MissingCredential,
    #[error("token not recognized")]
    UnknownToken,
    #[error("token expired")]
    ExpiredToken,
}

impl Rejection {
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::MissingCredential => "missing_credential",
            Rejection::UnknownToken => "unknown_token",
            Rejection::ExpiredToken => "expired_token",
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        StatusCode::FORBIDDEN.into_response()
    }
}

/// Identifier of the token that admitted the request, attached as a request
/// extension for downstream handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated(pub String);

/// Admission check in front of protected routes.
#[derive(Debug, Clone)]
pub struct AuthGate {
    store: TokenStore,
    clock: Arc<dyn Clock>,
    audit: AuditLogger,
}

impl AuthGate {
    pub fn new(store: TokenStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            audit: AuditLogger::new(),
        }
    }

    /// Resolve the bearer token in `headers` to a live identifier.
    ///
    /// An expired entry is evicted on the way out.
    #[instrument(name = "auth-gate", skip_all)]
    pub async fn authorize(&self, headers: &HeaderMap) -> Result<String, Rejection> {
        let Some(identifier) = bearer_token(headers) else {
            self.audit
                .access_denied(None, Rejection::MissingCredential.reason());
            return Err(Rejection::MissingCredential);
        };

        let Some(token) = self.store.lookup(identifier).await else {
            self.audit
                .access_denied(Some(identifier), Rejection::UnknownToken.reason());
            return Err(Rejection::UnknownToken);
        };

        let now = self.clock.now();
        if token.is_expired_at(now) {
            self.store.evict_expired(identifier, now).await;
            self.audit
                .access_denied(Some(identifier), Rejection::ExpiredToken.reason());
            return Err(Rejection::ExpiredToken);
        }

        self.audit.access_granted(identifier);
        Ok(token.identifier)
    }
}

/// Extract `<identifier>` from `Authorization: Bearer <identifier>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix(BEARER_PREFIX)
        .filter(|id| !id.is_empty())
}

/// Middleware wrapping protected routes with [`AuthGate`].
pub async fn require_bearer(
    State(gate): State<AuthGate>,
    mut request: Request,
    next: Next,
) -> Response {
    match gate.authorize(request.headers()).await {
        Ok(identifier) => {
            request.extensions_mut().insert(Authenticated(identifier));
            next.run(request).await
        }
        Err(rejection) => rejection.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::issuer::TokenIssuer;
    use crate::utils::clock::ManualClock;
    use axum::http::HeaderValue;
    use chrono::Duration;

    fn setup() -> (TokenStore, ManualClock, TokenIssuer, AuthGate) {
        let store = TokenStore::new();
        let clock = ManualClock::default();
        let issuer = TokenIssuer::new(store.clone(), Arc::new(clock.clone()), Duration::hours(1));
        let gate = AuthGate::new(store.clone(), Arc::new(clock.clone()));
        (store, clock, issuer, gate)
    }

    fn bearer(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&bearer("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(&bearer("Bearer a+b/c==")), Some("a+b/c=="));
        assert_eq!(bearer_token(&bearer("Basic abc")), None);
        assert_eq!(bearer_token(&bearer("Bearer")), None);
        assert_eq!(bearer_token(&bearer("abc")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_rejection_renders_bare_403() {
        for rejection in [
            Rejection::MissingCredential,
            Rejection::UnknownToken,
            Rejection::ExpiredToken,
        ] {
            assert_eq!(rejection.into_response().status(), StatusCode::FORBIDDEN);
        }
    }

    #[tokio::test]
    async fn test_fresh_token_admitted() {
        let (_, _, issuer, gate) = setup();
        let token = issuer.create_token().await.unwrap();

        let admitted = gate
            .authorize(&bearer(&format!("Bearer {}", token.identifier)))
            .await
            .unwrap();
        assert_eq!(admitted, token.identifier);
    }

    #[tokio::test]
    async fn test_missing_header_rejected() {
        let (_, _, _, gate) = setup();
        assert_eq!(
            gate.authorize(&HeaderMap::new()).await,
            Err(Rejection::MissingCredential)
        );
        assert_eq!(
            gate.authorize(&bearer("Token abc")).await,
            Err(Rejection::MissingCredential)
        );
    }

    #[tokio::test]
    async fn test_unknown_token_rejected() {
        let (_, _, _, gate) = setup();
        let never_issued = "A".repeat(86) + "==";
        assert_eq!(
            gate.authorize(&bearer(&format!("Bearer {never_issued}"))).await,
            Err(Rejection::UnknownToken)
        );
    }

    #[tokio::test]
    async fn test_token_valid_just_before_ttl() {
        let (_, clock, issuer, gate) = setup();
        let token = issuer.create_token().await.unwrap();
        let headers = bearer(&format!("Bearer {}", token.identifier));

        clock.advance(Duration::hours(1) - Duration::milliseconds(1));
        assert!(gate.authorize(&headers).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_token_rejected_and_evicted() {
        let (store, clock, issuer, gate) = setup();
        let token = issuer.create_token().await.unwrap();
        let headers = bearer(&format!("Bearer {}", token.identifier));

        clock.advance(Duration::hours(1) + Duration::milliseconds(1));
        assert_eq!(gate.authorize(&headers).await, Err(Rejection::ExpiredToken));
        assert!(store.lookup(&token.identifier).await.is_none());

        // Once evicted the token is simply unknown.
        assert_eq!(gate.authorize(&headers).await, Err(Rejection::UnknownToken));
    }

    #[tokio::test]
    async fn test_token_rejected_exactly_at_expiry() {
        let (_, clock, issuer, gate) = setup();
        let token = issuer.create_token().await.unwrap();

        clock.set(token.expires_at);
        assert_eq!(
            gate.authorize(&bearer(&format!("Bearer {}", token.identifier)))
                .await,
            Err(Rejection::ExpiredToken)
        );
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(Rejection::MissingCredential.reason(), "missing_credential");
        assert_eq!(Rejection::UnknownToken.reason(), "unknown_token");
        assert_eq!(Rejection::ExpiredToken.reason(), "expired_token");
    }
}
