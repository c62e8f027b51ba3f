use base64::{engine::general_purpose, Engine};
use chrono::Duration;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

use crate::security::token_store::{Token, TokenStore};
use crate::utils::clock::Clock;

/// Raw bytes drawn per token (512 bits).
pub const TOKEN_BYTES: usize = 64;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("entropy source could not supply {requested} bytes: {reason}")]
    RandomGeneration { requested: usize, reason: String },

    #[error("expiry for a {ttl_secs}s lifetime is not representable")]
    ExpiryOutOfRange { ttl_secs: i64 },
}

/// Where token bytes come from.
pub trait EntropySource: Send + Sync + Debug {
    fn fill(&self, buf: &mut [u8]) -> Result<(), TokenError>;
}

/// Operating system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, buf: &mut [u8]) -> Result<(), TokenError> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|e| TokenError::RandomGeneration {
                requested: buf.len(),
                reason: e.to_string(),
            })
    }
}

/// Mints tokens and records them in the store before handing them out.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    store: TokenStore,
    clock: Arc<dyn Clock>,
    entropy: Arc<dyn EntropySource>,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(store: TokenStore, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self::with_entropy(store, clock, Arc::new(OsEntropy), ttl)
    }

    pub fn with_entropy(
        store: TokenStore,
        clock: Arc<dyn Clock>,
        entropy: Arc<dyn EntropySource>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            entropy,
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a fresh token. The store already recognizes it when this returns.
    #[instrument(name = "create-token", skip_all)]
    pub async fn create_token(&self) -> Result<Token, TokenError> {
        let mut raw = [0u8; TOKEN_BYTES];
        self.entropy.fill(&mut raw)?;

        let identifier = general_purpose::STANDARD.encode(raw);
        let issued_at = self.clock.now();
        let expires_at = issued_at
            .checked_add_signed(self.ttl)
            .ok_or(TokenError::ExpiryOutOfRange {
                ttl_secs: self.ttl.num_seconds(),
            })?;
        let token = Token {
            identifier: identifier.clone(),
            issued_at,
            expires_at,
        };

        self.store.insert(identifier, token.clone()).await;
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::ManualClock;
    use std::collections::HashSet;

    #[derive(Debug)]
    struct DryEntropy;

    impl EntropySource for DryEntropy {
        fn fill(&self, buf: &mut [u8]) -> Result<(), TokenError> {
            Err(TokenError::RandomGeneration {
                requested: buf.len(),
                reason: "exhausted".to_string(),
            })
        }
    }

    fn issuer(store: &TokenStore, clock: &ManualClock) -> TokenIssuer {
        TokenIssuer::new(store.clone(), Arc::new(clock.clone()), Duration::hours(1))
    }

    #[tokio::test]
    async fn test_create_token_registers_in_store() {
        let store = TokenStore::new();
        let clock = ManualClock::default();
        let token = issuer(&store, &clock).create_token().await.unwrap();

        let stored = store.lookup(&token.identifier).await.unwrap();
        assert_eq!(stored, token);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_token_shape() {
        let store = TokenStore::new();
        let clock = ManualClock::default();
        let token = issuer(&store, &clock).create_token().await.unwrap();

        // 64 bytes -> 88 padded base64 characters
        assert_eq!(token.identifier.len(), 88);
        let decoded = general_purpose::STANDARD.decode(&token.identifier).unwrap();
        assert_eq!(decoded.len(), TOKEN_BYTES);

        assert_eq!(token.issued_at, clock.now());
        assert_eq!(token.expires_at, clock.now() + Duration::hours(1));
    }

    #[tokio::test]
    async fn test_identifiers_are_unique() {
        let store = TokenStore::new();
        let clock = ManualClock::default();
        let issuer = issuer(&store, &clock);

        let mut seen = HashSet::new();
        for _ in 0..5000 {
            let token = issuer.create_token().await.unwrap();
            assert!(seen.insert(token.identifier));
        }
        assert_eq!(store.len().await, 5000);
    }

    #[tokio::test]
    async fn test_entropy_failure_inserts_nothing() {
        let store = TokenStore::new();
        let issuer = TokenIssuer::with_entropy(
            store.clone(),
            Arc::new(ManualClock::default()),
            Arc::new(DryEntropy),
            Duration::hours(1),
        );

        let err = issuer.create_token().await.unwrap_err();
        assert!(matches!(
            err,
            TokenError::RandomGeneration { requested: TOKEN_BYTES, .. }
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_unrepresentable_expiry_is_an_error() {
        let store = TokenStore::new();
        let issuer = TokenIssuer::new(
            store.clone(),
            Arc::new(ManualClock::default()),
            Duration::seconds(10_000_000_000_000),
        );

        let err = issuer.create_token().await.unwrap_err();
        assert!(matches!(
            err,
            TokenError::ExpiryOutOfRange { ttl_secs: 10_000_000_000_000 }
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_custom_ttl() {
        let store = TokenStore::new();
        let clock = ManualClock::default();
        let issuer = TokenIssuer::new(store, Arc::new(clock.clone()), Duration::minutes(5));

        let token = issuer.create_token().await.unwrap();
        assert_eq!(issuer.ttl(), Duration::minutes(5));
        assert_eq!(token.expires_at - token.issued_at, Duration::minutes(5));
    }
}
