use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A single grant of access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Token {
    #[serde(rename = "data")]
    pub identifier: String,
    #[serde(skip)]
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// A token is dead at its expiry instant, not after it.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// In-memory map of live tokens keyed by identifier.
///
/// Clones share the same map. Lookups take the read lock and run in parallel;
/// inserts and removals take the write lock, so an insert and a lookup on the
/// same identifier are always ordered.
#[derive(Debug, Clone, Default)]
pub struct TokenStore {
    tokens: Arc<RwLock<HashMap<String, Token>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the token, replacing any entry with the same identifier.
    pub async fn insert(&self, identifier: String, token: Token) {
        let mut tokens = self.tokens.write().await;
        tokens.insert(identifier, token);
    }

    /// Expiry is not interpreted here; callers decide what a stale entry means.
    pub async fn lookup(&self, identifier: &str) -> Option<Token> {
        let tokens = self.tokens.read().await;
        tokens.get(identifier).cloned()
    }

    pub async fn remove(&self, identifier: &str) {
        let mut tokens = self.tokens.write().await;
        tokens.remove(identifier);
    }

    /// Remove `identifier` only if it is still present and expired at `now`.
    ///
    /// The check and the removal happen under one write lock, so an entry
    /// re-inserted between a caller's lookup and this call survives.
    pub async fn evict_expired(&self, identifier: &str, now: DateTime<Utc>) -> bool {
        let mut tokens = self.tokens.write().await;
        match tokens.get(identifier) {
            Some(token) if token.is_expired_at(now) => {
                tokens.remove(identifier);
                true
            }
            _ => false,
        }
    }

    /// Drop every entry expired at `now`, returning how many were removed.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, token| !token.is_expired_at(now));
        before - tokens.len()
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }
}
