use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

/// Structured audit events, emitted under the `audit` target.
///
/// Identifiers are never logged in full; only a short prefix is kept so log
/// readers can correlate events without being handed a usable credential.
#[derive(Debug, Clone, Default)]
pub struct AuditLogger;

impl AuditLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn token_issued(&self, identifier: &str, expires_at: DateTime<Utc>) {
        info!(target: "audit", event = "token_issued", token = fingerprint(identifier), %expires_at);
    }

    pub fn access_granted(&self, identifier: &str) {
        info!(target: "audit", event = "access_granted", token = fingerprint(identifier));
    }

    pub fn access_denied(&self, identifier: Option<&str>, reason: &str) {
        warn!(target: "audit", event = "access_denied", token = identifier.map(fingerprint).unwrap_or(""), reason);
    }

    pub fn tokens_purged(&self, removed: usize, remaining: usize) {
        info!(target: "audit", event = "tokens_purged", removed, remaining);
    }

    pub fn internal_error(&self, error_msg: &str) {
        error!(target: "audit", event = "internal_error", error = error_msg);
    }
}

fn fingerprint(identifier: &str) -> &str {
    let end = identifier
        .char_indices()
        .nth(8)
        .map(|(i, _)| i)
        .unwrap_or(identifier.len());
    &identifier[..end]
}
