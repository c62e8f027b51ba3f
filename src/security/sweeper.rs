use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::security::audit_log::AuditLogger;
use crate::security::token_store::TokenStore;
use crate::utils::clock::Clock;

/// Run one purge pass and return how many tokens were dropped.
pub async fn sweep_once(store: &TokenStore, clock: &dyn Clock, audit: &AuditLogger) -> usize {
    let removed = store.purge_expired(clock.now()).await;
    if removed > 0 {
        audit.tokens_purged(removed, store.len().await);
    } else {
        debug!("sweep found no expired tokens");
    }
    removed
}

/// Periodically drop expired tokens so unused ones do not pile up.
///
/// The first pass runs one full `interval` after spawning.
pub fn spawn_sweeper(
    store: TokenStore,
    clock: Arc<dyn Clock>,
    interval: Duration,
) -> JoinHandle<()> {
    let audit = AuditLogger::new();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            sweep_once(&store, clock.as_ref(), &audit).await;
        }
    })
}
