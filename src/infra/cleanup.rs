//! Periodic sweep removing expired refresh-token rows.
//!
//! Safe to interleave with active rotations: rotation's expiry check
//! already rejects anything this sweep would delete, so a row removed
//! here and a row expired-and-rejected by rotation look identical to
//! callers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::store::CredentialStore;

/// Spawns the sweep task. The first tick fires immediately, so one pass
/// always runs at startup; after that it runs every `every`. Dropping a
/// `true` into `shutdown` stops the task.
pub fn spawn_token_cleanup(
    store: Arc<dyn CredentialStore>,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    match store.delete_expired_tokens().await {
                        Ok(0) => {}
                        Ok(removed) => {
                            tracing::info!(removed, "expired refresh tokens deleted");
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "token cleanup failed; retrying next tick");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    tracing::debug!("token cleanup stopped");
                    break;
                }
            }
        }
    })
}
