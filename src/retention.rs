//! Periodic retention sweep (spec §4.3, component C3).
//!
//! Structurally the same fire-and-forget task as the teacher's
//! `retention_enforcer::spawn_retention_enforcer` — spawn, `tokio::time::interval`,
//! loop-and-log-on-error — generalised to run against the embedded store
//! instead of ClickHouse and to stop cleanly on a cancellation signal instead
//! of running forever.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::store::Store;

/// Spawns the retention loop as a background task. Returns its `JoinHandle`
/// so the caller can await a clean stop during shutdown.
pub fn spawn_retention_loop(
    store: Arc<Store>,
    cleanup_interval: Duration,
    retention: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match store.cleanup(retention).await {
                        Ok(deleted) => {
                            if deleted > 0 {
                                tracing::info!(deleted, "retention sweep removed expired rows");
                            }
                        }
                        Err(e) => tracing::error!("retention sweep failed: {e}"),
                    }
                }
                _ = cancel.cancelled() => {
                    // Shutdown: return without logging the expected cancellation.
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loop_stops_promptly_on_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("t.db")).await.unwrap());
        let cancel = CancellationToken::new();
        let handle = spawn_retention_loop(
            store,
            Duration::from_secs(3600),
            Duration::from_secs(3600),
            cancel.clone(),
        );
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("retention loop should stop promptly after cancellation")
            .unwrap();
    }
}
