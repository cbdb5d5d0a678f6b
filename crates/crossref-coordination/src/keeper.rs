//! Background heartbeat for a held lease.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::manager::LeaseManager;

/// Keeps a lease alive while long work runs.
///
/// Dropping or calling [`stop`](LeaseKeeper::stop) ends the heartbeat but
/// does not release the lease. If the lease is lost, [`lost`](LeaseKeeper::lost)
/// is cancelled so the work can stop early.
pub struct LeaseKeeper {
    shutdown: CancellationToken,
    lost: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl LeaseKeeper {
    /// Start heartbeating `scope` every `heartbeat_interval`. Must be
    /// called inside a tokio runtime.
    pub fn start(manager: LeaseManager, scope: String, holder_id: String) -> Self {
        let shutdown = CancellationToken::new();
        let lost = CancellationToken::new();
        let interval = manager.config().heartbeat_interval;

        let token = shutdown.clone();
        let lost_token = lost.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(scope = %scope, "Lease keeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match manager.heartbeat(&scope, &holder_id) {
                            Ok(true) => debug!(scope = %scope, "Lease heartbeat"),
                            Ok(false) => {
                                warn!(scope = %scope, holder_id = %holder_id, "Lease lost");
                                lost_token.cancel();
                                break;
                            }
                            Err(e) => {
                                error!(scope = %scope, error = %e, "Lease heartbeat failed");
                            }
                        }
                    }
                }
            }
        });

        Self {
            shutdown,
            lost,
            handle: Some(handle),
        }
    }

    /// Cancelled once the lease has been taken by another instance.
    pub fn lost(&self) -> CancellationToken {
        self.lost.clone()
    }

    pub fn is_lost(&self) -> bool {
        self.lost.is_cancelled()
    }

    /// Stop heartbeating and wait for the task to finish.
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for LeaseKeeper {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::LeaseConfig;
    use crate::store::MemoryLeaseStore;
    use crossref_scheduler::FakeClock;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_keeper_refreshes_heartbeat() {
        let clock = FakeClock::default();
        let manager = LeaseManager::new(
            Arc::new(MemoryLeaseStore::new()),
            Arc::new(clock.clone()),
            LeaseConfig::default(),
        );
        manager.try_acquire("index:D1", "a").unwrap();
        let keeper = LeaseKeeper::start(manager.clone(), "index:D1".into(), "a".into());

        clock.advance(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(11)).await;
        let lease = manager.current("index:D1").unwrap().unwrap();
        assert_eq!(lease.heartbeat_at, clock.now());

        keeper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeper_reports_loss() {
        let clock = FakeClock::default();
        let manager = LeaseManager::new(
            Arc::new(MemoryLeaseStore::new()),
            Arc::new(clock.clone()),
            LeaseConfig::default(),
        );
        manager.try_acquire("index:D1", "a").unwrap();
        let keeper = LeaseKeeper::start(manager.clone(), "index:D1".into(), "a".into());

        clock.advance(Duration::from_secs(16));
        assert!(manager.try_acquire("index:D1", "b").unwrap().is_held());

        let lost = keeper.lost();
        tokio::time::timeout(Duration::from_secs(30), lost.cancelled())
            .await
            .unwrap();
        assert!(keeper.is_lost());
    }
}
