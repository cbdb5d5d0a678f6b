//! Background task that reindexes documents as they become due.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crossref_types::DocumentId;

use crate::engine::CrossrefEngine;

/// Drives the change collector.
///
/// Reindexes on every timer key received, and sweeps all due documents
/// once per `max_delay` to catch timers lost to a restart or a deferral.
pub struct CollectorDriver {
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl CollectorDriver {
    /// Start driving `engine` from the receiver returned by
    /// [`TokioTimerScheduler::new`](crossref_scheduler::TokioTimerScheduler::new).
    pub fn spawn(engine: CrossrefEngine, mut due: mpsc::UnboundedReceiver<DocumentId>) -> Self {
        let sweep_every = engine
            .collector()
            .config()
            .max_delay
            .max(Duration::from_secs(1));
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();

        let handle = tokio::spawn(async move {
            let mut sweep = tokio::time::interval(sweep_every);
            sweep.tick().await;
            info!(sweep_secs = sweep_every.as_secs(), "Collector driver started");
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    key = due.recv() => {
                        let Some(document_id) = key else { break };
                        debug!(document_id = %document_id, "Reindex timer fired");
                        engine.reindex_due().await;
                    }
                    _ = sweep.tick() => {
                        let done = engine.reindex_due().await;
                        if !done.is_empty() {
                            debug!(count = done.len(), "Sweep reindexed documents");
                        }
                    }
                }
            }
            info!("Collector driver stopped");
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Stop after the reindex in progress, if any.
    pub async fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for CollectorDriver {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{fixture, notes};
    use crate::query::SearchFilters;

    #[tokio::test]
    async fn test_timer_key_triggers_reindex() {
        let f = fixture().await;
        let id = f.engine.register_document(&notes()).await.unwrap().document_id;
        let mut edited = notes().with_id(id.as_str());
        edited.nodes[1].body = "beta about walruses".into();
        f.engine.register_document(&edited).await.unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let driver = CollectorDriver::spawn(f.engine.clone(), rx);
        f.clock.advance(Duration::from_secs(60));
        tx.send(id.clone()).unwrap();

        let mut hits = Vec::new();
        for _ in 0..100 {
            hits = f
                .engine
                .search("walruses", &SearchFilters::default())
                .await
                .unwrap();
            if !hits.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(hits.len(), 1);
        assert!(!f.engine.collector().is_dirty(&id));
        driver.stop().await;
    }

    #[tokio::test]
    async fn test_stops_when_sender_dropped() {
        let f = fixture().await;
        let (tx, rx) = mpsc::unbounded_channel::<DocumentId>();
        let mut driver = CollectorDriver::spawn(f.engine.clone(), rx);
        drop(tx);
        let handle = driver.handle.take().unwrap();
        handle.await.unwrap();
    }
}
