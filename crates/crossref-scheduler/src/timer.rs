//! "Run this later" abstraction for debounced reindex triggers.
//!
//! [`TokioTimerScheduler`] sleeps on the runtime and reports due keys on a
//! channel. [`ManualTimerScheduler`] only records requests, so debounce
//! logic can be tested without waiting.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crossref_types::DocumentId;

pub trait TimerScheduler: Send + Sync {
    /// Fire `key` after `delay`, replacing any pending timer for it.
    fn schedule_after(&self, key: DocumentId, delay: Duration);

    /// Drop the pending timer for `key`, if any.
    fn cancel(&self, key: &DocumentId);
}

/// Timer backed by `tokio::time::sleep`. Must be used inside a runtime.
pub struct TokioTimerScheduler {
    tx: mpsc::UnboundedSender<DocumentId>,
    pending: Mutex<HashMap<DocumentId, CancellationToken>>,
    shutdown: CancellationToken,
}

impl TokioTimerScheduler {
    /// Create the scheduler and the receiver on which due keys arrive.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DocumentId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            tx,
            pending: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        };
        (scheduler, rx)
    }

    /// Cancel every pending timer.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl TimerScheduler for TokioTimerScheduler {
    fn schedule_after(&self, key: DocumentId, delay: Duration) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let token = self.shutdown.child_token();
        if let Some(previous) = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), token.clone())
        {
            previous.cancel();
        }

        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    debug!(document_id = %key, "Timer fired");
                    let _ = tx.send(key);
                }
            }
        });
    }

    fn cancel(&self, key: &DocumentId) {
        if let Some(token) = self
            .pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key)
        {
            token.cancel();
        }
    }
}

impl Drop for TokioTimerScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Timer that records requests and never fires by itself.
#[derive(Default)]
pub struct ManualTimerScheduler {
    pending: Mutex<BTreeMap<DocumentId, Duration>>,
}

impl ManualTimerScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Currently scheduled delay for `key`.
    pub fn pending(&self, key: &DocumentId) -> Option<Duration> {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .copied()
    }

    /// Remove and return all scheduled keys.
    pub fn take_all(&self) -> BTreeMap<DocumentId, Duration> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl TimerScheduler for ManualTimerScheduler {
    fn schedule_after(&self, key: DocumentId, delay: Duration) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, delay);
    }

    fn cancel(&self, key: &DocumentId) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }
}
