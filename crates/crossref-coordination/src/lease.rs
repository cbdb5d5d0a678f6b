//! Lease records and acquisition outcomes.

use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crossref_scheduler::to_delta;
use crossref_types::{DocumentId, LeaseSettings};

/// Scope serializing reindexing of one document.
pub fn index_scope(document_id: &DocumentId) -> String {
    format!("index:{}", document_id)
}

/// Scope serializing identity decisions for one document id.
pub fn identity_scope(document_id: &DocumentId) -> String {
    format!("identity:{}", document_id)
}

/// A time-bounded claim by one instance on a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub scope: String,
    pub holder_id: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub acquired_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub heartbeat_at: DateTime<Utc>,
}

impl Lease {
    /// Timestamps are truncated to milliseconds, the stored precision.
    pub fn new(scope: impl Into<String>, holder_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        let now = now.trunc_subsecs(3);
        Self {
            scope: scope.into(),
            holder_id: holder_id.into(),
            acquired_at: now,
            heartbeat_at: now,
        }
    }

    /// Stale once strictly more than `timeout` has passed since the last
    /// heartbeat.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.heartbeat_at > to_delta(timeout)
    }

    /// Copy with the heartbeat moved to `now`.
    pub fn refreshed(&self, now: DateTime<Utc>) -> Self {
        Self {
            heartbeat_at: now.trunc_subsecs(3),
            ..self.clone()
        }
    }

    pub fn is_held_by(&self, holder_id: &str) -> bool {
        self.holder_id == holder_id
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Result of [`try_acquire`](crate::LeaseManager::try_acquire).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// Scope was free
    Acquired(Lease),
    /// Caller already held it; heartbeat refreshed
    Reentrant(Lease),
    /// Previous holder went silent past the timeout
    Stolen { lease: Lease, previous: Lease },
    /// Someone else holds a live lease
    Busy { holder: Lease },
}

impl LeaseOutcome {
    /// Whether the caller holds the lease afterwards.
    pub fn is_held(&self) -> bool {
        !matches!(self, LeaseOutcome::Busy { .. })
    }

    pub fn lease(&self) -> Option<&Lease> {
        match self {
            LeaseOutcome::Acquired(lease) | LeaseOutcome::Reentrant(lease) => Some(lease),
            LeaseOutcome::Stolen { lease, .. } => Some(lease),
            LeaseOutcome::Busy { .. } => None,
        }
    }
}

/// Lease timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseConfig {
    /// Silence after which a lease may be stolen. Defaults to 15 seconds.
    pub timeout: Duration,
    /// Heartbeat period of [`LeaseKeeper`](crate::LeaseKeeper). Defaults to 10 seconds.
    pub heartbeat_interval: Duration,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            heartbeat_interval: Duration::from_secs(10),
        }
    }
}

impl LeaseConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }
}

impl From<&LeaseSettings> for LeaseConfig {
    fn from(settings: &LeaseSettings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.timeout_secs),
            heartbeat_interval: Duration::from_secs(settings.heartbeat_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_staleness_boundary() {
        let now = Utc::now();
        let timeout = Duration::from_secs(15);
        let lease = |age: i64| Lease {
            scope: "s".into(),
            holder_id: "h".into(),
            acquired_at: now - TimeDelta::seconds(age),
            heartbeat_at: now - TimeDelta::seconds(age),
        };
        assert!(lease(16).is_stale(now, timeout));
        assert!(!lease(15).is_stale(now, timeout));
        assert!(!lease(10).is_stale(now, timeout));
    }

    #[test]
    fn test_scopes() {
        let doc = DocumentId::parse("D1").unwrap();
        assert_eq!(index_scope(&doc), "index:D1");
        assert_eq!(identity_scope(&doc), "identity:D1");
    }
}
