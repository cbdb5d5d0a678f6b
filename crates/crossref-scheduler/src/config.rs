//! Change collector configuration.
//!
//! Timing knobs for debouncing reindex triggers: a quiet period after the
//! last change, a ceiling that forces a flush during continuous edits, and
//! a minimum gap between two reindexes of the same document.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crossref_types::CollectorSettings;

/// Configuration for the change collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Quiet time after the last change before a reindex is due.
    /// Defaults to 750 ms.
    #[serde(default = "default_quiet_period")]
    pub quiet_period: Duration,

    /// Longest a document may stay dirty under continuous edits.
    /// Defaults to 30 seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay: Duration,

    /// Minimum time between two reindexes of one document.
    /// Defaults to 5 seconds.
    #[serde(default = "default_min_interval")]
    pub min_interval: Duration,
}

fn default_quiet_period() -> Duration {
    Duration::from_millis(750)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_min_interval() -> Duration {
    Duration::from_secs(5)
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            quiet_period: default_quiet_period(),
            max_delay: default_max_delay(),
            min_interval: default_min_interval(),
        }
    }
}

impl CollectorConfig {
    pub fn with_quiet_period(mut self, quiet_period: Duration) -> Self {
        self.quiet_period = quiet_period;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }
}

impl From<&CollectorSettings> for CollectorConfig {
    fn from(settings: &CollectorSettings) -> Self {
        Self {
            quiet_period: settings.quiet_period(),
            max_delay: settings.max_delay(),
            min_interval: settings.min_interval(),
        }
    }
}
