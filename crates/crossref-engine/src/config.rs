//! Engine configuration.

use crossref_coordination::LeaseConfig;
use crossref_identity::IdentityConfig;
use crossref_indexing::IndexingConfig;
use crossref_scheduler::CollectorConfig;
use crossref_types::Settings;

/// Results returned by `search` when the filters set no limit.
pub const DEFAULT_SEARCH_LIMIT: usize = 20;

/// Everything the engine needs besides storage, clock and bus.
#[derive(Clone)]
pub struct EngineConfig {
    /// Identifies this instance in leases and bus messages.
    pub holder_id: String,
    pub identity: IdentityConfig,
    pub indexing: IndexingConfig,
    pub collector: CollectorConfig,
    pub lease: LeaseConfig,
    pub default_search_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            holder_id: new_holder_id(),
            identity: IdentityConfig::default(),
            indexing: IndexingConfig::default(),
            collector: CollectorConfig::default(),
            lease: LeaseConfig::default(),
            default_search_limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

impl EngineConfig {
    pub fn with_holder_id(mut self, holder_id: impl Into<String>) -> Self {
        self.holder_id = holder_id.into();
        self
    }

    pub fn with_identity(mut self, identity: IdentityConfig) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_indexing(mut self, indexing: IndexingConfig) -> Self {
        self.indexing = indexing;
        self
    }

    pub fn with_collector(mut self, collector: CollectorConfig) -> Self {
        self.collector = collector;
        self
    }

    pub fn with_lease(mut self, lease: LeaseConfig) -> Self {
        self.lease = lease;
        self
    }
}

impl From<&Settings> for EngineConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            indexing: IndexingConfig::from(&settings.indexing),
            collector: CollectorConfig::from(&settings.collector),
            lease: LeaseConfig::from(&settings.lease),
            default_search_limit: settings.search.default_limit,
            ..Self::default()
        }
    }
}

/// A fresh instance id, unique per process start.
pub fn new_holder_id() -> String {
    format!("instance-{}", ulid::Ulid::new())
}
