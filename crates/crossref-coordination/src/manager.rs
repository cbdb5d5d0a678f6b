//! Advisory single-writer leases.
//!
//! Leases keep two instances from doing the same reindex at once and
//! serialize identity decisions. They are not needed for correctness of
//! the index: a duplicated reindex yields the same result.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crossref_scheduler::Clock;

use crate::bus::{BusMessage, MessageBus};
use crate::error::CoordinationError;
use crate::lease::{Lease, LeaseConfig, LeaseOutcome};
use crate::store::LeaseStore;

/// Attempts before giving up on a contended compare-and-swap.
const MAX_CAS_ATTEMPTS: usize = 4;

#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn LeaseStore>,
    clock: Arc<dyn Clock>,
    config: LeaseConfig,
    bus: Option<Arc<dyn MessageBus>>,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn LeaseStore>, clock: Arc<dyn Clock>, config: LeaseConfig) -> Self {
        Self {
            store,
            clock,
            config,
            bus: None,
        }
    }

    /// Announce acquisitions, releases and thefts on `bus`.
    pub fn with_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn config(&self) -> &LeaseConfig {
        &self.config
    }

    fn publish(&self, message: BusMessage) {
        if let Some(bus) = &self.bus {
            bus.publish(message);
        }
    }

    /// Try to take `scope` for `holder_id`.
    pub fn try_acquire(&self, scope: &str, holder_id: &str) -> Result<LeaseOutcome, CoordinationError> {
        let mut current = self.store.load(scope)?;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let now = self.clock.now();
            match current {
                None => {
                    let lease = Lease::new(scope, holder_id, now);
                    if self.store.compare_and_swap(scope, None, Some(&lease))? {
                        debug!(scope, holder_id, "Lease acquired");
                        self.publish(BusMessage::LeaseAcquired {
                            scope: scope.to_string(),
                            holder_id: holder_id.to_string(),
                        });
                        return Ok(LeaseOutcome::Acquired(lease));
                    }
                }
                Some(ref existing) if existing.is_held_by(holder_id) => {
                    let lease = existing.refreshed(now);
                    if self
                        .store
                        .compare_and_swap(scope, Some(existing), Some(&lease))?
                    {
                        return Ok(LeaseOutcome::Reentrant(lease));
                    }
                }
                Some(ref existing) if existing.is_stale(now, self.config.timeout) => {
                    let lease = Lease::new(scope, holder_id, now);
                    if self
                        .store
                        .compare_and_swap(scope, Some(existing), Some(&lease))?
                    {
                        let silent_ms = (now - existing.heartbeat_at).num_milliseconds();
                        warn!(
                            scope,
                            holder_id,
                            previous_holder = %existing.holder_id,
                            silent_ms,
                            "Stole stale lease"
                        );
                        self.publish(BusMessage::LeaseStolen {
                            scope: scope.to_string(),
                            holder_id: holder_id.to_string(),
                            previous_holder: existing.holder_id.clone(),
                        });
                        return Ok(LeaseOutcome::Stolen {
                            lease,
                            previous: existing.clone(),
                        });
                    }
                }
                Some(existing) => {
                    debug!(scope, holder_id, holder = %existing.holder_id, "Lease busy");
                    return Ok(LeaseOutcome::Busy { holder: existing });
                }
            }
            // Lost a race; look again.
            current = self.store.load(scope)?;
        }

        match current {
            Some(holder) => Ok(LeaseOutcome::Busy { holder }),
            None => Err(CoordinationError::Contended {
                scope: scope.to_string(),
            }),
        }
    }

    /// Refresh the heartbeat. Returns `false` if `holder_id` no longer holds
    /// the lease, which means it was stolen.
    pub fn heartbeat(&self, scope: &str, holder_id: &str) -> Result<bool, CoordinationError> {
        let Some(existing) = self.store.load(scope)? else {
            warn!(scope, holder_id, "Heartbeat for a lease that no longer exists");
            return Ok(false);
        };
        if !existing.is_held_by(holder_id) {
            warn!(scope, holder_id, holder = %existing.holder_id, "Heartbeat for a lease held by another instance");
            return Ok(false);
        }
        let refreshed = existing.refreshed(self.clock.now());
        self.store
            .compare_and_swap(scope, Some(&existing), Some(&refreshed))
    }

    /// Give up the lease. Returns whether `holder_id` held it.
    pub fn release(&self, scope: &str, holder_id: &str) -> Result<bool, CoordinationError> {
        let Some(existing) = self.store.load(scope)? else {
            return Ok(false);
        };
        if !existing.is_held_by(holder_id) {
            return Ok(false);
        }
        let released = self.store.compare_and_swap(scope, Some(&existing), None)?;
        if released {
            debug!(scope, holder_id, "Lease released");
            self.publish(BusMessage::LeaseReleased {
                scope: scope.to_string(),
                holder_id: holder_id.to_string(),
            });
        }
        Ok(released)
    }

    pub fn current(&self, scope: &str) -> Result<Option<Lease>, CoordinationError> {
        self.store.load(scope)
    }

    /// Remove every stale row. Returns how many were removed.
    pub fn sweep_stale(&self) -> Result<usize, CoordinationError> {
        let now = self.clock.now();
        let mut removed = 0;
        for lease in self.store.list()? {
            if lease.is_stale(now, self.config.timeout)
                && self.store.compare_and_swap(&lease.scope, Some(&lease), None)?
            {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "Swept stale leases");
        }
        Ok(removed)
    }
}
