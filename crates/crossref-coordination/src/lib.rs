//! # crossref-coordination
//!
//! Lets several engine instances share one store.
//!
//! - [`LeaseManager`]: per-scope advisory leases with heartbeats and theft
//!   of stale leases.
//! - [`LeaseKeeper`]: background heartbeat while long work runs.
//! - [`MessageBus`]: at-least-once notifications between instances.

mod bus;
mod error;
mod keeper;
mod lease;
mod manager;
mod store;

pub use bus::{BroadcastBus, BusMessage, MessageBus, BUS_CHANNEL_CAPACITY};
pub use error::CoordinationError;
pub use keeper::LeaseKeeper;
pub use lease::{identity_scope, index_scope, Lease, LeaseConfig, LeaseOutcome};
pub use manager::LeaseManager;
pub use store::{LeaseStore, MemoryLeaseStore, StorageLeaseStore};
