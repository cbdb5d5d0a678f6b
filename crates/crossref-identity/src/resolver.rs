//! Document registration and fork decisions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crossref_coordination::{identity_scope, LeaseManager, LeaseOutcome};
use crossref_scheduler::Clock;
use crossref_storage::Storage;
use crossref_types::{
    ContentHash, DocumentId, DocumentRecord, DocumentSnapshot, RawDocument, SourceFingerprint,
};

use crate::error::IdentityError;
use crate::infer::{infer_semantic_type, TypeInference};
use crate::migrate::migrate_nodes;

/// A known document id was claimed from another source with different
/// content. The caller must answer with [`ForkChoice`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForkTicket {
    pub document_id: DocumentId,
    pub known_source: Option<SourceFingerprint>,
    pub known_hash: ContentHash,
    pub incoming_hash: ContentHash,
    /// Normalized incoming content, still under the claimed id.
    pub snapshot: DocumentSnapshot,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForkChoice {
    /// Same document, evolved: keep the id and accept the new content.
    SameDocument,
    /// Independent copy: mint a new document id. Node guids travel with
    /// the copied content.
    IndependentCopy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RegistrationStatus {
    /// First registration of this id
    New,
    /// Same source, same content (display name or layout may differ)
    Unchanged,
    /// Same source, new content
    Updated,
    /// Same content seen at a new source; fingerprint updated
    Relocated {
        previous_source: Option<SourceFingerprint>,
    },
    /// Same id, new source, different content
    ForkPending(ForkTicket),
    /// Another instance is deciding identity for this id right now
    Deferred { holder: String },
}

impl RegistrationStatus {
    /// Whether the accepted content must be (re)indexed.
    pub fn needs_reindex(&self) -> bool {
        matches!(self, RegistrationStatus::New | RegistrationStatus::Updated)
    }

    pub fn fork_ticket(&self) -> Option<&ForkTicket> {
        match self {
            RegistrationStatus::ForkPending(ticket) => Some(ticket),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub document_id: DocumentId,
    pub status: RegistrationStatus,
    /// Normalized content. Stored unless the status is `ForkPending` or
    /// `Deferred`.
    pub snapshot: DocumentSnapshot,
}

#[derive(Clone)]
pub struct IdentityConfig {
    pub infer: TypeInference,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            infer: infer_semantic_type,
        }
    }
}

impl IdentityConfig {
    pub fn with_inference(mut self, infer: TypeInference) -> Self {
        self.infer = infer;
        self
    }
}

/// Mints and verifies document identity, and keeps the registry.
pub struct IdentityResolver {
    storage: Arc<Storage>,
    leases: LeaseManager,
    holder_id: String,
    clock: Arc<dyn Clock>,
    config: IdentityConfig,
}

impl IdentityResolver {
    pub fn new(
        storage: Arc<Storage>,
        leases: LeaseManager,
        holder_id: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            leases,
            holder_id: holder_id.into(),
            clock,
            config: IdentityConfig::default(),
        }
    }

    pub fn with_config(mut self, config: IdentityConfig) -> Self {
        self.config = config;
        self
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    /// Register a host payload.
    ///
    /// Payloads without an id get a fresh one. Payloads claiming an id are
    /// decided under the `identity:{id}` lease; if another instance holds
    /// it the registration is [`Deferred`](RegistrationStatus::Deferred)
    /// and nothing is stored.
    #[instrument(skip(self, raw), fields(display_name = %raw.display_name))]
    pub fn register(&self, raw: &RawDocument) -> Result<Registration, IdentityError> {
        let now = self.clock.now();

        let Some(claimed) = raw.document_id.as_deref() else {
            let document_id = DocumentId::mint();
            let snapshot = migrate_nodes(raw, &document_id, None, now, self.config.infer)?;
            self.store_new(&snapshot, now)?;
            info!(document_id = %document_id, nodes = snapshot.node_count(), "Registered new document");
            return Ok(Registration {
                document_id,
                status: RegistrationStatus::New,
                snapshot,
            });
        };

        let document_id = DocumentId::parse(claimed)?;
        self.with_identity_lease(
            &document_id,
            |resolver| resolver.decide(&document_id, raw, now),
            || {
                let previous = self.storage.get_snapshot(&document_id)?;
                migrate_nodes(raw, &document_id, previous.as_ref(), now, self.config.infer)
            },
        )
    }

    /// Answer a fork decision raised by [`register`](Self::register).
    #[instrument(skip(self, ticket), fields(document_id = %ticket.document_id))]
    pub fn resolve_fork(
        &self,
        ticket: &ForkTicket,
        choice: ForkChoice,
    ) -> Result<Registration, IdentityError> {
        let now = self.clock.now();
        match choice {
            ForkChoice::IndependentCopy => {
                let document_id = DocumentId::mint();
                let snapshot = ticket.snapshot.rehome(document_id.clone())?;
                self.store_new(&snapshot, now)?;
                info!(
                    original = %ticket.document_id,
                    document_id = %document_id,
                    "Fork resolved as independent copy"
                );
                Ok(Registration {
                    document_id,
                    status: RegistrationStatus::New,
                    snapshot,
                })
            }
            ForkChoice::SameDocument => {
                let document_id = ticket.document_id.clone();
                self.with_identity_lease(
                    &document_id,
                    |resolver| {
                        let record = resolver.storage.get_document(&document_id)?;
                        match record {
                            Some(record) if record.content_hash != ticket.known_hash => {
                                Err(IdentityError::StaleTicket {
                                    document_id: document_id.clone(),
                                })
                            }
                            Some(record) => {
                                let updated = record.updated_from(&ticket.snapshot, now);
                                resolver.storage.put_document(&updated, &ticket.snapshot)?;
                                info!(document_id = %document_id, "Fork resolved as same document");
                                Ok(Registration {
                                    document_id: document_id.clone(),
                                    status: RegistrationStatus::Updated,
                                    snapshot: ticket.snapshot.clone(),
                                })
                            }
                            None => {
                                // Unregistered in the meantime.
                                resolver.store_new(&ticket.snapshot, now)?;
                                Ok(Registration {
                                    document_id: document_id.clone(),
                                    status: RegistrationStatus::New,
                                    snapshot: ticket.snapshot.clone(),
                                })
                            }
                        }
                    },
                    || Ok(ticket.snapshot.clone()),
                )
            }
        }
    }

    /// Run `decide` under the identity lease for `document_id`. When the
    /// lease is busy, `pending` builds the snapshot reported with the
    /// deferral.
    fn with_identity_lease<D, P>(
        &self,
        document_id: &DocumentId,
        decide: D,
        pending: P,
    ) -> Result<Registration, IdentityError>
    where
        D: FnOnce(&Self) -> Result<Registration, IdentityError>,
        P: FnOnce() -> Result<DocumentSnapshot, IdentityError>,
    {
        let scope = identity_scope(document_id);
        let outcome = self.leases.try_acquire(&scope, &self.holder_id)?;
        if let LeaseOutcome::Busy { holder } = outcome {
            debug!(document_id = %document_id, holder = %holder.holder_id, "Identity decision deferred");
            return Ok(Registration {
                document_id: document_id.clone(),
                status: RegistrationStatus::Deferred {
                    holder: holder.holder_id,
                },
                snapshot: pending()?,
            });
        }

        let result = decide(self);
        if !matches!(outcome, LeaseOutcome::Reentrant(_)) {
            if let Err(e) = self.leases.release(&scope, &self.holder_id) {
                warn!(document_id = %document_id, error = %e, "Failed to release identity lease");
            }
        }
        result
    }

    fn decide(
        &self,
        document_id: &DocumentId,
        raw: &RawDocument,
        now: DateTime<Utc>,
    ) -> Result<Registration, IdentityError> {
        let record = self.storage.get_document(document_id)?;
        let previous = self.storage.get_snapshot(document_id)?;
        let snapshot = migrate_nodes(raw, document_id, previous.as_ref(), now, self.config.infer)?;

        let Some(record) = record else {
            self.store_new(&snapshot, now)?;
            info!(document_id = %document_id, nodes = snapshot.node_count(), "Registered document under host id");
            return Ok(Registration {
                document_id: document_id.clone(),
                status: RegistrationStatus::New,
                snapshot,
            });
        };

        let incoming_hash = snapshot.content_hash();
        let same_content = incoming_hash == record.content_hash;
        let relocated = snapshot.source.is_some() && snapshot.source != record.source;

        let status = match (relocated, same_content) {
            (true, true) => {
                let updated = DocumentRecord {
                    display_name: snapshot.display_name.clone(),
                    source: snapshot.source.clone(),
                    ..record.clone()
                };
                self.storage.put_document(&updated, &snapshot)?;
                info!(
                    document_id = %document_id,
                    from = ?record.source,
                    to = ?snapshot.source,
                    "Document relocated"
                );
                RegistrationStatus::Relocated {
                    previous_source: record.source,
                }
            }
            (true, false) => {
                warn!(
                    document_id = %document_id,
                    known = ?record.source,
                    incoming = ?snapshot.source,
                    "Document id claimed by diverged content; fork decision needed"
                );
                RegistrationStatus::ForkPending(ForkTicket {
                    document_id: document_id.clone(),
                    known_source: record.source,
                    known_hash: record.content_hash,
                    incoming_hash,
                    snapshot: snapshot.clone(),
                    raised_at: now,
                })
            }
            (false, true) => {
                if record.display_name != snapshot.display_name || previous.as_ref() != Some(&snapshot) {
                    let updated = DocumentRecord {
                        display_name: snapshot.display_name.clone(),
                        ..record
                    };
                    self.storage.put_document(&updated, &snapshot)?;
                }
                RegistrationStatus::Unchanged
            }
            (false, false) => {
                self.storage
                    .put_document(&record.updated_from(&snapshot, now), &snapshot)?;
                debug!(document_id = %document_id, "Document content updated");
                RegistrationStatus::Updated
            }
        };

        Ok(Registration {
            document_id: document_id.clone(),
            status,
            snapshot,
        })
    }

    fn store_new(&self, snapshot: &DocumentSnapshot, now: DateTime<Utc>) -> Result<(), IdentityError> {
        let record = DocumentRecord::from_snapshot(snapshot, now);
        self.storage.put_document(&record, snapshot)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossref_coordination::{LeaseConfig, MemoryLeaseStore};
    use crossref_scheduler::FakeClock;
    use crossref_types::RawNode;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        storage: Arc<Storage>,
        leases: LeaseManager,
        resolver: IdentityResolver,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(dir.path()).unwrap());
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::default());
        let leases = LeaseManager::new(
            Arc::new(MemoryLeaseStore::new()),
            clock.clone(),
            LeaseConfig::default(),
        );
        let resolver = IdentityResolver::new(storage.clone(), leases.clone(), "instance-a", clock);
        Fixture {
            _dir: dir,
            storage,
            leases,
            resolver,
        }
    }

    fn plan() -> RawDocument {
        RawDocument::new("Plan")
            .with_source("/tmp/plan.json")
            .with_node(RawNode::new("Alpha").with_guid("GA"))
            .with_node(RawNode::new("Beta").with_guid("GB"))
    }

    fn claimed(raw: RawDocument, id: &DocumentId) -> RawDocument {
        raw.with_id(id.as_str())
    }

    #[test]
    fn test_first_registration_mints_id() {
        let f = fixture();
        let reg = f.resolver.register(&plan()).unwrap();
        assert_eq!(reg.status, RegistrationStatus::New);
        assert!(reg.status.needs_reindex());
        let record = f.storage.get_document(&reg.document_id).unwrap().unwrap();
        assert_eq!(record.node_count, 2);
    }

    #[test]
    fn test_rename_keeps_identity() {
        let f = fixture();
        let first = f.resolver.register(&plan()).unwrap();

        let mut renamed = claimed(plan(), &first.document_id);
        renamed.display_name = "Plan (final)".into();
        let second = f.resolver.register(&renamed).unwrap();

        assert_eq!(second.status, RegistrationStatus::Unchanged);
        assert_eq!(second.document_id, first.document_id);
        assert_eq!(second.snapshot.uids(), first.snapshot.uids());
        let record = f.storage.get_document(&first.document_id).unwrap().unwrap();
        assert_eq!(record.display_name, "Plan (final)");
    }

    #[test]
    fn test_identical_copy_elsewhere_is_relocation() {
        let f = fixture();
        let first = f.resolver.register(&plan()).unwrap();

        let mut moved = claimed(plan(), &first.document_id);
        moved.source = Some(SourceFingerprint::new("/backup/plan.json"));
        let second = f.resolver.register(&moved).unwrap();

        assert!(matches!(second.status, RegistrationStatus::Relocated { .. }));
        assert!(!second.status.needs_reindex());
        let record = f.storage.get_document(&first.document_id).unwrap().unwrap();
        assert_eq!(record.source, Some(SourceFingerprint::new("/backup/plan.json")));
    }

    #[test]
    fn test_diverged_copy_raises_fork() {
        let f = fixture();
        let first = f.resolver.register(&plan()).unwrap();

        let mut diverged = claimed(plan(), &first.document_id)
            .with_node(RawNode::new("Gamma").with_guid("GC"));
        diverged.source = Some(SourceFingerprint::new("/other/plan.json"));
        let reg = f.resolver.register(&diverged).unwrap();

        let ticket = reg.status.fork_ticket().unwrap().clone();
        assert_eq!(ticket.document_id, first.document_id);
        assert_ne!(ticket.known_hash, ticket.incoming_hash);
        // Nothing accepted yet.
        let record = f.storage.get_document(&first.document_id).unwrap().unwrap();
        assert_eq!(record.node_count, 2);

        let copy = f
            .resolver
            .resolve_fork(&ticket, ForkChoice::IndependentCopy)
            .unwrap();
        assert_ne!(copy.document_id, first.document_id);
        assert_eq!(copy.snapshot.nodes.len(), 3);
        assert_eq!(copy.snapshot.nodes[0].guid, first.snapshot.nodes[0].guid);
        assert!(f.storage.get_document(&copy.document_id).unwrap().is_some());
    }

    #[test]
    fn test_fork_same_document_accepts_content() {
        let f = fixture();
        let first = f.resolver.register(&plan()).unwrap();
        let mut diverged = claimed(plan(), &first.document_id)
            .with_node(RawNode::new("Gamma").with_guid("GC"));
        diverged.source = Some(SourceFingerprint::new("/other/plan.json"));
        let ticket = f
            .resolver
            .register(&diverged)
            .unwrap()
            .status
            .fork_ticket()
            .unwrap()
            .clone();

        let reg = f.resolver.resolve_fork(&ticket, ForkChoice::SameDocument).unwrap();
        assert_eq!(reg.status, RegistrationStatus::Updated);
        assert_eq!(reg.document_id, first.document_id);
        let record = f.storage.get_document(&first.document_id).unwrap().unwrap();
        assert_eq!(record.node_count, 3);
        assert_eq!(record.source, Some(SourceFingerprint::new("/other/plan.json")));

        // The same ticket cannot be applied twice.
        let err = f
            .resolver
            .resolve_fork(&ticket, ForkChoice::SameDocument)
            .unwrap_err();
        assert!(matches!(err, IdentityError::StaleTicket { .. }));
    }

    #[test]
    fn test_busy_identity_lease_defers() {
        let f = fixture();
        let id = DocumentId::parse("SHARED").unwrap();
        f.leases
            .try_acquire(&identity_scope(&id), "instance-b")
            .unwrap();

        let reg = f.resolver.register(&claimed(plan(), &id)).unwrap();
        assert_eq!(
            reg.status,
            RegistrationStatus::Deferred {
                holder: "instance-b".into()
            }
        );
        assert!(f.storage.get_document(&id).unwrap().is_none());
    }

    #[test]
    fn test_identity_lease_released_after_decision() {
        let f = fixture();
        let id = DocumentId::parse("SHARED").unwrap();
        f.resolver.register(&claimed(plan(), &id)).unwrap();
        assert!(f.leases.current(&identity_scope(&id)).unwrap().is_none());
    }

    #[test]
    fn test_content_update() {
        let f = fixture();
        let first = f.resolver.register(&plan()).unwrap();
        let edited = claimed(plan(), &first.document_id)
            .with_node(RawNode::new("Gamma").with_guid("GC"));
        let reg = f.resolver.register(&edited).unwrap();
        assert_eq!(reg.status, RegistrationStatus::Updated);
    }

    #[test]
    fn test_ticket_serializes() {
        let f = fixture();
        let first = f.resolver.register(&plan()).unwrap();
        let mut diverged = claimed(plan(), &first.document_id)
            .with_node(RawNode::new("Gamma").with_guid("GC"));
        diverged.source = Some(SourceFingerprint::new("/other/plan.json"));
        let status = f.resolver.register(&diverged).unwrap().status;

        let json = serde_json::to_string(&status).unwrap();
        let back: RegistrationStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }
}
