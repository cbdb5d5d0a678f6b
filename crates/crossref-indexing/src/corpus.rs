//! The searchable corpus: search index plus relationship graph.
//!
//! Both halves are published together under one write lock, so readers
//! never see an index entry without its node edges or an edge pointing
//! at a removed entry.
//!
//! Groupings are kept as declared next to the graph. A member that names
//! a node of a document not yet indexed is left out of the graph, and
//! comes back when that document is published.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crossref_graph::{GraphSnapshot, GraphStore, Membership};
use crossref_links::{plain_text, BodyLinks, LinkResolver, TitleLookup, UnresolvedLink};
use crossref_search::{IndexEntry, PublishSummary, SearchIndex, SearchIndexConfig};
use crossref_types::{DocumentId, DocumentSnapshot, Grouping, Node, Uid};

use crate::error::IndexingError;

/// Corpus shared between the indexing worker and readers.
pub type SharedCorpus = Arc<RwLock<Corpus>>;

/// Title lookup over the published search catalog.
pub struct CatalogLookup<'a> {
    index: &'a SearchIndex,
}

impl<'a> CatalogLookup<'a> {
    pub fn new(index: &'a SearchIndex) -> Self {
        Self { index }
    }
}

impl TitleLookup for CatalogLookup<'_> {
    fn find_by_title(&self, title: &str, scope: Option<&DocumentId>) -> Vec<Uid> {
        let mut uids = self.index.find_by_title(title);
        if let Some(scope) = scope {
            uids.retain(|u| u.belongs_to(scope));
        }
        uids
    }

    fn title_of(&self, uid: &Uid) -> Option<String> {
        self.index.get(uid).map(|e| e.title.clone())
    }

    fn contains(&self, uid: &Uid) -> bool {
        self.index.contains(uid)
    }
}

/// What one publish changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexDelta {
    pub added: BTreeSet<Uid>,
    pub updated: BTreeSet<Uid>,
    pub removed: BTreeSet<Uid>,
    pub unchanged: usize,
    /// Links in the published document that produced no edge.
    pub unresolved: Vec<UnresolvedLink>,
    /// Nodes of other documents whose mentions changed as a result.
    pub relinked: usize,
    /// Groupings of other documents whose members changed as a result.
    pub regrouped: usize,
    /// Group members dropped because they name no indexed node.
    pub dropped_members: usize,
    pub opstamp: u64,
}

impl IndexDelta {
    fn from_summary(summary: PublishSummary) -> Self {
        Self {
            added: summary.added,
            updated: summary.updated,
            removed: summary.removed,
            unchanged: summary.unchanged,
            opstamp: summary.opstamp,
            ..Default::default()
        }
    }

    /// Whether any entry was added, changed or removed.
    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty())
    }
}

/// Counts describing the corpus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorpusStats {
    pub documents: usize,
    pub entries: usize,
    pub memberships: usize,
    pub member_slots: usize,
    pub mentions: usize,
    pub unresolved_links: usize,
}

/// Persisted graph data of one document.
#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentEdges {
    /// Groupings as declared, before members are checked against the index
    pub declared: Vec<Grouping>,
    /// Edges the document owned when it was last published
    pub edges: GraphSnapshot,
}

impl DocumentEdges {
    pub fn to_bytes(&self) -> Result<Vec<u8>, IndexingError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode and verify the graph data of `document_id`.
    pub fn from_bytes(
        document_id: &DocumentId,
        bytes: &[u8],
    ) -> Result<(Vec<Grouping>, GraphStore), IndexingError> {
        let decoded: DocumentEdges = serde_json::from_slice(bytes)?;
        let graph = GraphStore::from_snapshot(decoded.edges)?;
        let foreign = decoded
            .declared
            .iter()
            .any(|g| g.group_id.owner() != document_id)
            || graph.document_part(document_id) != graph;
        if foreign {
            return Err(IndexingError::Serialization(format!(
                "graph data of {document_id} holds edges of other documents"
            )));
        }
        Ok((decoded.declared, graph))
    }
}

pub struct Corpus {
    pub index: SearchIndex,
    pub graph: GraphStore,
    declared: BTreeMap<DocumentId, Vec<Grouping>>,
    unresolved: BTreeMap<Uid, Vec<UnresolvedLink>>,
}

impl Corpus {
    pub fn new(config: SearchIndexConfig) -> Result<Self, IndexingError> {
        Ok(Self::from_parts(
            SearchIndex::new(config)?,
            GraphStore::new(),
            BTreeMap::new(),
        ))
    }

    /// Assemble a corpus from loaded halves. Declared groupings are checked
    /// against the index again and every link is re-resolved, since the
    /// halves of different documents were written at different times.
    pub fn from_parts(
        index: SearchIndex,
        graph: GraphStore,
        declared: BTreeMap<DocumentId, Vec<Grouping>>,
    ) -> Self {
        let mut corpus = Self {
            index,
            graph,
            declared,
            unresolved: BTreeMap::new(),
        };
        corpus.settle();
        corpus
    }

    /// Bring every edge in line with the published index.
    pub(crate) fn settle(&mut self) {
        let stray: Vec<_> = self
            .graph
            .group_ids()
            .filter(|g| {
                self.declared
                    .get(g.owner())
                    .is_none_or(|groups| groups.iter().all(|d| &d.group_id != *g))
            })
            .cloned()
            .collect();
        for group_id in &stray {
            self.graph.remove_membership(group_id);
        }
        let regrouped = self.reapply_groups(|_| true);
        let relinked = self.refresh_links(None);
        let dangling = self.purge_dangling();
        if !stray.is_empty() || regrouped > 0 || relinked > 0 {
            info!(
                stray = stray.len(),
                regrouped,
                relinked,
                "Brought loaded edges up to date"
            );
        }
        if !dangling.is_empty() {
            warn!(dangling = dangling.len(), "Loaded graph referenced removed nodes");
        }
    }

    pub fn into_shared(self) -> SharedCorpus {
        Arc::new(RwLock::new(self))
    }

    /// Lookup over the published catalog.
    pub fn lookup(&self) -> CatalogLookup<'_> {
        CatalogLookup::new(&self.index)
    }

    /// Unresolved links written in a node.
    pub fn unresolved_for(&self, uid: &Uid) -> &[UnresolvedLink] {
        self.unresolved.get(uid).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Unresolved links written anywhere in a document.
    pub fn unresolved_in(&self, document_id: &DocumentId) -> Vec<UnresolvedLink> {
        self.unresolved
            .iter()
            .filter(|(uid, _)| uid.belongs_to(document_id))
            .flat_map(|(_, links)| links.iter().cloned())
            .collect()
    }

    pub fn stats(&self) -> CorpusStats {
        CorpusStats {
            documents: self.index.document_ids().count(),
            entries: self.index.len(),
            memberships: self.graph.membership_record_count(),
            member_slots: self.graph.member_slot_count(),
            mentions: self.graph.mention_count(),
            unresolved_links: self.unresolved.values().map(Vec::len).sum(),
        }
    }

    /// Canonical bytes of one document's share of the corpus: its index
    /// entries and the graph data it owns.
    pub fn encode_document(
        &self,
        document_id: &DocumentId,
    ) -> Result<(Vec<u8>, Vec<u8>), IndexingError> {
        let edges = DocumentEdges {
            declared: self.declared.get(document_id).cloned().unwrap_or_default(),
            edges: self.graph.document_part(document_id).to_snapshot(),
        };
        Ok((self.index.serialize_document(document_id)?, edges.to_bytes()?))
    }

    /// Canonical bytes of the whole corpus, for comparing states.
    #[cfg(test)]
    pub(crate) fn encode(&self) -> Result<(Vec<u8>, Vec<u8>), IndexingError> {
        Ok((self.index.serialize()?, self.graph.to_bytes()?))
    }

    /// Commit the staged entries of `snapshot` and rebuild its edges.
    pub(crate) fn publish_document(
        &mut self,
        snapshot: &DocumentSnapshot,
    ) -> Result<IndexDelta, IndexingError> {
        let document_id = &snapshot.document_id;
        let summary = self.index.publish()?;
        let mut delta = IndexDelta::from_summary(summary);

        if !delta.removed.is_empty() {
            let report = self.graph.purge_uids(delta.removed.iter());
            debug!(
                document_id = %document_id,
                mentions_removed = report.mentions_removed,
                "Purged removed nodes from graph"
            );
        }

        let (unresolved, dropped) = self.apply_document_edges(snapshot);
        delta.unresolved = unresolved;
        delta.dropped_members = dropped;

        if delta.has_changes() {
            delta.relinked = self.refresh_links(Some(document_id));
            delta.regrouped = self.reapply_groups(|group| {
                group.group_id.owner() != document_id
                    && group.members.iter().any(|m| m.belongs_to(document_id))
            });
        }
        self.purge_dangling();

        info!(
            document_id = %document_id,
            added = delta.added.len(),
            updated = delta.updated.len(),
            removed = delta.removed.len(),
            unresolved = delta.unresolved.len(),
            relinked = delta.relinked,
            regrouped = delta.regrouped,
            "Published document"
        );
        Ok(delta)
    }

    /// Commit a staged document removal and drop its edges.
    pub(crate) fn publish_removal(
        &mut self,
        document_id: &DocumentId,
    ) -> Result<IndexDelta, IndexingError> {
        let summary = self.index.publish()?;
        let mut delta = IndexDelta::from_summary(summary);

        let report = self.graph.purge_document(document_id);
        self.declared.remove(document_id);
        self.unresolved.retain(|uid, _| !uid.belongs_to(document_id));
        delta.relinked = self.refresh_links(None);
        self.purge_dangling();

        info!(
            document_id = %document_id,
            removed = delta.removed.len(),
            mentions_removed = report.mentions_removed,
            memberships_removed = report.memberships_removed,
            relinked = delta.relinked,
            "Published document removal"
        );
        Ok(delta)
    }

    /// Replace the groupings and mentions a document declares. Returns its
    /// unresolved links and the number of group members dropped.
    pub(crate) fn apply_document_edges(
        &mut self,
        snapshot: &DocumentSnapshot,
    ) -> (Vec<UnresolvedLink>, usize) {
        let document_id = &snapshot.document_id;

        let mut dropped = 0;
        let memberships: Vec<Membership> = snapshot
            .groups
            .iter()
            .map(|group| {
                let (membership, missing) = indexed_members(&self.index, group);
                dropped += missing;
                membership
            })
            .collect();
        if dropped > 0 {
            warn!(
                document_id = %document_id,
                dropped,
                "Groupings name nodes that are not indexed"
            );
        }
        if snapshot.groups.is_empty() {
            self.declared.remove(document_id);
        } else {
            self.declared
                .insert(document_id.clone(), snapshot.groups.clone());
        }

        let links = self.resolve_document_links(snapshot);
        let mut mentions = Vec::new();
        let mut unresolved = Vec::new();
        self.unresolved.retain(|uid, _| !uid.belongs_to(document_id));
        for (uid, body_links) in links {
            mentions.extend(body_links.mentions);
            if !body_links.unresolved.is_empty() {
                unresolved.extend(body_links.unresolved.iter().cloned());
                self.unresolved.insert(uid, body_links.unresolved);
            }
        }

        self.graph
            .replace_document_edges(document_id, memberships, mentions);
        (unresolved, dropped)
    }

    fn resolve_document_links(&self, snapshot: &DocumentSnapshot) -> Vec<(Uid, BodyLinks)> {
        let lookup = self.lookup();
        let resolver = LinkResolver::new(&lookup);
        snapshot
            .nodes
            .iter()
            .filter(|node| plain_text(&node.body) != node.body)
            .map(|node| {
                let uid = snapshot.uid_of(&node.guid);
                let links = resolver.resolve_body(&uid, &node.body);
                (uid, links)
            })
            .collect()
    }

    /// Re-resolve the links of every indexed node outside `skip`. Titles
    /// elsewhere may have appeared, changed or vanished. Returns how many
    /// nodes had their mentions changed.
    pub fn refresh_links(&mut self, skip: Option<&DocumentId>) -> usize {
        let lookup = CatalogLookup::new(&self.index);
        let resolver = LinkResolver::new(&lookup);
        let resolved: Vec<(Uid, BodyLinks)> = self
            .index
            .entries()
            .filter(|entry| skip.is_none_or(|doc| &entry.document_id != doc))
            .filter_map(|entry| {
                entry
                    .linked_body
                    .as_deref()
                    .map(|body| (entry.uid.clone(), resolver.resolve_body(&entry.uid, body)))
            })
            .collect();

        let mut changed = 0;
        for (uid, links) in resolved {
            if self.graph.replace_outgoing(&uid, links.mentions) {
                changed += 1;
            }
            if links.unresolved.is_empty() {
                self.unresolved.remove(&uid);
            } else {
                self.unresolved.insert(uid, links.unresolved);
            }
        }
        if changed > 0 {
            debug!(changed, "Re-resolved links in other documents");
        }
        changed
    }

    /// Recompute the stored members of every declared grouping `select`
    /// picks. Returns how many groupings changed.
    fn reapply_groups<F>(&mut self, select: F) -> usize
    where
        F: Fn(&Grouping) -> bool,
    {
        let memberships: Vec<Membership> = self
            .declared
            .values()
            .flatten()
            .filter(|group| select(*group))
            .map(|group| indexed_members(&self.index, group).0)
            .collect();

        let mut changed = 0;
        for membership in memberships {
            let current = self.graph.membership(&membership.group_id);
            let same = match current {
                Some(current) => current == &membership,
                None => membership.members.is_empty(),
            };
            if !same {
                self.graph.add_membership(membership);
                changed += 1;
            }
        }
        if changed > 0 {
            debug!(changed, "Re-applied groupings of other documents");
        }
        changed
    }

    fn purge_dangling(&mut self) -> BTreeSet<Uid> {
        let index = &self.index;
        self.graph.force_purge_dangling(|uid| index.contains(uid))
    }
}

/// The membership a declared grouping has in the graph: its members that
/// name indexed nodes. Also returns how many members were left out.
fn indexed_members(index: &SearchIndex, group: &Grouping) -> (Membership, usize) {
    let members: Vec<Uid> = group
        .members
        .iter()
        .filter(|m| index.contains(m))
        .cloned()
        .collect();
    let missing = group.members.len() - members.len();
    if missing > 0 {
        debug!(
            group_id = %group.group_id,
            missing,
            "Grouping names nodes that are not indexed"
        );
    }
    (
        Membership::new(group.group_id.clone(), group.label.clone(), members),
        missing,
    )
}

/// Index entry for one node.
pub fn entry_for(document_id: &DocumentId, node: &Node) -> IndexEntry {
    IndexEntry::from_node(document_id, node, &plain_text(&node.body))
}
