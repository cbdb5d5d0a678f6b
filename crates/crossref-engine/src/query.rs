//! Read side: search, backlinks, traversal and node views.
//!
//! Queries run under the corpus read lock and see the last published
//! state; a reindex in progress never shows half a document.

use std::collections::BTreeSet;

use serde::Serialize;

use crossref_graph::{Backlink, TraversalStep, TraverseOptions};
use crossref_indexing::CorpusStats;
use crossref_links::{harden_body, render_body, LinkResolver, Resolution, UnresolvedLink};
use crossref_search::{SearchHit, SearchOptions};
use crossref_storage::StorageStats;
use crossref_types::{DocumentId, DocumentRecord, SemanticType, Uid};

use crate::engine::CrossrefEngine;
use crate::error::EngineError;

/// Narrowing for [`CrossrefEngine::search`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    /// Falls back to the configured default when unset.
    pub limit: Option<usize>,
    pub semantic_type: Option<SemanticType>,
    /// Only these documents. Empty means all.
    pub documents: Vec<DocumentId>,
}

impl SearchFilters {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_type(mut self, semantic_type: SemanticType) -> Self {
        self.semantic_type = Some(semantic_type);
        self
    }

    pub fn with_document(mut self, document_id: DocumentId) -> Self {
        self.documents.push(document_id);
        self
    }

    fn to_options(&self, default_limit: usize) -> SearchOptions {
        let mut options = SearchOptions::new().with_limit(self.limit.unwrap_or(default_limit));
        options.semantic_type = self.semantic_type.clone();
        options.document_scope = self.documents.clone();
        options
    }
}

/// Soft links of one node rewritten as hard links. Apply it with
/// [`CrossrefEngine::apply_hardening`] or hand it to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HardeningPatch {
    pub uid: Uid,
    /// Body the patch was computed from.
    pub original: String,
    pub hardened: String,
}

/// Everything needed to display one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeView {
    pub uid: Uid,
    pub title: String,
    pub semantic_type: SemanticType,
    pub tags: BTreeSet<String>,
    pub parent: Option<Uid>,
    /// Body as stored.
    pub body: String,
    /// Body with every link shown as its target's current title.
    pub rendered: String,
    pub hardening: Option<HardeningPatch>,
    pub unresolved: Vec<UnresolvedLink>,
    pub backlinks: Vec<Backlink>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    pub holder_id: String,
    pub corpus: CorpusStats,
    pub storage: StorageStats,
}

impl CrossrefEngine {
    /// Full-text search over titles, tags and bodies.
    pub async fn search(
        &self,
        text: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<SearchHit>, EngineError> {
        let options = filters.to_options(self.inner.config.default_search_limit);
        let corpus = self.inner.corpus.read().await;
        Ok(corpus.index.search(text, &options)?)
    }

    /// Everything that points at `uid`: groupings it belongs to and nodes
    /// mentioning it.
    pub async fn get_backlinks(&self, uid: &Uid) -> Vec<Backlink> {
        self.inner.corpus.read().await.graph.get_backlinks(uid)
    }

    pub async fn traverse(&self, start: &Uid, options: &TraverseOptions) -> Vec<TraversalStep> {
        self.inner.corpus.read().await.graph.traverse(start, options)
    }

    /// Resolve a title the way a soft link in `scope` would.
    pub async fn resolve_link(&self, title: &str, scope: Option<&DocumentId>) -> Resolution {
        let corpus = self.inner.corpus.read().await;
        let lookup = corpus.lookup();
        LinkResolver::new(&lookup).resolve_soft_link(title, scope)
    }

    /// Links in a document that produced no edge.
    pub async fn unresolved_links(&self, document_id: &DocumentId) -> Vec<UnresolvedLink> {
        self.inner.corpus.read().await.unresolved_in(document_id)
    }

    /// Open a node for display. Soft links that now resolve to exactly one
    /// node come back as a [`HardeningPatch`].
    pub async fn open_node(&self, uid: &Uid) -> Result<Option<NodeView>, EngineError> {
        let Some(snapshot) = self.inner.storage.get_snapshot(uid.document_id())? else {
            return Ok(None);
        };
        let Some(node) = snapshot.node(uid.node_guid()) else {
            return Ok(None);
        };

        let corpus = self.inner.corpus.read().await;
        let lookup = corpus.lookup();
        let hardening = harden_body(&node.body, uid.document_id(), &lookup).map(|hardened| {
            HardeningPatch {
                uid: uid.clone(),
                original: node.body.clone(),
                hardened,
            }
        });

        Ok(Some(NodeView {
            uid: uid.clone(),
            title: node.title.clone(),
            semantic_type: node.semantic_type.clone(),
            tags: node.tags.clone(),
            parent: node.parent.as_ref().map(|guid| snapshot.uid_of(guid)),
            body: node.body.clone(),
            rendered: render_body(&node.body, &lookup),
            hardening,
            unresolved: corpus.unresolved_for(uid).to_vec(),
            backlinks: corpus.graph.get_backlinks(uid),
        }))
    }

    /// Graph references to uids the search index does not hold. Empty
    /// unless a purge went wrong.
    pub async fn dangling_references(&self) -> BTreeSet<Uid> {
        let corpus = self.inner.corpus.read().await;
        corpus.graph.dangling_uids(|uid| corpus.index.contains(uid))
    }

    /// Registered documents in id order.
    pub fn documents(&self) -> Result<Vec<DocumentRecord>, EngineError> {
        Ok(self.inner.storage.list_documents()?)
    }

    pub async fn stats(&self) -> Result<EngineStats, EngineError> {
        let storage = self.inner.storage.get_stats()?;
        let corpus = self.inner.corpus.read().await.stats();
        Ok(EngineStats {
            holder_id: self.holder_id().to_string(),
            corpus,
            storage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{fixture, notes};
    use crossref_graph::{EdgeKind, MentionKind};
    use crossref_types::{NodeGuid, RawDocument, RawNode};

    fn uid(document_id: &DocumentId, guid: &str) -> Uid {
        Uid::new(document_id.clone(), NodeGuid::parse(guid).unwrap())
    }

    #[tokio::test]
    async fn test_backlinks_follow_mentions() {
        let f = fixture().await;
        let id = f.engine.register_document(&notes()).await.unwrap().document_id;

        let backlinks = f.engine.get_backlinks(&uid(&id, "GB")).await;
        assert_eq!(backlinks.len(), 1);
        match &backlinks[0] {
            Backlink::Mention { source, kind, .. } => {
                assert_eq!(source, &uid(&id, "GA"));
                assert_eq!(*kind, MentionKind::Soft);
            }
            other => panic!("unexpected backlink {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_traverse_from_mentioning_node() {
        let f = fixture().await;
        let id = f.engine.register_document(&notes()).await.unwrap().document_id;

        let steps = f
            .engine
            .traverse(&uid(&id, "GA"), &TraverseOptions::default())
            .await;
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].uid, uid(&id, "GB"));
        assert_eq!(steps[0].via, EdgeKind::Mention);
    }

    #[tokio::test]
    async fn test_search_filters_by_document() {
        let f = fixture().await;
        let first = f.engine.register_document(&notes()).await.unwrap().document_id;
        let other = RawDocument::new("Other")
            .with_node(RawNode::new("Alpha elsewhere").with_guid("GX"));
        f.engine.register_document(&other).await.unwrap();

        let all = f.engine.search("alpha", &SearchFilters::default()).await.unwrap();
        assert_eq!(all.len(), 2);

        let scoped = f
            .engine
            .search("alpha", &SearchFilters::default().with_document(first.clone()))
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].uid, uid(&first, "GA"));

        let limited = f
            .engine
            .search("alpha", &SearchFilters::default().with_limit(1))
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_open_node_offers_hardening() {
        let f = fixture().await;
        let id = f.engine.register_document(&notes()).await.unwrap().document_id;
        let alpha = uid(&id, "GA");

        let view = f.engine.open_node(&alpha).await.unwrap().unwrap();
        assert_eq!(view.title, "Alpha");
        assert_eq!(view.rendered, "Alpha points at Beta");
        let patch = view.hardening.unwrap();
        assert!(patch.hardened.contains(uid(&id, "GB").to_string().as_str()));

        assert!(f.engine.apply_hardening(&patch).await.unwrap());
        f.engine.flush_now(&id).await.unwrap();

        let view = f.engine.open_node(&alpha).await.unwrap().unwrap();
        assert!(view.hardening.is_none());
        assert_eq!(view.rendered, "Alpha points at Beta");
        assert_eq!(f.engine.get_backlinks(&uid(&id, "GB")).await.len(), 1);
        assert!(f.engine.dangling_references().await.is_empty());

        let stale = f.engine.apply_hardening(&patch).await;
        assert!(matches!(stale, Err(EngineError::StalePatch { .. })));
    }

    #[tokio::test]
    async fn test_open_missing_node() {
        let f = fixture().await;
        let id = f.engine.register_document(&notes()).await.unwrap().document_id;
        assert!(f.engine.open_node(&uid(&id, "NOPE")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ambiguous_title_stays_unresolved() {
        let f = fixture().await;
        let twins = RawDocument::new("Twins")
            .with_node(RawNode::new("Gamma").with_guid("G1"))
            .with_node(RawNode::new("Gamma").with_guid("G2"))
            .with_node(RawNode::new("Pointer").with_guid("G3").with_body("see [[Gamma]]"));
        let id = f.engine.register_document(&twins).await.unwrap().document_id;

        let resolution = f.engine.resolve_link("gamma", Some(&id)).await;
        assert!(matches!(resolution, Resolution::Ambiguous(ref uids) if uids.len() == 2));
        assert_eq!(f.engine.unresolved_links(&id).await.len(), 1);
        assert!(f.engine.get_backlinks(&uid(&id, "G1")).await.is_empty());
    }

    #[tokio::test]
    async fn test_stats_count_documents() {
        let f = fixture().await;
        f.engine.register_document(&notes()).await.unwrap();
        let stats = f.engine.stats().await.unwrap();
        assert_eq!(stats.holder_id, "instance-a");
        assert_eq!(stats.storage.document_count, 1);
        assert_eq!(stats.corpus.documents, 1);
        assert_eq!(f.engine.documents().unwrap().len(), 1);
    }
}
