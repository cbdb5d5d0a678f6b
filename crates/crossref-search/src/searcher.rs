//! Search implementation using BM25 scoring.
//!
//! Title matches weigh more than tag matches, which weigh more than body
//! matches. Ties are broken by most recent update, then by uid, so equal
//! input always yields equal output.

use std::cmp::Ordering;

use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, QueryParser, TermQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::Term;
use tracing::debug;

use crossref_types::{DocumentId, SemanticType, Uid};

use crate::error::SearchError;
use crate::index::SearchIndex;

/// Boost applied to title matches.
pub const TITLE_BOOST: f32 = 3.0;

/// Boost applied to tag matches.
pub const TAGS_BOOST: f32 = 1.5;

/// A search result with relevance score.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub uid: Uid,
    pub title: String,
    pub semantic_type: SemanticType,
    /// BM25 relevance score
    pub score: f32,
    pub updated_at_ms: i64,
}

/// Search options for filtering and limiting results.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// Maximum results to return
    pub limit: usize,
    /// Only nodes of this type
    pub semantic_type: Option<SemanticType>,
    /// Only nodes of these documents (empty = all)
    pub document_scope: Vec<DocumentId>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 20,
            semantic_type: None,
            document_scope: Vec::new(),
        }
    }
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_type(mut self, semantic_type: SemanticType) -> Self {
        self.semantic_type = Some(semantic_type);
        self
    }

    pub fn with_document(mut self, document_id: DocumentId) -> Self {
        self.document_scope.push(document_id);
        self
    }
}

/// Searcher over the published state of a [`SearchIndex`].
pub struct NodeSearcher<'a> {
    index: &'a SearchIndex,
    query_parser: QueryParser,
}

impl<'a> NodeSearcher<'a> {
    pub fn new(index: &'a SearchIndex) -> Self {
        let schema = index.schema();
        let mut query_parser = QueryParser::for_index(
            index.index(),
            vec![schema.title, schema.tags, schema.body],
        );
        query_parser.set_field_boost(schema.title, TITLE_BOOST);
        query_parser.set_field_boost(schema.tags, TAGS_BOOST);
        Self {
            index,
            query_parser,
        }
    }

    /// Search with a query string.
    pub fn search(
        &self,
        query_str: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>, SearchError> {
        if query_str.trim().is_empty() || options.limit == 0 {
            return Ok(Vec::new());
        }

        let schema = self.index.schema();
        let searcher = self.index.reader().searcher();

        // User text may contain syntax characters; never fail on it.
        let (text_query, errors) = self.query_parser.parse_query_lenient(query_str);
        if !errors.is_empty() {
            debug!(query = query_str, errors = errors.len(), "Lenient query parse");
        }

        let mut clauses: Vec<(Occur, Box<dyn Query>)> = vec![(Occur::Must, text_query)];

        if let Some(semantic_type) = &options.semantic_type {
            let term = Term::from_field_text(schema.semantic_type, semantic_type.tag());
            clauses.push((
                Occur::Must,
                Box::new(TermQuery::new(term, IndexRecordOption::Basic)),
            ));
        }

        if !options.document_scope.is_empty() {
            let scope: Vec<(Occur, Box<dyn Query>)> = options
                .document_scope
                .iter()
                .map(|doc| {
                    let term = Term::from_field_text(schema.document_id, doc.as_str());
                    let query: Box<dyn Query> =
                        Box::new(TermQuery::new(term, IndexRecordOption::Basic));
                    (Occur::Should, query)
                })
                .collect();
            clauses.push((Occur::Must, Box::new(BooleanQuery::new(scope))));
        }

        let final_query = BooleanQuery::new(clauses);

        // Overfetch so the recency tie-break is applied over more than the cut.
        let fetch = options.limit.saturating_mul(4).max(options.limit + 32);
        let top_docs = searcher.search(&final_query, &TopDocs::with_limit(fetch))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: tantivy::TantivyDocument = searcher.doc(doc_address)?;

            let Some(uid) = doc
                .get_first(schema.uid)
                .and_then(|v| v.as_str())
                .and_then(|s| Uid::parse(s).ok())
            else {
                continue;
            };

            // The catalog is the source of truth for what is published.
            let Some(entry) = self.index.get(&uid) else {
                continue;
            };

            let updated_at_ms = doc
                .get_first(schema.updated_at)
                .and_then(|v| v.as_i64())
                .unwrap_or(entry.updated_at_ms);

            hits.push(SearchHit {
                uid,
                title: entry.title.clone(),
                semantic_type: entry.semantic_type.clone(),
                score,
                updated_at_ms,
            });
        }

        hits.sort_by(rank);
        hits.truncate(options.limit);

        debug!(query = query_str, results = hits.len(), "Search complete");
        Ok(hits)
    }
}

/// Score descending, then most recent first, then uid ascending.
fn rank(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.updated_at_ms.cmp(&a.updated_at_ms))
        .then_with(|| a.uid.cmp(&b.uid))
}

impl SearchIndex {
    /// Search the published state of this index.
    pub fn search(
        &self,
        query_str: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>, SearchError> {
        NodeSearcher::new(self).search(query_str, options)
    }
}
