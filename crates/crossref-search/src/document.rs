//! Mapping from nodes to index entries and Tantivy documents.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tantivy::tokenizer::{LowerCaser, RemoveLongFilter, SimpleTokenizer, TextAnalyzer, TokenStream};
use tantivy::TantivyDocument;

use crossref_types::{DocumentId, Node, NodeGuid, SemanticType, Uid};

use crate::schema::SearchSchema;

/// Tokens longer than this are dropped, matching tantivy's default analyzer.
const MAX_TOKEN_LEN: usize = 40;

/// Search-optimized projection of a node.
///
/// Derived from the node on every reindex; never edited by hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub uid: Uid,
    pub document_id: DocumentId,
    pub title: String,
    /// Plain-text body that was indexed.
    pub body: String,
    /// Body as written, kept only when it carries link markup so mentions
    /// can be re-resolved without the source document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_body: Option<String>,
    /// Body tokens as produced by the analyzer.
    pub tokens: Vec<String>,
    pub tags: BTreeSet<String>,
    pub semantic_type: SemanticType,
    pub parent: Option<NodeGuid>,
    pub updated_at_ms: i64,
}

impl IndexEntry {
    /// Build an entry for `node`. `plain_body` is the body with link markup
    /// already reduced to display text.
    pub fn from_node(document_id: &DocumentId, node: &Node, plain_body: &str) -> Self {
        Self {
            uid: Uid::new(document_id.clone(), node.guid.clone()),
            document_id: document_id.clone(),
            title: node.title.clone(),
            body: plain_body.to_string(),
            linked_body: (node.body != plain_body).then(|| node.body.clone()),
            tokens: tokenize(plain_body),
            tags: node.tags.clone(),
            semantic_type: node.semantic_type.clone(),
            parent: node.parent.clone(),
            updated_at_ms: node.updated_at.timestamp_millis(),
        }
    }

    /// Convert to a Tantivy document.
    pub fn to_document(&self, schema: &SearchSchema) -> TantivyDocument {
        let mut doc = TantivyDocument::default();
        doc.add_text(schema.uid, self.uid.to_string());
        doc.add_text(schema.document_id, self.document_id.as_str());
        doc.add_text(schema.title, &self.title);
        doc.add_text(schema.body, &self.body);
        for tag in &self.tags {
            doc.add_text(schema.tags, tag);
        }
        doc.add_text(schema.semantic_type, self.semantic_type.tag());
        doc.add_i64(schema.updated_at, self.updated_at_ms);
        doc
    }
}

fn analyzer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(MAX_TOKEN_LEN))
        .filter(LowerCaser)
        .build()
}

/// Tokenize text the same way TEXT fields are tokenized at index time.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut analyzer = analyzer();
    let mut stream = analyzer.token_stream(text);
    let mut tokens = Vec::new();
    while stream.advance() {
        tokens.push(stream.token().text.clone());
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::build_node_schema;
    use chrono::{TimeZone, Utc};
    use crossref_types::NodeLayout;
    use tantivy::schema::Value;

    fn sample_node() -> Node {
        Node {
            guid: NodeGuid::parse("G1").unwrap(),
            legacy_id: None,
            title: "Alpha".into(),
            body: "See [[Beta]]".into(),
            semantic_type: SemanticType::Task,
            tags: ["urgent".to_string()].into_iter().collect(),
            parent: None,
            updated_at: Utc.timestamp_millis_opt(42_000).unwrap(),
            layout: NodeLayout::default(),
        }
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("Hello, World!"), vec!["hello", "world"]);
        assert!(tokenize("").is_empty());
        let long = "x".repeat(60);
        assert!(tokenize(&long).is_empty());
    }

    #[test]
    fn test_entry_from_node() {
        let doc = DocumentId::parse("D1").unwrap();
        let entry = IndexEntry::from_node(&doc, &sample_node(), "See Beta");
        assert_eq!(entry.uid.to_string(), "D1:G1");
        assert_eq!(entry.tokens, vec!["see", "beta"]);
        assert_eq!(entry.updated_at_ms, 42_000);
        assert_eq!(entry.linked_body.as_deref(), Some("See [[Beta]]"));
    }

    #[test]
    fn test_to_document() {
        let schema = build_node_schema();
        let doc = DocumentId::parse("D1").unwrap();
        let entry = IndexEntry::from_node(&doc, &sample_node(), "See Beta");
        let tdoc = entry.to_document(&schema);

        let uid = tdoc.get_first(schema.uid).and_then(|v| v.as_str());
        assert_eq!(uid, Some("D1:G1"));
        let ty = tdoc.get_first(schema.semantic_type).and_then(|v| v.as_str());
        assert_eq!(ty, Some("task"));
        let ts = tdoc.get_first(schema.updated_at).and_then(|v| v.as_i64());
        assert_eq!(ts, Some(42_000));
    }
}
