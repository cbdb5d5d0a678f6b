//! Document and node types.
//!
//! `Raw*` types are what the host editor hands over. They may lack
//! identifiers entirely. The identity resolver turns them into a
//! [`DocumentSnapshot`], in which every node carries a guid, parents are
//! guids and grouping members are full uids.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hash::{content_hash, ContentHash};
use crate::ids::{DocumentId, GroupId, NodeGuid, Uid};

/// Normalize a title for soft-link matching: trimmed, inner whitespace
/// collapsed to single spaces, lowercased.
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// What kind of thing a node is.
///
/// Unknown tags are kept verbatim in `Other` so that type filters still
/// work for host-specific kinds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SemanticType {
    Note,
    Task,
    Claim,
    Question,
    Reference,
    Phase,
    Item,
    Other(String),
}

impl SemanticType {
    /// Parse a tag. Never fails; blank tags become `Note`.
    pub fn parse(tag: &str) -> Self {
        let tag = tag.trim().to_lowercase();
        match tag.as_str() {
            "" | "note" => Self::Note,
            "task" => Self::Task,
            "claim" => Self::Claim,
            "question" => Self::Question,
            "reference" => Self::Reference,
            "phase" => Self::Phase,
            "item" => Self::Item,
            _ => Self::Other(tag),
        }
    }

    /// Lowercase tag used in the index and in filters.
    pub fn tag(&self) -> &str {
        match self {
            Self::Note => "note",
            Self::Task => "task",
            Self::Claim => "claim",
            Self::Question => "question",
            Self::Reference => "reference",
            Self::Phase => "phase",
            Self::Item => "item",
            Self::Other(tag) => tag,
        }
    }
}

impl Default for SemanticType {
    fn default() -> Self {
        Self::Note
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl From<String> for SemanticType {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<SemanticType> for String {
    fn from(value: SemanticType) -> Self {
        value.tag().to_string()
    }
}

/// Presentational state. Never part of the content hash.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeLayout {
    #[serde(default)]
    pub x: f64,
    #[serde(default)]
    pub y: f64,
    #[serde(default)]
    pub collapsed: bool,
}

/// Where the host loaded a document from (file path, handle, URL).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceFingerprint(pub String);

impl SourceFingerprint {
    pub fn new(source: impl Into<String>) -> Self {
        Self(source.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A node as supplied by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawNode {
    #[serde(default)]
    pub guid: Option<String>,

    /// Host positional id. Used only to derive a guid once and to resolve
    /// parent and member references inside the same payload.
    #[serde(default)]
    pub legacy_id: Option<String>,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub body: String,

    #[serde(default)]
    pub semantic_type: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Handle other nodes of the same payload use to name this one as
    /// parent or group member. Never stored and never turned into a guid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_ref: Option<String>,

    /// Guid, legacy id or local ref of the parent node.
    #[serde(default)]
    pub parent: Option<String>,

    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub layout: Option<NodeLayout>,
}

impl RawNode {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        self.guid = Some(guid.into());
        self
    }

    pub fn with_legacy_id(mut self, id: impl Into<String>) -> Self {
        self.legacy_id = Some(id.into());
        self
    }

    pub fn with_local_ref(mut self, local_ref: impl Into<String>) -> Self {
        self.local_ref = Some(local_ref.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_type(mut self, tag: impl Into<String>) -> Self {
        self.semantic_type = Some(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_layout(mut self, layout: NodeLayout) -> Self {
        self.layout = Some(layout);
        self
    }
}

/// An explicit n-ary grouping as supplied by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawGrouping {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub label: String,

    /// Local guids, local legacy ids, or full uids of other documents.
    #[serde(default)]
    pub members: Vec<String>,
}

/// A document as supplied by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    #[serde(default)]
    pub document_id: Option<String>,

    #[serde(default)]
    pub display_name: String,

    #[serde(default)]
    pub source: Option<SourceFingerprint>,

    #[serde(default)]
    pub nodes: Vec<RawNode>,

    #[serde(default)]
    pub groups: Vec<RawGrouping>,
}

impl RawDocument {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.document_id = Some(id.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(SourceFingerprint::new(source));
        self
    }

    pub fn with_node(mut self, node: RawNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_group(mut self, group: RawGrouping) -> Self {
        self.groups.push(group);
        self
    }
}

/// A normalized node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub guid: NodeGuid,
    #[serde(default)]
    pub legacy_id: Option<String>,
    pub title: String,
    pub body: String,
    pub semantic_type: SemanticType,
    pub tags: BTreeSet<String>,
    pub parent: Option<NodeGuid>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub layout: NodeLayout,
}

/// A normalized grouping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grouping {
    pub group_id: GroupId,
    pub label: String,
    pub members: Vec<Uid>,
}

/// A document with fully resolved identity. Nodes are kept in guid order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSnapshot {
    pub document_id: DocumentId,
    pub display_name: String,
    pub source: Option<SourceFingerprint>,
    pub nodes: Vec<Node>,
    pub groups: Vec<Grouping>,
}

impl DocumentSnapshot {
    pub fn uid_of(&self, guid: &NodeGuid) -> Uid {
        Uid::new(self.document_id.clone(), guid.clone())
    }

    /// All node uids, in guid order.
    pub fn uids(&self) -> Vec<Uid> {
        self.nodes.iter().map(|n| self.uid_of(&n.guid)).collect()
    }

    pub fn node(&self, guid: &NodeGuid) -> Option<&Node> {
        self.nodes
            .binary_search_by(|n| n.guid.cmp(guid))
            .ok()
            .map(|i| &self.nodes[i])
    }

    pub fn content_hash(&self) -> ContentHash {
        content_hash(self)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Re-sort nodes by guid. Called after any mutation of `nodes`.
    pub fn normalize_order(&mut self) {
        self.nodes.sort_by(|a, b| a.guid.cmp(&b.guid));
        self.groups.sort_by(|a, b| a.group_id.cmp(&b.group_id));
    }

    /// Same content under another document id. Node guids travel with the
    /// content; group ids and intra-document member uids are re-homed.
    pub fn rehome(&self, document_id: DocumentId) -> Result<Self, crate::CrossrefError> {
        let old = &self.document_id;
        let groups = self
            .groups
            .iter()
            .map(|g| {
                let members = g
                    .members
                    .iter()
                    .map(|m| {
                        if m.belongs_to(old) {
                            Uid::new(document_id.clone(), m.node_guid().clone())
                        } else {
                            m.clone()
                        }
                    })
                    .collect();
                Ok(Grouping {
                    group_id: GroupId::new(document_id.clone(), g.group_id.local_id())?,
                    label: g.label.clone(),
                    members,
                })
            })
            .collect::<Result<Vec<_>, crate::CrossrefError>>()?;
        let mut snapshot = Self {
            document_id,
            display_name: self.display_name.clone(),
            source: self.source.clone(),
            nodes: self.nodes.clone(),
            groups,
        };
        snapshot.normalize_order();
        Ok(snapshot)
    }
}
