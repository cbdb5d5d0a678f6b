//! Graph data types.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crossref_types::{GroupId, Uid};

/// Kind of relationship between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    /// Strong edge from an explicit grouping
    Membership,
    /// Weak edge from a textual reference
    Mention,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Membership => "membership",
            EdgeKind::Mention => "mention",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "membership" | "member" | "group" => Some(EdgeKind::Membership),
            "mention" | "link" => Some(EdgeKind::Mention),
            _ => None,
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a mention was written in the source body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MentionKind {
    /// `[[Title]]`, resolved by title
    Soft,
    /// `[[uid:DOC:GUID]]`
    Hard,
}

/// One grouping stored as a single entity with its member list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub group_id: GroupId,
    pub label: String,
    /// Members in declaration order, without duplicates.
    pub members: Vec<Uid>,
}

impl Membership {
    pub fn new(group_id: GroupId, label: impl Into<String>, members: Vec<Uid>) -> Self {
        let mut seen = BTreeSet::new();
        let members = members
            .into_iter()
            .filter(|m| seen.insert(m.clone()))
            .collect();
        Self {
            group_id,
            label: label.into(),
            members,
        }
    }

    /// Members other than `uid`.
    pub fn siblings_of(&self, uid: &Uid) -> Vec<Uid> {
        self.members.iter().filter(|m| *m != uid).cloned().collect()
    }
}

/// Directed textual reference from one node to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    pub source: Uid,
    pub target: Uid,
    pub kind: MentionKind,
    /// Text around the reference in the source body.
    pub excerpt: String,
}

/// Reverse view of an edge, carrying what is needed to render it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backlink {
    Membership {
        group_id: GroupId,
        label: String,
        siblings: Vec<Uid>,
    },
    Mention {
        source: Uid,
        kind: MentionKind,
        excerpt: String,
    },
}

impl Backlink {
    pub fn edge_kind(&self) -> EdgeKind {
        match self {
            Backlink::Membership { .. } => EdgeKind::Membership,
            Backlink::Mention { .. } => EdgeKind::Mention,
        }
    }
}

/// Which way mention edges are followed during traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
    #[default]
    Both,
}

/// Traversal options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraverseOptions {
    pub kinds: BTreeSet<EdgeKind>,
    pub max_depth: usize,
    pub direction: Direction,
}

impl Default for TraverseOptions {
    fn default() -> Self {
        Self {
            kinds: [EdgeKind::Membership, EdgeKind::Mention].into_iter().collect(),
            max_depth: 2,
            direction: Direction::Both,
        }
    }
}

impl TraverseOptions {
    pub fn with_kinds<I: IntoIterator<Item = EdgeKind>>(mut self, kinds: I) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }
}

/// One node reached during traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalStep {
    pub uid: Uid,
    pub depth: usize,
    pub via: EdgeKind,
    /// Node this one was reached from.
    pub from: Uid,
}

/// What a purge removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub mentions_removed: usize,
    pub memberships_touched: usize,
    pub memberships_removed: usize,
}

impl PurgeReport {
    pub fn merge(&mut self, other: PurgeReport) {
        self.mentions_removed += other.mentions_removed;
        self.memberships_touched += other.memberships_touched;
        self.memberships_removed += other.memberships_removed;
    }

    pub fn is_empty(&self) -> bool {
        self.mentions_removed == 0 && self.memberships_touched == 0 && self.memberships_removed == 0
    }
}
