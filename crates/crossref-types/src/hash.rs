//! Content hashing for dirty detection and fork checks.
//!
//! Only content fields feed the hash: title, body, type, tags, parent and
//! grouping structure. Display name, source, layout, timestamps and the
//! document id itself are excluded, so a relocated or renamed copy of a
//! document hashes the same as the original.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

use crate::document::DocumentSnapshot;
use crate::error::CrossrefError;

/// 128-bit content digest, rendered as 32 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(u128);

impl ContentHash {
    pub fn from_u128(value: u128) -> Self {
        Self(value)
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for ContentHash {
    type Err = CrossrefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        u128::from_str_radix(s, 16)
            .map(Self)
            .map_err(|e| CrossrefError::InvalidInput(format!("bad content hash {}: {}", s, e)))
    }
}

impl TryFrom<String> for ContentHash {
    type Error = CrossrefError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentHash> for String {
    fn from(value: ContentHash) -> Self {
        value.to_string()
    }
}

/// Length-prefixed writes so that field boundaries cannot collide.
struct Canonical(Xxh3);

impl Canonical {
    fn field(&mut self, bytes: &[u8]) {
        self.0.update(&(bytes.len() as u64).to_le_bytes());
        self.0.update(bytes);
    }

    fn count(&mut self, n: usize) {
        self.0.update(&(n as u64).to_le_bytes());
    }
}

/// Hash the content of a snapshot.
pub fn content_hash(snapshot: &DocumentSnapshot) -> ContentHash {
    let mut h = Canonical(Xxh3::new());

    let mut nodes: Vec<_> = snapshot.nodes.iter().collect();
    nodes.sort_by(|a, b| a.guid.cmp(&b.guid));
    h.count(nodes.len());
    for node in nodes {
        h.field(node.guid.as_str().as_bytes());
        h.field(node.title.as_bytes());
        h.field(node.body.as_bytes());
        h.field(node.semantic_type.tag().as_bytes());
        h.count(node.tags.len());
        for tag in &node.tags {
            h.field(tag.as_bytes());
        }
        match &node.parent {
            Some(parent) => {
                h.0.update(&[1]);
                h.field(parent.as_str().as_bytes());
            }
            None => h.0.update(&[0]),
        }
    }

    let mut groups: Vec<_> = snapshot.groups.iter().collect();
    groups.sort_by(|a, b| a.group_id.local_id().cmp(b.group_id.local_id()));
    h.count(groups.len());
    for group in groups {
        h.field(group.group_id.local_id().as_bytes());
        h.field(group.label.as_bytes());
        let mut members: Vec<String> = group
            .members
            .iter()
            .map(|m| {
                if m.belongs_to(&snapshot.document_id) {
                    format!(":{}", m.node_guid())
                } else {
                    m.to_string()
                }
            })
            .collect();
        members.sort();
        h.count(members.len());
        for member in &members {
            h.field(member.as_bytes());
        }
    }

    ContentHash(h.0.digest128())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Node, NodeLayout, SemanticType};
    use crate::ids::{DocumentId, NodeGuid};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeSet;

    fn node(guid: &str, title: &str) -> Node {
        Node {
            guid: NodeGuid::parse(guid).unwrap(),
            legacy_id: None,
            title: title.to_string(),
            body: String::new(),
            semantic_type: SemanticType::Note,
            tags: BTreeSet::new(),
            parent: None,
            updated_at: Utc.timestamp_millis_opt(1_000).unwrap(),
            layout: NodeLayout::default(),
        }
    }

    fn snapshot(nodes: Vec<Node>) -> DocumentSnapshot {
        DocumentSnapshot {
            document_id: DocumentId::parse("DOC").unwrap(),
            display_name: "Doc".into(),
            source: None,
            nodes,
            groups: Vec::new(),
        }
    }

    #[test]
    fn test_presentational_fields_excluded() {
        let a = snapshot(vec![node("A", "Alpha")]);
        let mut b = a.clone();
        b.display_name = "Renamed".into();
        b.nodes[0].layout = NodeLayout {
            x: 10.0,
            y: 5.0,
            collapsed: true,
        };
        b.nodes[0].updated_at = Utc.timestamp_millis_opt(99_000).unwrap();
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_content_fields_included() {
        let a = snapshot(vec![node("A", "Alpha")]);
        let mut b = a.clone();
        b.nodes[0].body = "changed".into();
        assert_ne!(content_hash(&a), content_hash(&b));

        let mut c = a.clone();
        c.nodes[0].tags.insert("x".into());
        assert_ne!(content_hash(&a), content_hash(&c));
    }

    #[test]
    fn test_field_boundaries() {
        let a = snapshot(vec![node("A", "ab")]);
        let mut b = snapshot(vec![node("A", "a")]);
        b.nodes[0].body = "b".into();
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn test_hex_roundtrip() {
        let h = content_hash(&snapshot(vec![node("A", "Alpha")]));
        let text = h.to_string();
        assert_eq!(text.len(), 32);
        assert_eq!(text.parse::<ContentHash>().unwrap(), h);
    }
}
