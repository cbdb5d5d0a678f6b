//! Snapshot builders shared by the unit tests.

use chrono::{TimeZone, Utc};
use crossref_types::{
    DocumentId, DocumentSnapshot, GroupId, Grouping, Node, NodeGuid, NodeLayout, SemanticType, Uid,
};

pub fn uid(doc: &str, guid: &str) -> Uid {
    Uid::new(DocumentId::parse(doc).unwrap(), NodeGuid::parse(guid).unwrap())
}

pub fn node(guid: &str, title: &str, body: &str) -> Node {
    Node {
        guid: NodeGuid::parse(guid).unwrap(),
        legacy_id: None,
        title: title.to_string(),
        body: body.to_string(),
        semantic_type: SemanticType::Note,
        tags: Default::default(),
        parent: None,
        updated_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        layout: NodeLayout::default(),
    }
}

pub fn doc(id: &str, nodes: Vec<Node>) -> DocumentSnapshot {
    let mut snapshot = DocumentSnapshot {
        document_id: DocumentId::parse(id).unwrap(),
        display_name: format!("Document {id}"),
        source: None,
        nodes,
        groups: Vec::new(),
    };
    snapshot.normalize_order();
    snapshot
}

/// A document with one node per guid and a single grouping over `members`
/// (full uid strings).
pub fn snapshot_with_group(id: &str, guids: &[&str], members: &[&str]) -> DocumentSnapshot {
    let mut snapshot = doc(
        id,
        guids.iter().map(|g| node(g, &format!("Node {g}"), "")).collect(),
    );
    snapshot.groups.push(Grouping {
        group_id: GroupId::new(snapshot.document_id.clone(), "team").unwrap(),
        label: "Team".to_string(),
        members: members.iter().map(|m| Uid::parse(m).unwrap()).collect(),
    });
    snapshot
}

/// Index entries for every node of a snapshot, in guid order.
pub fn entries_for(snapshot: &DocumentSnapshot) -> Vec<crossref_search::IndexEntry> {
    snapshot
        .nodes
        .iter()
        .map(|node| crate::corpus::entry_for(&snapshot.document_id, node))
        .collect()
}
