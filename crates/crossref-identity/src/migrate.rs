//! Normalization of host payloads into snapshots with stable identity.
//!
//! Nodes that already carry a guid keep it. A legacy node keeps the guid
//! stored under its legacy id, and one seen for the first time gets a guid
//! derived from the document id and that legacy id, so every instance
//! migrating the same legacy content agrees. A node with neither keeps the
//! guid of the previous node it matches, by title under the same parent and
//! then by title alone, so moving it does not change its identity; failing
//! a match it gets a freshly minted guid. Tree positions never feed into a
//! guid.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crossref_types::{
    DocumentId, DocumentSnapshot, GroupId, Grouping, Node, NodeGuid, RawDocument, RawNode,
    SemanticType, Uid, UID_SEPARATOR,
};

use crate::error::IdentityError;
use crate::infer::TypeInference;

/// Display name used when neither the payload nor the registry has one.
pub const UNTITLED_DOCUMENT: &str = "Untitled";

/// Guid for a node identified only by its host legacy id.
pub fn legacy_guid(document_id: &DocumentId, legacy_id: &str) -> NodeGuid {
    NodeGuid::derive(format!("{}\0legacy\0{}", document_id, legacy_id).as_bytes())
}

fn group_local_id(document_id: &DocumentId, seed: &str) -> String {
    NodeGuid::derive(format!("{}\0group\0{}", document_id, seed).as_bytes()).to_string()
}

/// Build a snapshot for `document_id` from a host payload.
///
/// `previous` is the last accepted snapshot, used to keep guids of nodes
/// the host sends without one, carry `updated_at` forward for unchanged nodes, and fill in a
/// missing display name, source or layout.
pub fn migrate_nodes(
    raw: &RawDocument,
    document_id: &DocumentId,
    previous: Option<&DocumentSnapshot>,
    now: DateTime<Utc>,
    infer: TypeInference,
) -> Result<DocumentSnapshot, IdentityError> {
    // Host references (guid, legacy id or local ref) to payload positions.
    let mut refs: HashMap<&str, usize> = HashMap::new();
    for (i, node) in raw.nodes.iter().enumerate() {
        let keys = [
            node.guid.as_deref(),
            node.legacy_id.as_deref(),
            node.local_ref.as_deref(),
        ];
        for key in keys.into_iter().flatten() {
            if refs.insert(key, i).is_some() {
                warn!(document_id = %document_id, reference = key, "Reference names several nodes; last one wins");
            }
        }
    }

    let parents: Vec<Option<usize>> = raw
        .nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            let parent = node.parent.as_deref()?;
            match refs.get(parent) {
                Some(&p) if p != i => Some(p),
                Some(_) => None,
                None => {
                    warn!(document_id = %document_id, parent, "Unknown parent reference; node becomes a root");
                    None
                }
            }
        })
        .collect();

    let guids = assign_guids(raw, document_id, previous, &parents)?;

    let has_children: HashSet<usize> = parents.iter().flatten().copied().collect();
    let nodes = raw
        .nodes
        .iter()
        .enumerate()
        .map(|(i, raw_node)| {
            let guid = guids[i].clone();
            let parent = parents[i].map(|p| guids[p].clone());
            let semantic_type = match raw_node.semantic_type.as_deref() {
                Some(tag) if !tag.trim().is_empty() => SemanticType::parse(tag),
                _ => infer(raw_node, has_children.contains(&i)),
            };
            let previous_node = previous.and_then(|p| p.node(&guid));
            build_node(raw_node, guid, parent, semantic_type, previous_node, now)
        })
        .collect();

    let groups = build_groups(raw, document_id, &refs, &guids)?;

    let display_name = match raw.display_name.trim() {
        "" => previous
            .map(|p| p.display_name.clone())
            .unwrap_or_else(|| UNTITLED_DOCUMENT.to_string()),
        name => name.to_string(),
    };

    let mut snapshot = DocumentSnapshot {
        document_id: document_id.clone(),
        display_name,
        source: raw
            .source
            .clone()
            .or_else(|| previous.and_then(|p| p.source.clone())),
        nodes,
        groups,
    };
    snapshot.normalize_order();
    Ok(snapshot)
}

fn build_node(
    raw: &RawNode,
    guid: NodeGuid,
    parent: Option<NodeGuid>,
    semantic_type: SemanticType,
    previous: Option<&Node>,
    now: DateTime<Utc>,
) -> Node {
    let tags: BTreeSet<String> = raw
        .tags
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    let unchanged = previous.filter(|p| {
        p.title == raw.title
            && p.body == raw.body
            && p.semantic_type == semantic_type
            && p.tags == tags
            && p.parent == parent
    });
    let updated_at = raw
        .updated_at
        .or_else(|| unchanged.map(|p| p.updated_at))
        .unwrap_or(now);
    let layout = raw
        .layout
        .clone()
        .or_else(|| previous.map(|p| p.layout.clone()))
        .unwrap_or_default();

    Node {
        guid,
        legacy_id: raw.legacy_id.clone(),
        title: raw.title.clone(),
        body: raw.body.clone(),
        semantic_type,
        tags,
        parent,
        updated_at,
        layout,
    }
}

fn build_groups(
    raw: &RawDocument,
    document_id: &DocumentId,
    refs: &HashMap<&str, usize>,
    guids: &[NodeGuid],
) -> Result<Vec<Grouping>, IdentityError> {
    let mut label_counts: HashMap<&str, usize> = HashMap::new();
    let mut taken = HashSet::new();
    let mut groups = Vec::new();

    for raw_group in &raw.groups {
        let local_id = match raw_group.id.as_deref() {
            Some(id) if GroupId::new(document_id.clone(), id).is_ok() => id.to_string(),
            other => {
                let label = raw_group.label.trim();
                let n = label_counts.entry(label).or_insert(0);
                *n += 1;
                let seed = match other {
                    Some(id) => format!("id\0{}", id),
                    None => format!("label\0{}\0{}", label, n),
                };
                group_local_id(document_id, &seed)
            }
        };
        if !taken.insert(local_id.clone()) {
            warn!(document_id = %document_id, group = %local_id, "Duplicate grouping id; keeping the first");
            continue;
        }

        let mut members: Vec<Uid> = Vec::new();
        let mut listed: HashSet<Uid> = HashSet::new();
        for member in &raw_group.members {
            let uid = if member.contains(UID_SEPARATOR) {
                Uid::parse(member).ok()
            } else {
                refs.get(member.as_str())
                    .map(|&i| Uid::new(document_id.clone(), guids[i].clone()))
            };
            match uid {
                Some(uid) => {
                    if listed.insert(uid.clone()) {
                        members.push(uid);
                    }
                }
                None => warn!(document_id = %document_id, member = %member, "Dropping unresolvable group member"),
            }
        }
        if members.is_empty() {
            debug!(document_id = %document_id, group = %local_id, "Skipping empty grouping");
            continue;
        }

        groups.push(Grouping {
            group_id: GroupId::new(document_id.clone(), &local_id)?,
            label: raw_group.label.clone(),
            members,
        });
    }
    Ok(groups)
}

/// Guids for every payload node, in payload order.
fn assign_guids(
    raw: &RawDocument,
    document_id: &DocumentId,
    previous: Option<&DocumentSnapshot>,
    parents: &[Option<usize>],
) -> Result<Vec<NodeGuid>, IdentityError> {
    let previous_by_legacy: HashMap<&str, &Node> = previous
        .map(|p| {
            p.nodes
                .iter()
                .filter_map(|n| n.legacy_id.as_deref().map(|l| (l, n)))
                .collect()
        })
        .unwrap_or_default();

    // Explicit guids and legacy matches claim their previous nodes first.
    // Only nodes that had no host identifier are open to a title match.
    let mut guids: Vec<Option<NodeGuid>> = Vec::with_capacity(raw.nodes.len());
    for node in &raw.nodes {
        let guid = match (&node.guid, &node.legacy_id) {
            (Some(guid), _) => Some(NodeGuid::parse(guid)?),
            (None, Some(legacy)) => previous_by_legacy
                .get(legacy.as_str())
                .map(|n| n.guid.clone()),
            (None, None) => None,
        };
        guids.push(guid);
    }

    let claimed: HashSet<NodeGuid> = guids.iter().flatten().cloned().collect();
    let mut unclaimed: HashMap<&str, Vec<&Node>> = HashMap::new();
    for node in previous
        .into_iter()
        .flat_map(|p| &p.nodes)
        .filter(|n| n.legacy_id.is_none() && !claimed.contains(&n.guid))
    {
        unclaimed.entry(node.title.as_str()).or_default().push(node);
    }

    let mut carried = 0usize;
    let mut created = 0usize;
    for i in parents_first(parents) {
        if guids[i].is_some() {
            continue;
        }
        let node = &raw.nodes[i];
        let parent = parents[i].and_then(|p| guids[p].clone());
        let matched = match node.legacy_id {
            Some(_) => None,
            None => unclaimed
                .get_mut(node.title.as_str())
                .and_then(|candidates| take_match(candidates, parent.as_ref())),
        };
        guids[i] = Some(match (matched, &node.legacy_id) {
            (Some(guid), _) => {
                carried += 1;
                guid
            }
            (None, Some(legacy)) => {
                created += 1;
                legacy_guid(document_id, legacy)
            }
            (None, None) => {
                created += 1;
                NodeGuid::mint()
            }
        });
    }
    if carried + created > 0 {
        debug!(document_id = %document_id, carried, created, "Assigned guids to nodes without one");
    }

    let guids: Vec<NodeGuid> = guids.into_iter().flatten().collect();
    let mut seen = HashSet::new();
    for guid in &guids {
        if !seen.insert(guid) {
            return Err(IdentityError::DuplicateGuid {
                document_id: document_id.clone(),
                guid: guid.clone(),
            });
        }
    }
    Ok(guids)
}

/// Take the previous node with the same title, preferring one under the
/// same parent.
fn take_match(candidates: &mut Vec<&Node>, parent: Option<&NodeGuid>) -> Option<NodeGuid> {
    if candidates.is_empty() {
        return None;
    }
    let pos = candidates
        .iter()
        .position(|c| c.parent.as_ref() == parent)
        .unwrap_or(0);
    Some(candidates.remove(pos).guid.clone())
}

/// Payload positions ordered so that every parent comes before its
/// children. Parent cycles are cut where they are detected.
fn parents_first(parents: &[Option<usize>]) -> Vec<usize> {
    let depths: Vec<usize> = (0..parents.len())
        .map(|i| {
            let mut depth = 0;
            let mut visited = HashSet::from([i]);
            let mut current = parents[i];
            while let Some(p) = current {
                if !visited.insert(p) {
                    break;
                }
                depth += 1;
                current = parents[p];
            }
            depth
        })
        .collect();
    let mut order: Vec<usize> = (0..parents.len()).collect();
    order.sort_by_key(|&i| depths[i]);
    order
}
