//! Persisted form of the graph store.
//!
//! All four maps are written as-is so loading needs no recomputation. The
//! reverse maps are then checked against the forward maps; any
//! disagreement means the blob cannot be trusted and the caller rebuilds.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crossref_types::{GroupId, Uid};

use crate::error::GraphError;
use crate::store::GraphStore;
use crate::types::{Membership, Mention};

/// Current graph snapshot version.
pub const GRAPH_SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub version: u32,
    pub memberships: BTreeMap<GroupId, Membership>,
    pub member_of: BTreeMap<Uid, BTreeSet<GroupId>>,
    pub mentions_out: BTreeMap<Uid, BTreeMap<Uid, Mention>>,
    pub mentions_in: BTreeMap<Uid, BTreeSet<Uid>>,
}

impl GraphStore {
    pub fn to_snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            version: GRAPH_SNAPSHOT_VERSION,
            memberships: self.memberships.clone(),
            member_of: self.member_of.clone(),
            mentions_out: self.mentions_out.clone(),
            mentions_in: self.mentions_in.clone(),
        }
    }

    #[instrument(skip(self))]
    pub fn to_bytes(&self) -> Result<Vec<u8>, GraphError> {
        Ok(serde_json::to_vec(&self.to_snapshot())?)
    }

    #[instrument(skip(bytes), fields(len = bytes.len()))]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, GraphError> {
        let snapshot: GraphSnapshot = serde_json::from_slice(bytes)?;
        let graph = Self::from_snapshot(snapshot)?;
        debug!(
            memberships = graph.membership_record_count(),
            mentions = graph.mention_count(),
            "Loaded graph snapshot"
        );
        Ok(graph)
    }

    pub fn from_snapshot(snapshot: GraphSnapshot) -> Result<Self, GraphError> {
        if snapshot.version != GRAPH_SNAPSHOT_VERSION {
            return Err(GraphError::UnsupportedVersion(snapshot.version));
        }
        let graph = GraphStore {
            memberships: snapshot.memberships,
            member_of: snapshot.member_of,
            mentions_out: snapshot.mentions_out,
            mentions_in: snapshot.mentions_in,
        };
        graph.verify()?;
        Ok(graph)
    }

    /// Check that every map agrees with the others.
    pub fn verify(&self) -> Result<(), GraphError> {
        // Forward memberships imply the reverse index exactly.
        let mut expected_member_of: BTreeMap<Uid, BTreeSet<GroupId>> = BTreeMap::new();
        for (group_id, membership) in &self.memberships {
            if &membership.group_id != group_id {
                return Err(GraphError::Corrupt(format!(
                    "membership stored under {} claims {}",
                    group_id, membership.group_id
                )));
            }
            if membership.members.is_empty() {
                return Err(GraphError::Corrupt(format!("empty membership {}", group_id)));
            }
            let unique: BTreeSet<&Uid> = membership.members.iter().collect();
            if unique.len() != membership.members.len() {
                return Err(GraphError::Corrupt(format!(
                    "duplicate member in {}",
                    group_id
                )));
            }
            for member in &membership.members {
                expected_member_of
                    .entry(member.clone())
                    .or_default()
                    .insert(group_id.clone());
            }
        }
        if expected_member_of != self.member_of {
            return Err(GraphError::Corrupt(
                "membership reverse index disagrees with memberships".into(),
            ));
        }

        let mut expected_mentions_in: BTreeMap<Uid, BTreeSet<Uid>> = BTreeMap::new();
        for (source, targets) in &self.mentions_out {
            if targets.is_empty() {
                return Err(GraphError::Corrupt(format!("empty mention list for {}", source)));
            }
            for (target, mention) in targets {
                if &mention.source != source || &mention.target != target {
                    return Err(GraphError::Corrupt(format!(
                        "mention {} -> {} stored under {} -> {}",
                        mention.source, mention.target, source, target
                    )));
                }
                if source == target {
                    return Err(GraphError::Corrupt(format!("self-mention on {}", source)));
                }
                expected_mentions_in
                    .entry(target.clone())
                    .or_default()
                    .insert(source.clone());
            }
        }
        if expected_mentions_in != self.mentions_in {
            return Err(GraphError::Corrupt(
                "mention reverse index disagrees with mentions".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MentionKind;

    fn uid(s: &str) -> Uid {
        Uid::parse(s).unwrap()
    }

    fn sample() -> GraphStore {
        let mut graph = GraphStore::new();
        graph.add_membership(Membership::new(
            GroupId::parse("D/g").unwrap(),
            "Team",
            vec![uid("D:A"), uid("D:B")],
        ));
        graph.add_mention(Mention {
            source: uid("D:A"),
            target: uid("E:C"),
            kind: MentionKind::Soft,
            excerpt: "see [[C]]".into(),
        });
        graph
    }

    #[test]
    fn test_round_trip_is_stable() {
        let graph = sample();
        let bytes = graph.to_bytes().unwrap();
        let loaded = GraphStore::from_bytes(&bytes).unwrap();
        assert_eq!(loaded, graph);
        assert_eq!(loaded.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_detects_reverse_map_drift() {
        let mut snapshot = sample().to_snapshot();
        snapshot.mentions_in.clear();
        let bytes = serde_json::to_vec(&snapshot).unwrap();
        assert!(matches!(
            GraphStore::from_bytes(&bytes),
            Err(GraphError::Corrupt(_))
        ));

        let mut snapshot = sample().to_snapshot();
        snapshot
            .member_of
            .insert(uid("D:Z"), [GroupId::parse("D/g").unwrap()].into_iter().collect());
        let bytes = serde_json::to_vec(&snapshot).unwrap();
        assert!(matches!(
            GraphStore::from_bytes(&bytes),
            Err(GraphError::Corrupt(_))
        ));
    }

    #[test]
    fn test_rejects_garbage_and_future_version() {
        assert!(matches!(
            GraphStore::from_bytes(b"{truncated"),
            Err(GraphError::Serialization(_))
        ));
        let mut snapshot = sample().to_snapshot();
        snapshot.version = 7;
        let bytes = serde_json::to_vec(&snapshot).unwrap();
        assert!(matches!(
            GraphStore::from_bytes(&bytes),
            Err(GraphError::UnsupportedVersion(7))
        ));
    }
}
