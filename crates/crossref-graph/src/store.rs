//! The graph store.
//!
//! Nodes are referred to only by uid, so cycles are plain data. Four flat
//! maps hold everything:
//!
//! - `memberships`: group id -> one membership entity with its member list
//! - `member_of`: uid -> groups it belongs to
//! - `mentions_out`: source uid -> target uid -> mention
//! - `mentions_in`: target uid -> source uids
//!
//! A grouping of n members costs n member-list slots plus n reverse
//! entries. It is never expanded into pairwise edges.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, error, instrument};

use crossref_types::{DocumentId, GroupId, Uid};

use crate::types::{Backlink, Membership, Mention, PurgeReport};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphStore {
    pub(crate) memberships: BTreeMap<GroupId, Membership>,
    pub(crate) member_of: BTreeMap<Uid, BTreeSet<GroupId>>,
    pub(crate) mentions_out: BTreeMap<Uid, BTreeMap<Uid, Mention>>,
    pub(crate) mentions_in: BTreeMap<Uid, BTreeSet<Uid>>,
}

impl GraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Memberships ====================

    /// Add or replace a grouping. O(k) in the number of members.
    pub fn add_membership(&mut self, membership: Membership) {
        self.remove_membership(&membership.group_id);
        if membership.members.is_empty() {
            return;
        }
        for member in &membership.members {
            self.member_of
                .entry(member.clone())
                .or_default()
                .insert(membership.group_id.clone());
        }
        self.memberships
            .insert(membership.group_id.clone(), membership);
    }

    /// Remove a grouping and its reverse entries.
    pub fn remove_membership(&mut self, group_id: &GroupId) -> Option<Membership> {
        let membership = self.memberships.remove(group_id)?;
        for member in &membership.members {
            if let Some(groups) = self.member_of.get_mut(member) {
                groups.remove(group_id);
                if groups.is_empty() {
                    self.member_of.remove(member);
                }
            }
        }
        Some(membership)
    }

    pub fn membership(&self, group_id: &GroupId) -> Option<&Membership> {
        self.memberships.get(group_id)
    }

    pub fn group_ids(&self) -> impl Iterator<Item = &GroupId> {
        self.memberships.keys()
    }

    /// Groups a node belongs to.
    pub fn groups_of(&self, uid: &Uid) -> Vec<&Membership> {
        self.member_of
            .get(uid)
            .map(|groups| {
                groups
                    .iter()
                    .filter_map(|g| self.memberships.get(g))
                    .collect()
            })
            .unwrap_or_default()
    }

    // ==================== Mentions ====================

    /// Add a mention. Self-mentions are ignored and the first mention
    /// between a pair is kept. Returns whether the mention was stored.
    pub fn add_mention(&mut self, mention: Mention) -> bool {
        if mention.source == mention.target {
            return false;
        }
        let targets = self.mentions_out.entry(mention.source.clone()).or_default();
        if targets.contains_key(&mention.target) {
            return false;
        }
        self.mentions_in
            .entry(mention.target.clone())
            .or_default()
            .insert(mention.source.clone());
        targets.insert(mention.target.clone(), mention);
        true
    }

    /// Remove one mention edge.
    pub fn remove_mention(&mut self, source: &Uid, target: &Uid) -> Option<Mention> {
        let targets = self.mentions_out.get_mut(source)?;
        let mention = targets.remove(target)?;
        if targets.is_empty() {
            self.mentions_out.remove(source);
        }
        if let Some(sources) = self.mentions_in.get_mut(target) {
            sources.remove(source);
            if sources.is_empty() {
                self.mentions_in.remove(target);
            }
        }
        Some(mention)
    }

    /// Mentions written in `uid`'s body.
    pub fn outgoing(&self, uid: &Uid) -> Vec<&Mention> {
        self.mentions_out
            .get(uid)
            .map(|targets| targets.values().collect())
            .unwrap_or_default()
    }

    /// Sources that mention `uid`.
    pub fn incoming(&self, uid: &Uid) -> Vec<&Mention> {
        self.mentions_in
            .get(uid)
            .map(|sources| {
                sources
                    .iter()
                    .filter_map(|s| self.mentions_out.get(s).and_then(|t| t.get(uid)))
                    .collect()
            })
            .unwrap_or_default()
    }

    // ==================== Bulk replacement ====================

    /// Replace every edge a document declares: its groupings and the
    /// mentions written in its nodes. Incoming edges from other documents
    /// are untouched.
    #[instrument(skip(self, memberships, mentions), fields(document_id = %document_id))]
    pub fn replace_document_edges(
        &mut self,
        document_id: &DocumentId,
        memberships: Vec<Membership>,
        mentions: Vec<Mention>,
    ) {
        let owned_groups: Vec<GroupId> = self
            .memberships
            .keys()
            .filter(|g| g.owner() == document_id)
            .cloned()
            .collect();
        for group_id in owned_groups {
            self.remove_membership(&group_id);
        }

        let sources: Vec<Uid> = self
            .mentions_out
            .keys()
            .filter(|u| u.belongs_to(document_id))
            .cloned()
            .collect();
        for source in sources {
            self.remove_outgoing(&source);
        }

        let group_count = memberships.len();
        for membership in memberships {
            self.add_membership(membership);
        }
        let mut stored = 0;
        for mention in mentions {
            if self.add_mention(mention) {
                stored += 1;
            }
        }
        debug!(groups = group_count, mentions = stored, "Replaced document edges");
    }

    /// Replace the mentions written in one node's body. Returns whether
    /// the stored edges changed.
    pub fn replace_outgoing(&mut self, source: &Uid, mentions: Vec<Mention>) -> bool {
        let mut wanted: BTreeMap<Uid, Mention> = BTreeMap::new();
        for mention in mentions {
            if &mention.source == source && mention.target != *source {
                wanted.entry(mention.target.clone()).or_insert(mention);
            }
        }

        let current = self.mentions_out.get(source);
        let unchanged = match current {
            Some(targets) => targets == &wanted,
            None => wanted.is_empty(),
        };
        if unchanged {
            return false;
        }

        self.remove_outgoing(source);
        for mention in wanted.into_values() {
            self.add_mention(mention);
        }
        true
    }

    fn remove_outgoing(&mut self, source: &Uid) -> usize {
        let Some(targets) = self.mentions_out.remove(source) else {
            return 0;
        };
        for target in targets.keys() {
            if let Some(sources) = self.mentions_in.get_mut(target) {
                sources.remove(source);
                if sources.is_empty() {
                    self.mentions_in.remove(target);
                }
            }
        }
        targets.len()
    }

    fn remove_incoming(&mut self, target: &Uid) -> usize {
        let Some(sources) = self.mentions_in.remove(target) else {
            return 0;
        };
        let mut removed = 0;
        for source in &sources {
            if let Some(targets) = self.mentions_out.get_mut(source) {
                if targets.remove(target).is_some() {
                    removed += 1;
                }
                if targets.is_empty() {
                    self.mentions_out.remove(source);
                }
            }
        }
        removed
    }

    // ==================== Per-document parts ====================

    /// The edges a document owns: the groupings it declares and the
    /// mentions written in its nodes. Edges other documents point at it
    /// are not included.
    pub fn document_part(&self, document_id: &DocumentId) -> GraphStore {
        let mut part = GraphStore::new();
        for membership in self
            .memberships
            .values()
            .filter(|m| m.group_id.owner() == document_id)
        {
            part.add_membership(membership.clone());
        }
        for (_, targets) in self
            .mentions_out
            .iter()
            .filter(|(source, _)| source.belongs_to(document_id))
        {
            for mention in targets.values() {
                part.add_mention(mention.clone());
            }
        }
        part
    }

    /// Add every edge of `part`. A grouping already present under the same
    /// id is replaced.
    pub fn merge(&mut self, part: GraphStore) {
        for membership in part.memberships.into_values() {
            self.add_membership(membership);
        }
        for targets in part.mentions_out.into_values() {
            for mention in targets.into_values() {
                self.add_mention(mention);
            }
        }
    }

    // ==================== Purge ====================

    /// Remove nodes from the graph entirely.
    ///
    /// For every uid this drops (1) the mentions it writes, (2) the reverse
    /// entries pointing at it, which are other nodes' outgoing mentions, and
    /// (3) its slot in every grouping. Groupings left empty are removed.
    pub fn purge_uids<'a, I>(&mut self, uids: I) -> PurgeReport
    where
        I: IntoIterator<Item = &'a Uid>,
    {
        let mut report = PurgeReport::default();
        for uid in uids {
            report.mentions_removed += self.remove_outgoing(uid);
            report.mentions_removed += self.remove_incoming(uid);

            if let Some(groups) = self.member_of.remove(uid) {
                for group_id in groups {
                    let now_empty = match self.memberships.get_mut(&group_id) {
                        Some(membership) => {
                            membership.members.retain(|m| m != uid);
                            report.memberships_touched += 1;
                            membership.members.is_empty()
                        }
                        None => false,
                    };
                    if now_empty {
                        self.memberships.remove(&group_id);
                        report.memberships_removed += 1;
                    }
                }
            }
        }
        report
    }

    /// Remove a whole document: every one of its uids (three-way, as in
    /// [`purge_uids`](Self::purge_uids)) plus every grouping it owns.
    #[instrument(skip(self), fields(document_id = %document_id))]
    pub fn purge_document(&mut self, document_id: &DocumentId) -> PurgeReport {
        let uids: BTreeSet<Uid> = self
            .referenced_uids()
            .into_iter()
            .filter(|u| u.belongs_to(document_id))
            .collect();

        let mut report = self.purge_uids(uids.iter());

        let owned: Vec<GroupId> = self
            .memberships
            .keys()
            .filter(|g| g.owner() == document_id)
            .cloned()
            .collect();
        for group_id in owned {
            if self.remove_membership(&group_id).is_some() {
                report.memberships_removed += 1;
            }
        }

        debug!(
            uids = uids.len(),
            mentions_removed = report.mentions_removed,
            memberships_removed = report.memberships_removed,
            "Purged document from graph"
        );
        report
    }

    // ==================== Queries ====================

    /// Everything pointing at `uid`: groupings it is in (with siblings) and
    /// mentions of it (with excerpts).
    pub fn get_backlinks(&self, uid: &Uid) -> Vec<Backlink> {
        let mut backlinks = Vec::new();
        for membership in self.groups_of(uid) {
            backlinks.push(Backlink::Membership {
                group_id: membership.group_id.clone(),
                label: membership.label.clone(),
                siblings: membership.siblings_of(uid),
            });
        }
        for mention in self.incoming(uid) {
            backlinks.push(Backlink::Mention {
                source: mention.source.clone(),
                kind: mention.kind,
                excerpt: mention.excerpt.clone(),
            });
        }
        backlinks
    }

    /// Whether `uid` appears anywhere in the graph.
    pub fn references(&self, uid: &Uid) -> bool {
        self.member_of.contains_key(uid)
            || self.mentions_out.contains_key(uid)
            || self.mentions_in.contains_key(uid)
    }

    /// Every uid that appears in any edge.
    pub fn referenced_uids(&self) -> BTreeSet<Uid> {
        let mut uids = BTreeSet::new();
        uids.extend(self.member_of.keys().cloned());
        for membership in self.memberships.values() {
            uids.extend(membership.members.iter().cloned());
        }
        for (source, targets) in &self.mentions_out {
            uids.insert(source.clone());
            uids.extend(targets.keys().cloned());
        }
        uids.extend(self.mentions_in.keys().cloned());
        uids
    }

    /// Referenced uids for which `exists` is false.
    pub fn dangling_uids<F>(&self, exists: F) -> BTreeSet<Uid>
    where
        F: Fn(&Uid) -> bool,
    {
        self.referenced_uids()
            .into_iter()
            .filter(|u| !exists(u))
            .collect()
    }

    /// Purge dangling uids. Finding any means an earlier purge was missed,
    /// so it is logged as an error.
    pub fn force_purge_dangling<F>(&mut self, exists: F) -> BTreeSet<Uid>
    where
        F: Fn(&Uid) -> bool,
    {
        let dangling = self.dangling_uids(exists);
        if !dangling.is_empty() {
            error!(
                count = dangling.len(),
                first = %dangling.iter().next().map(|u| u.to_string()).unwrap_or_default(),
                "Graph referenced removed nodes; force purging"
            );
            self.purge_uids(dangling.iter());
        }
        dangling
    }

    // ==================== Counters ====================

    /// Number of grouping entities.
    pub fn membership_record_count(&self) -> usize {
        self.memberships.len()
    }

    /// Total member slots across all groupings.
    pub fn member_slot_count(&self) -> usize {
        self.memberships.values().map(|m| m.members.len()).sum()
    }

    /// Total uid -> group reverse entries.
    pub fn reverse_entry_count(&self) -> usize {
        self.member_of.values().map(|g| g.len()).sum()
    }

    /// Number of mention edges.
    pub fn mention_count(&self) -> usize {
        self.mentions_out.values().map(|t| t.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.memberships.is_empty() && self.mentions_out.is_empty()
    }
}
