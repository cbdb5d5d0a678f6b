//! Breadth-first traversal over both edge kinds.

use std::collections::{BTreeSet, VecDeque};

use crossref_types::Uid;

use crate::store::GraphStore;
use crate::types::{Direction, EdgeKind, TraversalStep, TraverseOptions};

impl GraphStore {
    /// Nodes reachable from `start` within `max_depth` hops, nearest first.
    ///
    /// Membership hops move to group siblings and ignore direction. Mention
    /// hops follow `direction`. Each node is reported once, at the depth it
    /// was first reached. Order is deterministic: memberships by group id
    /// then member order, mentions by uid. `start` itself is not reported.
    pub fn traverse(&self, start: &Uid, options: &TraverseOptions) -> Vec<TraversalStep> {
        let mut steps = Vec::new();
        if options.max_depth == 0 || options.kinds.is_empty() {
            return steps;
        }

        let mut visited: BTreeSet<Uid> = BTreeSet::new();
        visited.insert(start.clone());
        let mut queue: VecDeque<(Uid, usize)> = VecDeque::new();
        queue.push_back((start.clone(), 0));

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= options.max_depth {
                continue;
            }
            for (next, via) in self.neighbors(&current, options) {
                if !visited.insert(next.clone()) {
                    continue;
                }
                steps.push(TraversalStep {
                    uid: next.clone(),
                    depth: depth + 1,
                    via,
                    from: current.clone(),
                });
                queue.push_back((next, depth + 1));
            }
        }
        steps
    }

    fn neighbors(&self, uid: &Uid, options: &TraverseOptions) -> Vec<(Uid, EdgeKind)> {
        let mut out = Vec::new();

        if options.kinds.contains(&EdgeKind::Membership) {
            for membership in self.groups_of(uid) {
                for sibling in membership.siblings_of(uid) {
                    out.push((sibling, EdgeKind::Membership));
                }
            }
        }

        if options.kinds.contains(&EdgeKind::Mention) {
            if matches!(options.direction, Direction::Outgoing | Direction::Both) {
                if let Some(targets) = self.mentions_out.get(uid) {
                    out.extend(targets.keys().map(|t| (t.clone(), EdgeKind::Mention)));
                }
            }
            if matches!(options.direction, Direction::Incoming | Direction::Both) {
                if let Some(sources) = self.mentions_in.get(uid) {
                    out.extend(sources.iter().map(|s| (s.clone(), EdgeKind::Mention)));
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Membership, Mention, MentionKind};
    use crossref_types::GroupId;

    fn uid(s: &str) -> Uid {
        Uid::parse(s).unwrap()
    }

    fn link(graph: &mut GraphStore, from: &str, to: &str) {
        graph.add_mention(Mention {
            source: uid(from),
            target: uid(to),
            kind: MentionKind::Hard,
            excerpt: String::new(),
        });
    }

    fn sample() -> GraphStore {
        // A -> B -> C -> A (cycle), A in group with D and E.
        let mut graph = GraphStore::new();
        link(&mut graph, "D:A", "D:B");
        link(&mut graph, "D:B", "D:C");
        link(&mut graph, "D:C", "D:A");
        graph.add_membership(Membership::new(
            GroupId::parse("D/g").unwrap(),
            "g",
            vec![uid("D:E"), uid("D:A"), uid("D:D")],
        ));
        graph
    }

    #[test]
    fn test_cycles_terminate_and_start_excluded() {
        let graph = sample();
        let steps = graph.traverse(&uid("D:A"), &TraverseOptions::default().with_max_depth(10));
        let uids: Vec<String> = steps.iter().map(|s| s.uid.to_string()).collect();
        assert_eq!(uids, vec!["D:E", "D:D", "D:B", "D:C"]);
        assert!(steps.iter().all(|s| s.depth == 1));
    }

    #[test]
    fn test_depth_and_direction() {
        let graph = sample();
        let options = TraverseOptions::default()
            .with_kinds([EdgeKind::Mention])
            .with_direction(Direction::Outgoing)
            .with_max_depth(1);
        let steps = graph.traverse(&uid("D:A"), &options);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].uid, uid("D:B"));
        assert_eq!(steps[0].via, EdgeKind::Mention);

        let steps = graph.traverse(&uid("D:A"), &options.clone().with_max_depth(2));
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].uid, uid("D:C"));
        assert_eq!(steps[1].depth, 2);
        assert_eq!(steps[1].from, uid("D:B"));
    }

    #[test]
    fn test_membership_only() {
        let graph = sample();
        let options = TraverseOptions::default().with_kinds([EdgeKind::Membership]);
        let steps = graph.traverse(&uid("D:D"), &options);
        let uids: Vec<String> = steps.iter().map(|s| s.uid.to_string()).collect();
        assert_eq!(uids, vec!["D:E", "D:A"]);
        assert!(steps.iter().all(|s| s.via == EdgeKind::Membership));
    }

    #[test]
    fn test_zero_depth_and_unknown_start() {
        let graph = sample();
        assert!(graph
            .traverse(&uid("D:A"), &TraverseOptions::default().with_max_depth(0))
            .is_empty());
        assert!(graph
            .traverse(&uid("D:NOPE"), &TraverseOptions::default())
            .is_empty());
    }
}
