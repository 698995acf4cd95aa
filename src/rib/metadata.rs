//! Best-path selection over internal routes, grouped by route name.
use std::collections::BTreeMap;

use super::InternalRoute;

/// For a given route name: the selected best path, the candidates that
/// lost, and why the winner was chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataEntry {
    pub best_path: InternalRoute,
    pub alternatives: Vec<InternalRoute>,
    pub selection_reason: &'static str,
}

/// `name -> metadata`, derived fresh on every commit. Never persisted.
pub type RouteMetadata = BTreeMap<String, MetadataEntry>;

/// Compute route metadata from the current set of internal routes.
///
/// - 0 candidates for a name: no entry.
/// - 1 candidate: `selectionReason = "only candidate"`.
/// - >1 candidates: shortest `nodePath` wins, ties broken lexicographically
///   on `peerName`; reason is `"shortest nodePath"`.
pub fn compute(routes: &[InternalRoute]) -> RouteMetadata {
    let mut by_name: BTreeMap<&str, Vec<&InternalRoute>> = BTreeMap::new();
    for route in routes {
        by_name.entry(route.name.as_str()).or_default().push(route);
    }

    let mut metadata = RouteMetadata::new();
    for (name, mut candidates) in by_name {
        if candidates.is_empty() {
            continue;
        }
        if candidates.len() == 1 {
            metadata.insert(
                name.to_string(),
                MetadataEntry {
                    best_path: candidates[0].clone(),
                    alternatives: Vec::new(),
                    selection_reason: "only candidate",
                },
            );
            continue;
        }
        candidates.sort_by(|a, b| {
            a.node_path
                .len()
                .cmp(&b.node_path.len())
                .then_with(|| a.peer_name.cmp(&b.peer_name))
        });
        let mut iter = candidates.into_iter();
        let best = iter.next().expect("non-empty candidate list");
        let alternatives = iter.cloned().collect();

        metadata.insert(
            name.to_string(),
            MetadataEntry {
                best_path: best.clone(),
                alternatives,
                selection_reason: "shortest nodePath",
            },
        );
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rib::Protocol;

    fn route(name: &str, peer: &str, path: &[&str]) -> InternalRoute {
        InternalRoute {
            name: name.to_string(),
            protocol: Protocol::Http,
            endpoint: None,
            peer_name: peer.to_string(),
            node_path: path.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn no_candidates_yields_no_entry() {
        let metadata = compute(&[]);
        assert!(metadata.get("svc-x").is_none());
    }

    #[test]
    fn single_candidate_is_only_candidate() {
        let routes = vec![route("svc-x", "B", &["B"])];
        let metadata = compute(&routes);
        let entry = &metadata["svc-x"];
        assert_eq!(entry.selection_reason, "only candidate");
        assert!(entry.alternatives.is_empty());
    }

    #[test]
    fn shortest_path_wins_with_lexicographic_tiebreak() {
        let routes = vec![
            route("svc-x", "B", &["B"]),
            route("svc-x", "C", &["C", "D"]),
        ];
        let metadata = compute(&routes);
        let entry = &metadata["svc-x"];
        assert_eq!(entry.best_path.peer_name, "B");
        assert_eq!(entry.selection_reason, "shortest nodePath");
        assert_eq!(entry.alternatives.len(), 1);
    }

    #[test]
    fn ties_break_on_peer_name() {
        let routes = vec![route("svc-x", "Z", &["Z"]), route("svc-x", "A", &["A"])];
        let metadata = compute(&routes);
        assert_eq!(metadata["svc-x"].best_path.peer_name, "A");
    }

    use qcheck_macros::quickcheck;

    #[derive(Debug, Clone)]
    struct Candidate {
        peer: &'static str,
        path_len: u8,
    }

    impl qcheck::Arbitrary for Candidate {
        fn arbitrary(g: &mut qcheck::Gen) -> Self {
            Candidate {
                peer: *g.choose(&["A", "B", "C", "D", "E"]).unwrap(),
                path_len: *g.choose(&[1u8, 2, 3, 4, 5, 6]).unwrap(),
            }
        }
    }

    /// `bestPath ∪ alternatives == candidates` and `bestPath` is never
    /// longer than any alternative (spec §8).
    #[quickcheck]
    fn best_path_partitions_candidates_and_is_shortest(candidates: Vec<Candidate>) -> bool {
        let mut seen = std::collections::HashSet::new();
        let routes: Vec<InternalRoute> = candidates
            .into_iter()
            .filter(|c| seen.insert(c.peer))
            .map(|c| route(c.peer, c.peer, &vec!["n"; c.path_len as usize]))
            .map(|mut r| {
                r.name = "svc".to_string();
                r
            })
            .collect();
        if routes.is_empty() {
            return true;
        }

        let metadata = compute(&routes);
        let Some(entry) = metadata.get("svc") else {
            return false;
        };

        let mut selected: Vec<&str> = std::iter::once(entry.best_path.peer_name.as_str())
            .chain(entry.alternatives.iter().map(|r| r.peer_name.as_str()))
            .collect();
        let mut expected: Vec<&str> = routes.iter().map(|r| r.peer_name.as_str()).collect();
        selected.sort_unstable();
        expected.sort_unstable();

        let partitions = selected == expected;
        let is_shortest = entry
            .alternatives
            .iter()
            .all(|alt| entry.best_path.node_path.len() <= alt.node_path.len());

        partitions && is_shortest
    }
}
