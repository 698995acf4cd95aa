//! Multi-node integration tests for the scenarios used throughout the RIB
//! and propagation planner design: linear transit, loop prevention,
//! best-path selection, and withdrawal on disconnect.
//!
//! There is no real transport here: each node owns a `Rib`, and this test
//! plays postal worker, taking the `Propagation`s one node's commit
//! produces and turning them into the `Action`s the next node's `Rib`
//! consumes. That's exactly the job `PeeringEngine` + `Dispatcher` do over
//! a real session; driving it by hand keeps the test free of I/O while
//! still exercising the reducer and propagation planner together across
//! more than one table.
use catalyst::identity::PeerInfo;
use catalyst::rib::reducer::Rib;
use catalyst::rib::{Action, LocalRoute, PeerRef, Propagation, Protocol};
use catalyst::NodeIdentity;

fn peer_info(name: &str, endpoint: &str) -> PeerInfo {
    PeerInfo {
        identity: NodeIdentity {
            name: name.to_string(),
            endpoint: endpoint.to_string(),
            domains: vec![],
        },
        peer_token: Some("token".to_string()),
    }
}

/// Create a peer on both sides and bring the session to `connected`,
/// standing in for a completed handshake.
fn link(a: &Rib, a_name: &str, b: &Rib, b_name: &str) {
    a.apply(Action::LocalPeerCreate(peer_info(b_name, &format!("{b_name}:0"))))
        .unwrap();
    b.apply(Action::LocalPeerCreate(peer_info(a_name, &format!("{a_name}:0"))))
        .unwrap();
    a.apply(Action::InternalProtocolOpen {
        peer_info: PeerRef {
            name: b_name.to_string(),
        },
    })
    .unwrap();
    b.apply(Action::InternalProtocolOpen {
        peer_info: PeerRef {
            name: a_name.to_string(),
        },
    })
    .unwrap();
}

/// Deliver every `Propagation::Update` in `propagations` addressed to
/// `peer_name` to `peer`'s Rib, as an `InternalProtocolUpdate` sourced from
/// `from`. Returns the further propagations that delivery produced, so the
/// caller can keep forwarding until the network goes quiet.
fn deliver(peer: &Rib, peer_name: &str, from: &str, propagations: &[Propagation]) -> Vec<Propagation> {
    let mut next = Vec::new();
    for p in propagations {
        if let Propagation::Update { peer: target, update } = p {
            if target != peer_name {
                continue;
            }
            let result = peer
                .apply(Action::InternalProtocolUpdate {
                    peer_info: PeerRef {
                        name: from.to_string(),
                    },
                    update: update.clone(),
                })
                .unwrap();
            next.extend(result.propagations);
        }
    }
    next
}

#[test]
fn linear_transit_advertises_through_the_middle_node() {
    // A -- B -- C
    let a = Rib::new("A");
    let b = Rib::new("B");
    let c = Rib::new("C");
    link(&a, "A", &b, "B");
    link(&b, "B", &c, "C");

    let result = a
        .apply(Action::LocalRouteCreate(LocalRoute {
            name: "svc-a".to_string(),
            protocol: Protocol::Http,
            endpoint: Some("http://a:8080".to_string()),
        }))
        .unwrap();
    // A -> B.
    let from_b = deliver(&b, "B", "A", &result.propagations);
    // B re-advertises -> C.
    deliver(&c, "C", "B", &from_b);

    let routes = &c.snapshot().internal.routes;
    assert_eq!(routes.len(), 1);
    let route = &routes[0];
    assert_eq!(route.name, "svc-a");
    assert_eq!(route.peer_name, "B");
    assert_eq!(route.node_path, vec!["B".to_string(), "A".to_string()]);
}

#[test]
fn re_advertisement_stops_at_a_loop() {
    // B -- thisNode -- C
    let this_node = Rib::new("thisNode");
    let b = Rib::new("B");
    let c = Rib::new("C");
    link(&this_node, "thisNode", &b, "B");
    link(&this_node, "thisNode", &c, "C");

    // B advertises a route that already traversed thisNode once before
    // reaching B (a stale loop, as if B forwarded it back).
    let update = catalyst::rib::Update {
        updates: vec![catalyst::rib::UpdateEntry {
            action: catalyst::rib::UpdateAction::Add,
            route: catalyst::rib::RouteRecord {
                name: "svc-loop".to_string(),
                protocol: Protocol::Http,
                endpoint: None,
            },
            node_path: Some(vec!["B".to_string(), "thisNode".to_string()]),
        }],
    };
    let result = this_node
        .apply(Action::InternalProtocolUpdate {
            peer_info: PeerRef {
                name: "B".to_string(),
            },
            update,
        })
        .unwrap();

    assert!(this_node.snapshot().internal.routes.is_empty());
    assert!(result.propagations.is_empty());
}

#[test]
fn best_path_picks_the_shortest_node_path() {
    // B and C are both connected to thisNode; D is connected only to C.
    let this_node = Rib::new("thisNode");
    let b = Rib::new("B");
    let c = Rib::new("C");
    let d = Rib::new("D");
    link(&this_node, "thisNode", &b, "B");
    link(&this_node, "thisNode", &c, "C");
    link(&c, "C", &d, "D");

    // B advertises svc-x directly: nodePath=[B] once it reaches thisNode.
    let b_result = b
        .apply(Action::LocalRouteCreate(LocalRoute {
            name: "svc-x".to_string(),
            protocol: Protocol::Http,
            endpoint: Some("http://b:1".to_string()),
        }))
        .unwrap();
    deliver(&this_node, "thisNode", "B", &b_result.propagations);

    // D advertises svc-x too; C forwards it on with nodePath=[C, D].
    let d_result = d
        .apply(Action::LocalRouteCreate(LocalRoute {
            name: "svc-x".to_string(),
            protocol: Protocol::Http,
            endpoint: Some("http://d:1".to_string()),
        }))
        .unwrap();
    let from_c = deliver(&c, "C", "D", &d_result.propagations);
    deliver(&this_node, "thisNode", "C", &from_c);

    let metadata = this_node.snapshot().metadata();
    let entry = &metadata["svc-x"];
    assert_eq!(entry.best_path.peer_name, "B");
    assert_eq!(entry.best_path.node_path, vec!["B".to_string()]);
    assert_eq!(entry.selection_reason, "shortest nodePath");
    assert_eq!(entry.alternatives.len(), 1);
    assert_eq!(entry.alternatives[0].peer_name, "C");
}

#[test]
fn withdrawal_on_disconnect_reaches_the_far_node() {
    // A -- B -- C, A's route has reached C through B.
    let a = Rib::new("A");
    let b = Rib::new("B");
    let c = Rib::new("C");
    link(&a, "A", &b, "B");
    link(&b, "B", &c, "C");

    let create = a
        .apply(Action::LocalRouteCreate(LocalRoute {
            name: "svc-a".to_string(),
            protocol: Protocol::Http,
            endpoint: Some("http://a:8080".to_string()),
        }))
        .unwrap();
    let from_b = deliver(&b, "B", "A", &create.propagations);
    deliver(&c, "C", "B", &from_b);
    assert_eq!(c.snapshot().internal.routes.len(), 1);

    // A deletes its peering with B; the close must reach B as an
    // InternalProtocolClose (as the peering engine would synthesize once
    // the transport actually tears down), which in turn withdraws the
    // route from C.
    a.apply(Action::LocalPeerDelete {
        name: "B".to_string(),
    })
    .unwrap();
    let b_result = b
        .apply(Action::InternalProtocolClose {
            peer_info: PeerRef {
                name: "A".to_string(),
            },
            code: 1000,
        })
        .unwrap();
    deliver(&c, "C", "B", &b_result.propagations);

    assert!(c.snapshot().internal.routes.is_empty());
}
