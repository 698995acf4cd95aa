//! The RIB reducer: `plan(action) -> Plan | Error` and `commit(Plan) ->
//! CommitResult`. `plan` is pure and never mutates the table; `commit`
//! atomically replaces it, rejecting stale plans (optimistic concurrency).
use std::sync::{Arc, Mutex};

use crate::error::ValidationError;
use crate::identity::{ConnectionStatus, Peer, PeerInfo};

use super::propagation::{self, Planner, Propagation};
use super::{
    Action, InternalRoute, LocalRoute, PeerRef, RouteRecord, RouteTable, Update, UpdateAction,
    UpdateEntry,
};

/// The outcome of a successful `plan` call. Immutable; applying it via
/// `commit` is the only way it takes effect.
#[derive(Debug, Clone)]
pub struct Plan {
    prev_state: Arc<RouteTable>,
    new_state: Arc<RouteTable>,
    propagations: Vec<Propagation>,
}

impl Plan {
    pub fn new_state(&self) -> &RouteTable {
        &self.new_state
    }

    pub fn propagations(&self) -> &[Propagation] {
        &self.propagations
    }
}

/// The outcome of a successful `commit` call.
#[derive(Debug, Clone)]
pub struct CommitResult {
    pub new_state: Arc<RouteTable>,
    pub routes_changed: bool,
    pub propagations: Vec<Propagation>,
}

/// Raised when `commit` is called against a plan whose `prevState` no
/// longer matches the live table. The caller should re-plan against the
/// current state and retry; repeated failure after retry exhaustion is a
/// fatal invariant violation (see spec Fatal error kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("commit rejected: route table has moved on since this plan was made")]
pub struct StaleCommit;

/// Plan a single action against a snapshot of the route table. Never
/// mutates `state`; `state` is unchanged after the call regardless of
/// outcome.
pub fn plan(
    state: &Arc<RouteTable>,
    this_node: &str,
    action: Action,
) -> Result<Plan, ValidationError> {
    let mut next = (**state).clone();
    let mut planner = Planner::new();

    match action {
        Action::LocalPeerCreate(info) => {
            if info.peer_token.is_none() {
                return Err(ValidationError::MissingPeerToken);
            }
            if next.peer(info.name()).is_some() {
                return Err(ValidationError::DuplicatePeer(info.name().to_string()));
            }
            let name = info.name().to_string();
            next.internal.peers.push(Peer {
                info,
                connection_status: ConnectionStatus::Initializing,
            });
            planner.open(name);
        }

        Action::LocalPeerUpdate(info) => {
            let name = info.name().to_string();
            let peer = next
                .peer_mut(&name)
                .ok_or_else(|| ValidationError::UnknownPeer(name.clone()))?;
            peer.info = info;
        }

        Action::LocalPeerDelete { name } => {
            if next.peer(&name).is_none() {
                return Err(ValidationError::UnknownPeer(name));
            }
            withdraw_peer(&mut next, &mut planner, &name, None);
        }

        Action::InternalProtocolOpen { peer_info } | Action::InternalProtocolConnected {
            peer_info,
        } => {
            let name = peer_info.name.clone();
            let peer = next
                .peer_mut(&name)
                .ok_or(ValidationError::UnknownPeer(name.clone()))?;
            peer.connection_status = ConnectionStatus::Connected;

            let sync = full_table_sync(&next, this_node, &name);
            planner.update(name, sync);
        }

        Action::InternalProtocolClose { peer_info, code } => {
            if next.peer(&peer_info.name).is_none() {
                return Err(ValidationError::UnknownPeer(peer_info.name));
            }
            withdraw_peer(&mut next, &mut planner, &peer_info.name, Some(code));
        }

        Action::InternalProtocolUpdate { peer_info, update } => {
            if next.peer(&peer_info.name).is_none() {
                return Err(ValidationError::UnknownPeer(peer_info.name));
            }
            apply_internal_update(&mut next, &mut planner, this_node, &peer_info.name, update);
        }

        Action::InternalProtocolAuthFailed { peer_info } => {
            if next.peer(&peer_info.name).is_none() {
                return Err(ValidationError::UnknownPeer(peer_info.name));
            }
            withdraw_routes(&mut next, &mut planner, &peer_info.name);
            next.peer_mut(&peer_info.name)
                .expect("checked above")
                .connection_status = ConnectionStatus::Failed;
        }

        Action::LocalRouteCreate(route) => {
            if next.local_route(&route.name).is_some() {
                return Err(ValidationError::DuplicateRoute(route.name));
            }
            let record = RouteRecord {
                name: route.name.clone(),
                protocol: route.protocol,
                endpoint: route.endpoint.clone(),
            };
            next.local.routes.push(route);

            let update = Update {
                updates: vec![UpdateEntry {
                    action: UpdateAction::Add,
                    route: record,
                    node_path: Some(vec![this_node.to_string()]),
                }],
            };
            for peer in next.connected_peers() {
                planner.update(peer.name(), update.clone());
            }
        }

        Action::LocalRouteDelete {
            name,
            protocol,
            endpoint,
        } => {
            let _ = (protocol, endpoint); // informational only, per spec
            let removed = next.local_route(&name).cloned();
            next.local.routes.retain(|r| r.name != name);

            if let Some(removed) = removed {
                let update = Update {
                    updates: vec![UpdateEntry {
                        action: UpdateAction::Remove,
                        route: RouteRecord {
                            name: removed.name,
                            protocol: removed.protocol,
                            endpoint: removed.endpoint,
                        },
                        node_path: None,
                    }],
                };
                for peer in next.connected_peers() {
                    planner.update(peer.name(), update.clone());
                }
            }
        }
    }

    Ok(Plan {
        prev_state: Arc::clone(state),
        new_state: Arc::new(next),
        propagations: planner.finish(),
    })
}

/// Remove every internal route sourced from `name`, emitting withdrawal
/// updates to the remaining connected peers. Does not touch the peer entry
/// itself — shared by `withdraw_peer` (which also removes the peer) and the
/// `InternalProtocolAuthFailed` arm (which leaves it in `failed` status).
fn withdraw_routes(table: &mut RouteTable, planner: &mut Planner, name: &str) {
    let withdrawn: Vec<InternalRoute> = table
        .internal_routes_for(name)
        .cloned()
        .collect();
    table.internal.routes.retain(|r| r.peer_name != name);

    if withdrawn.is_empty() {
        return;
    }
    let removal = Update {
        updates: withdrawn
            .into_iter()
            .map(|r| UpdateEntry {
                action: UpdateAction::Remove,
                route: RouteRecord {
                    name: r.name,
                    protocol: r.protocol,
                    endpoint: r.endpoint,
                },
                node_path: None,
            })
            .collect(),
    };
    for peer in table.connected_peers() {
        if peer.name() != name {
            planner.update(peer.name(), removal.clone());
        }
    }
}

/// Remove a peer and every internal route it sourced, emitting withdrawal
/// updates to the remaining connected peers. `code` is `None` for a
/// locally-initiated delete (close code is the peer-deleted default) and
/// `Some` when driven by `InternalProtocolClose`.
fn withdraw_peer(table: &mut RouteTable, planner: &mut Planner, name: &str, code: Option<u32>) {
    withdraw_routes(table, planner, name);
    table.internal.peers.retain(|p| p.name() != name);
    planner.close(name, code.unwrap_or(propagation::CLOSE_PEER_DELETED));
}

/// Build the full-table-sync payload sent to a peer whose session just
/// opened: every local route, plus every internal route whose `nodePath`
/// doesn't already contain the target peer (split horizon), each with
/// `thisNode` prepended.
fn full_table_sync(table: &RouteTable, this_node: &str, target_peer: &str) -> Update {
    let mut updates = Vec::new();

    for route in &table.local.routes {
        updates.push(UpdateEntry {
            action: UpdateAction::Add,
            route: RouteRecord {
                name: route.name.clone(),
                protocol: route.protocol,
                endpoint: route.endpoint.clone(),
            },
            node_path: Some(vec![this_node.to_string()]),
        });
    }

    for route in &table.internal.routes {
        if route.node_path.iter().any(|n| n == target_peer) {
            continue;
        }
        let mut node_path = vec![this_node.to_string()];
        node_path.extend(route.node_path.iter().cloned());
        updates.push(UpdateEntry {
            action: UpdateAction::Add,
            route: RouteRecord {
                name: route.name.clone(),
                protocol: route.protocol,
                endpoint: route.endpoint.clone(),
            },
            node_path: Some(node_path),
        });
    }

    Update { updates }
}

/// Apply an `InternalProtocolUpdate` payload from `source`, then
/// re-advertise to every other connected peer, excluding per-entry any
/// target already present in the forwarded `nodePath` (second-level split
/// horizon). Both `add` and `remove` entries are re-advertised: a
/// withdrawal learned from `source` must keep propagating downstream, not
/// stop at this hop. Removals carry no `nodePath`, so the split-horizon
/// check trivially passes for them.
fn apply_internal_update(
    table: &mut RouteTable,
    planner: &mut Planner,
    this_node: &str,
    source: &str,
    update: Update,
) {
    let mut forwarded: Vec<(UpdateAction, RouteRecord, Vec<String>)> = Vec::new();

    for entry in update.updates {
        match entry.action {
            UpdateAction::Add => {
                let node_path = entry.node_path.unwrap_or_default();
                if node_path.iter().any(|n| n == this_node) {
                    // Loop prevention: drop silently, not an error.
                    continue;
                }
                let existing = table
                    .internal
                    .routes
                    .iter_mut()
                    .find(|r| r.name == entry.route.name && r.peer_name == source);
                match existing {
                    Some(r) => {
                        r.protocol = entry.route.protocol;
                        r.endpoint = entry.route.endpoint.clone();
                        r.node_path = node_path.clone();
                    }
                    None => table.internal.routes.push(InternalRoute {
                        name: entry.route.name.clone(),
                        protocol: entry.route.protocol,
                        endpoint: entry.route.endpoint.clone(),
                        peer_name: source.to_string(),
                        node_path: node_path.clone(),
                    }),
                }
                forwarded.push((UpdateAction::Add, entry.route, node_path));
            }
            UpdateAction::Remove => {
                table
                    .internal
                    .routes
                    .retain(|r| !(r.name == entry.route.name && r.peer_name == source));
                forwarded.push((UpdateAction::Remove, entry.route, Vec::new()));
            }
        }
    }

    if forwarded.is_empty() {
        return;
    }

    let connected: Vec<String> = table
        .connected_peers()
        .map(|p| p.name().to_string())
        .filter(|name| name != source)
        .collect();

    for target in connected {
        let mut entries = Vec::new();
        for (action, route, node_path) in &forwarded {
            if node_path.iter().any(|n| n == &target) {
                continue;
            }
            let forwarded_path = match action {
                UpdateAction::Add => {
                    let mut path = vec![this_node.to_string()];
                    path.extend(node_path.iter().cloned());
                    Some(path)
                }
                UpdateAction::Remove => None,
            };
            entries.push(UpdateEntry {
                action: action.clone(),
                route: route.clone(),
                node_path: forwarded_path,
            });
        }
        if !entries.is_empty() {
            planner.update(target, Update { updates: entries });
        }
    }
}

/// Owns the live [`RouteTable`] and serializes `plan` + `commit` pairs.
///
/// Reads take a consistent `Arc<RouteTable>` snapshot without locking;
/// writes go through `commit`, which is the only place the pointer moves.
#[derive(Debug)]
pub struct Rib {
    this_node: String,
    table: Mutex<Arc<RouteTable>>,
}

impl Rib {
    pub fn new(this_node: impl Into<String>) -> Self {
        Self {
            this_node: this_node.into(),
            table: Mutex::new(Arc::new(RouteTable::empty())),
        }
    }

    /// A consistent snapshot of the current table.
    pub fn snapshot(&self) -> Arc<RouteTable> {
        Arc::clone(&self.table.lock().expect("rib mutex poisoned"))
    }

    /// Plan against the current snapshot.
    pub fn plan(&self, action: Action) -> Result<Plan, ValidationError> {
        let snapshot = self.snapshot();
        plan(&snapshot, &self.this_node, action)
    }

    /// Atomically replace the current table with `plan.new_state`, provided
    /// nothing has committed since the plan was made.
    pub fn commit(&self, plan: Plan) -> Result<CommitResult, StaleCommit> {
        let mut guard = self.table.lock().expect("rib mutex poisoned");
        if !Arc::ptr_eq(&guard, &plan.prev_state) {
            return Err(StaleCommit);
        }
        let routes_changed = guard.local.routes != plan.new_state.local.routes
            || guard.internal.routes != plan.new_state.internal.routes;
        *guard = Arc::clone(&plan.new_state);

        Ok(CommitResult {
            new_state: plan.new_state,
            routes_changed,
            propagations: plan.propagations,
        })
    }

    /// Convenience: plan then immediately commit. Returns `StaleCommit`
    /// only if another writer raced this call between plan and commit,
    /// which cannot happen while the caller serializes through a single
    /// dispatcher (see `crate::dispatcher`).
    pub fn apply(&self, action: Action) -> Result<CommitResult, ApplyError> {
        let plan = self.plan(action)?;
        let result = self.commit(plan)?;
        Ok(result)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Stale(#[from] StaleCommit),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::NodeIdentity;
    use crate::rib::Protocol;

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

    #[test]
    fn plan_never_mutates_input_state() {
        let rib = Rib::new("A");
        let before = rib.snapshot();
        let plan = rib
            .plan(Action::LocalPeerCreate(peer_info("B", "b:1")))
            .unwrap();
        assert_eq!(*before, *rib.snapshot());
        assert_ne!(*plan.new_state(), *before);
    }

    #[test]
    fn local_peer_create_requires_token() {
        let rib = Rib::new("A");
        let mut info = peer_info("B", "b:1");
        info.peer_token = None;
        assert_eq!(
            rib.apply(Action::LocalPeerCreate(info)).unwrap_err().to_string(),
            ValidationError::MissingPeerToken.to_string()
        );
    }

    #[test]
    fn local_peer_create_emits_open_propagation() {
        let rib = Rib::new("A");
        let result = rib.apply(Action::LocalPeerCreate(peer_info("B", "b:1"))).unwrap();
        assert_eq!(result.propagations, vec![Propagation::Open { peer: "B".into() }]);
    }

    #[test]
    fn duplicate_peer_create_fails() {
        let rib = Rib::new("A");
        rib.apply(Action::LocalPeerCreate(peer_info("B", "b:1"))).unwrap();
        let err = rib.apply(Action::LocalPeerCreate(peer_info("B", "b:2"))).unwrap_err();
        assert!(matches!(err, ApplyError::Validation(ValidationError::DuplicatePeer(_))));
    }

    #[test]
    fn open_on_unknown_peer_fails() {
        let rib = Rib::new("A");
        let err = rib
            .apply(Action::InternalProtocolOpen {
                peer_info: PeerRef { name: "B".into() },
            })
            .unwrap_err();
        assert!(matches!(err, ApplyError::Validation(ValidationError::UnknownPeer(_))));
    }

    #[test]
    fn loop_drop_no_route_no_propagation() {
        let rib = Rib::new("thisNode");
        rib.apply(Action::LocalPeerCreate(peer_info("B", "b:1"))).unwrap();
        rib.apply(Action::LocalPeerCreate(peer_info("C", "c:1"))).unwrap();
        rib.apply(Action::InternalProtocolOpen {
            peer_info: PeerRef { name: "B".into() },
        })
        .unwrap();
        rib.apply(Action::InternalProtocolOpen {
            peer_info: PeerRef { name: "C".into() },
        })
        .unwrap();

        let result = rib
            .apply(Action::InternalProtocolUpdate {
                peer_info: PeerRef { name: "B".into() },
                update: Update {
                    updates: vec![UpdateEntry {
                        action: UpdateAction::Add,
                        route: RouteRecord {
                            name: "svc-loop".into(),
                            protocol: Protocol::Http,
                            endpoint: None,
                        },
                        node_path: Some(vec!["B".into(), "thisNode".into()]),
                    }],
                },
            })
            .unwrap();

        assert!(rib.snapshot().internal.routes.is_empty());
        assert!(result.propagations.is_empty());
    }

    #[test]
    fn withdrawal_on_peer_delete_notifies_remaining_peers() {
        let rib = Rib::new("B");
        rib.apply(Action::LocalPeerCreate(peer_info("A", "a:1"))).unwrap();
        rib.apply(Action::LocalPeerCreate(peer_info("C", "c:1"))).unwrap();
        rib.apply(Action::InternalProtocolOpen {
            peer_info: PeerRef { name: "A".into() },
        })
        .unwrap();
        rib.apply(Action::InternalProtocolOpen {
            peer_info: PeerRef { name: "C".into() },
        })
        .unwrap();
        rib.apply(Action::InternalProtocolUpdate {
            peer_info: PeerRef { name: "A".into() },
            update: Update {
                updates: vec![UpdateEntry {
                    action: UpdateAction::Add,
                    route: RouteRecord {
                        name: "svc-a".into(),
                        protocol: Protocol::Http,
                        endpoint: Some("http://a:8080".into()),
                    },
                    node_path: Some(vec!["A".into()]),
                }],
            },
        })
        .unwrap();
        assert_eq!(rib.snapshot().internal.routes.len(), 1);

        let result = rib.apply(Action::LocalPeerDelete { name: "A".into() }).unwrap();
        assert!(rib.snapshot().internal.routes.is_empty());
        assert!(result
            .propagations
            .iter()
            .any(|p| matches!(p, Propagation::Close { peer, .. } if peer == "A")));
        assert!(result
            .propagations
            .iter()
            .any(|p| matches!(p, Propagation::Update { peer, .. } if peer == "C")));
    }

    #[test]
    fn auth_failure_leaves_peer_failed_instead_of_removing_it() {
        let rib = Rib::new("B");
        rib.apply(Action::LocalPeerCreate(peer_info("A", "a:1"))).unwrap();
        rib.apply(Action::InternalProtocolOpen {
            peer_info: PeerRef { name: "A".into() },
        })
        .unwrap();
        rib.apply(Action::InternalProtocolUpdate {
            peer_info: PeerRef { name: "A".into() },
            update: Update {
                updates: vec![UpdateEntry {
                    action: UpdateAction::Add,
                    route: RouteRecord {
                        name: "svc-a".into(),
                        protocol: Protocol::Http,
                        endpoint: Some("http://a:8080".into()),
                    },
                    node_path: Some(vec!["A".into()]),
                }],
            },
        })
        .unwrap();

        rib.apply(Action::InternalProtocolAuthFailed {
            peer_info: PeerRef { name: "A".into() },
        })
        .unwrap();

        let snapshot = rib.snapshot();
        let peer = snapshot.peer("A").expect("auth failure must not remove the peer");
        assert_eq!(peer.connection_status, ConnectionStatus::Failed);
        assert!(snapshot.internal.routes.is_empty());
    }

    #[test]
    fn auth_failure_on_unknown_peer_fails() {
        let rib = Rib::new("A");
        let err = rib
            .apply(Action::InternalProtocolAuthFailed {
                peer_info: PeerRef { name: "B".into() },
            })
            .unwrap_err();
        assert!(matches!(err, ApplyError::Validation(ValidationError::UnknownPeer(_))));
    }

    #[test]
    fn route_removal_is_forwarded_downstream() {
        let rib = Rib::new("transit");
        rib.apply(Action::LocalPeerCreate(peer_info("origin", "o:1"))).unwrap();
        rib.apply(Action::LocalPeerCreate(peer_info("downstream", "d:1")))
            .unwrap();
        rib.apply(Action::InternalProtocolOpen {
            peer_info: PeerRef { name: "origin".into() },
        })
        .unwrap();
        rib.apply(Action::InternalProtocolOpen {
            peer_info: PeerRef { name: "downstream".into() },
        })
        .unwrap();
        rib.apply(Action::InternalProtocolUpdate {
            peer_info: PeerRef { name: "origin".into() },
            update: Update {
                updates: vec![UpdateEntry {
                    action: UpdateAction::Add,
                    route: RouteRecord {
                        name: "svc-origin".into(),
                        protocol: Protocol::Http,
                        endpoint: Some("http://origin:8080".into()),
                    },
                    node_path: Some(vec!["origin".into()]),
                }],
            },
        })
        .unwrap();
        assert_eq!(rib.snapshot().internal.routes.len(), 1);

        let result = rib
            .apply(Action::InternalProtocolUpdate {
                peer_info: PeerRef { name: "origin".into() },
                update: Update {
                    updates: vec![UpdateEntry {
                        action: UpdateAction::Remove,
                        route: RouteRecord {
                            name: "svc-origin".into(),
                            protocol: Protocol::Http,
                            endpoint: Some("http://origin:8080".into()),
                        },
                        node_path: None,
                    }],
                },
            })
            .unwrap();

        assert!(rib.snapshot().internal.routes.is_empty());
        let forwarded = result
            .propagations
            .iter()
            .find_map(|p| match p {
                Propagation::Update { peer, update } if peer == "downstream" => Some(update),
                _ => None,
            })
            .expect("the withdrawal must be re-advertised to the downstream peer");
        assert_eq!(forwarded.updates.len(), 1);
        assert_eq!(forwarded.updates[0].action, UpdateAction::Remove);
    }
}
