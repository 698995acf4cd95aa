//! Routing Information Base: in-memory state machine over local and
//! internal routes and peers.
//!
//! The module is split the way the reference service is: a pure planning
//! step ([`reducer::plan`]) that never touches shared state, an atomic
//! commit ([`reducer::commit`]) that swaps the table, and a metadata pass
//! ([`metadata`]) that derives best-path selection on every commit.
pub mod metadata;
pub mod propagation;
pub mod reducer;

use serde::{Deserialize, Serialize};

use crate::identity::{ConnectionStatus, Peer, PeerInfo};

pub use metadata::{MetadataEntry, RouteMetadata};
pub use propagation::Propagation;

/// `protocol` values a route may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Http,
    #[serde(rename = "http:graphql", alias = "http:gql")]
    HttpGraphql,
    #[serde(rename = "http:grpc")]
    HttpGrpc,
    Tcp,
}

impl Protocol {
    pub fn is_graphql(self) -> bool {
        matches!(self, Self::HttpGraphql)
    }

    pub fn is_grpc(self) -> bool {
        matches!(self, Self::HttpGrpc)
    }

    pub fn is_tcp(self) -> bool {
        matches!(self, Self::Tcp)
    }
}

/// A route whose backend is served directly by this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalRoute {
    pub name: String,
    pub protocol: Protocol,
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// A route learned from a peer.
///
/// Invariant: `node_path` never contains this node's name. Index 0 is the
/// most recent hop (the immediate peer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalRoute {
    pub name: String,
    pub protocol: Protocol,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub peer_name: String,
    #[serde(default)]
    pub node_path: Vec<String>,
}

impl InternalRoute {
    /// The `(name, peerName)` key that identifies this entry uniquely.
    pub fn key(&self) -> (&str, &str) {
        (&self.name, &self.peer_name)
    }
}

/// Local half of the route table: routes served by this node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalTable {
    pub routes: Vec<LocalRoute>,
}

/// Internal half of the route table: routes and peers learned from the mesh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalTable {
    pub routes: Vec<InternalRoute>,
    pub peers: Vec<Peer>,
}

/// The single source of truth for the RIB. Owned exclusively by the
/// dispatcher; every other component reads an immutable snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteTable {
    pub local: LocalTable,
    pub internal: InternalTable,
}

impl RouteTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn peer(&self, name: &str) -> Option<&Peer> {
        self.internal.peers.iter().find(|p| p.name() == name)
    }

    pub fn peer_mut(&mut self, name: &str) -> Option<&mut Peer> {
        self.internal.peers.iter_mut().find(|p| p.name() == name)
    }

    pub fn connected_peers(&self) -> impl Iterator<Item = &Peer> {
        self.internal
            .peers
            .iter()
            .filter(|p| p.connection_status == ConnectionStatus::Connected)
    }

    pub fn local_route(&self, name: &str) -> Option<&LocalRoute> {
        self.local.routes.iter().find(|r| r.name == name)
    }

    pub fn internal_routes_for(&self, peer_name: &str) -> impl Iterator<Item = &InternalRoute> {
        self.internal
            .routes
            .iter()
            .filter(move |r| r.peer_name == peer_name)
    }

    /// Derive [`RouteMetadata`] for the current internal route set. Not
    /// persisted; recomputed on every commit.
    pub fn metadata(&self) -> RouteMetadata {
        metadata::compute(&self.internal.routes)
    }
}

/// An entry inside an [`crate::wire::Update`] payload, and the unit of work
/// the reducer processes for `InternalProtocolUpdate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateAction {
    Add,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRecord {
    pub name: String,
    pub protocol: Protocol,
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateEntry {
    pub action: UpdateAction,
    pub route: RouteRecord,
    #[serde(default)]
    pub node_path: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub updates: Vec<UpdateEntry>,
}

/// A reference to a peer, as carried by internal-protocol actions. Only the
/// name is used to look the peer up in the table; other fields are
/// informational for `LocalPeerUpdate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRef {
    pub name: String,
}

impl From<&PeerInfo> for PeerRef {
    fn from(info: &PeerInfo) -> Self {
        Self {
            name: info.name().to_string(),
        }
    }
}

/// Actions the reducer accepts. See `reducer::plan` for their contracts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    LocalPeerCreate(PeerInfo),
    LocalPeerUpdate(PeerInfo),
    LocalPeerDelete { name: String },
    InternalProtocolOpen { peer_info: PeerRef },
    InternalProtocolConnected { peer_info: PeerRef },
    InternalProtocolClose { peer_info: PeerRef, code: u32 },
    InternalProtocolUpdate { peer_info: PeerRef, update: Update },
    /// Synthesized by the peering engine once a peer exceeds
    /// `MAX_AUTH_FAILURES` handshake attempts. Unlike `InternalProtocolClose`,
    /// the peer is not removed: it is put in `failed` status and stays in
    /// the table, requiring an explicit `LocalPeerDelete` + recreate (spec §4.3).
    InternalProtocolAuthFailed { peer_info: PeerRef },
    LocalRouteCreate(LocalRoute),
    /// `protocol`/`endpoint` are informational only; removal is keyed on `name`.
    LocalRouteDelete {
        name: String,
        protocol: Option<Protocol>,
        endpoint: Option<String>,
    },
}
