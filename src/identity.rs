//! Node and peer identity types.
use std::fmt;

/// A node's name. Globally unique within a mesh.
pub type NodeName = String;

/// The identity of this node, or of a peer, as presented at handshake time.
///
/// Immutable for the lifetime of the process it describes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct NodeIdentity {
    /// Globally-unique node name.
    pub name: NodeName,
    /// Address other nodes use to reach this node's RPC surface.
    pub endpoint: String,
    /// Domains this node is authoritative for.
    #[serde(default)]
    pub domains: Vec<String>,
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.endpoint)
    }
}

/// Everything needed to establish a peer: its identity plus the one-time
/// token presented at handshake.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PeerInfo {
    #[serde(flatten)]
    pub identity: NodeIdentity,
    /// Opaque token, consumed once at handshake by the auth collaborator.
    pub peer_token: Option<String>,
}

impl PeerInfo {
    pub fn name(&self) -> &str {
        &self.identity.name
    }
}

/// Connection lifecycle of a [`PeerInfo`] as tracked by the RIB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionStatus {
    Initializing,
    Connected,
    Disconnected,
    Failed,
}

/// A peer as recorded in the route table: identity, token, and connection state.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Peer {
    #[serde(flatten)]
    pub info: PeerInfo,
    pub connection_status: ConnectionStatus,
}

impl Peer {
    pub fn name(&self) -> &str {
        self.info.name()
    }
}
