//! Node configuration, enumerated per spec §6.
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::identity::NodeIdentity;
use crate::port_allocator::PortSpec;

/// TLS material consumed verbatim from an external PKI issuer. Catalyst
/// never issues or renews certificates itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsConfig {
    pub cert_chain: String,
    pub private_key: String,
    pub ca_bundle: String,
    #[serde(default)]
    pub ecdh_curves: Vec<String>,
}

impl TlsConfig {
    /// Default ECDH curve preference used when `ecdhCurves` isn't set.
    pub fn default_ecdh_curves() -> Vec<String> {
        vec![
            "X25519MLKEM768".to_string(),
            "X25519".to_string(),
            "P-256".to_string(),
        ]
    }
}

/// Where the GraphQL gateway aggregation is pushed, if configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GqlGatewayConfig {
    pub endpoint: String,
}

/// Exponential backoff parameters for the initiator side of a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectBackoff {
    pub initial_ms: u64,
    pub max_ms: u64,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            max_ms: 60_000,
        }
    }
}

/// Verifies an opaque bearer token and reports which capabilities it
/// grants. Implemented by an external auth collaborator (spec §1).
pub trait VerifyToken: Send + Sync {
    /// Returns the capabilities granted by `token`, or `None` if the token
    /// doesn't verify.
    fn verify(&self, token: &str) -> Option<Capabilities>;
}

/// Capabilities a verified token may grant, gating the four RPC surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NETWORK: Self = Self(0b0001);
    pub const DATA: Self = Self(0b0010);
    pub const PEERING: Self = Self(0b0100);
    pub const GATEWAY: Self = Self(0b1000);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Capabilities {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Top-level node configuration.
#[derive(Clone)]
pub struct Config {
    pub node: NodeIdentity,
    pub port_pool: Vec<PortSpec>,
    pub bind_address: String,
    pub tls: Option<TlsConfig>,
    pub gql_gateway: Option<GqlGatewayConfig>,
    pub auth_verify: Arc<dyn VerifyToken>,
    pub peer_heartbeat: Duration,
    pub reconnect_backoff: ReconnectBackoff,
}

impl Config {
    pub fn new(node: NodeIdentity, auth_verify: Arc<dyn VerifyToken>) -> Self {
        Self {
            node,
            port_pool: Vec::new(),
            bind_address: "0.0.0.0".to_string(),
            tls: None,
            gql_gateway: None,
            auth_verify,
            peer_heartbeat: Duration::from_secs(10),
            reconnect_backoff: ReconnectBackoff::default(),
        }
    }

    /// Load the enumerated configuration (spec §6) from a JSON file on
    /// disk. `auth_verify` is supplied by the embedder rather than read
    /// from the file: it's a capability, not data (spec §1 non-goal —
    /// token verification is an external auth collaborator).
    pub fn load_file(path: &Path, auth_verify: Arc<dyn VerifyToken>) -> Result<Self, ConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let file: NodeConfigFile = serde_json::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;

        Ok(Self {
            node: file.node,
            port_pool: file.port_pool,
            bind_address: file.bind_address,
            tls: file.tls,
            gql_gateway: file.gql_gateway_config,
            auth_verify,
            peer_heartbeat: Duration::from_secs(file.peer_heartbeat_seconds),
            reconnect_backoff: file.reconnect_backoff,
        })
    }
}

/// The on-disk shape of the enumerated configuration in spec §6. A
/// separate type from [`Config`] because `authVerify` is a capability the
/// embedder wires in at startup, not a serializable field.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeConfigFile {
    node: NodeIdentity,
    #[serde(default)]
    port_pool: Vec<PortSpec>,
    #[serde(default = "default_bind_address")]
    bind_address: String,
    #[serde(default)]
    tls: Option<TlsConfig>,
    #[serde(default)]
    gql_gateway_config: Option<GqlGatewayConfig>,
    #[serde(default = "default_heartbeat_seconds")]
    peer_heartbeat_seconds: u64,
    #[serde(default)]
    reconnect_backoff: ReconnectBackoff,
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_heartbeat_seconds() -> u64 {
    10
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("couldn't read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
    #[error("couldn't parse config file {0}: {1}")]
    Parse(PathBuf, #[source] serde_json::Error),
}
