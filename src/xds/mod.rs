//! xDS snapshot types: the versioned listener/cluster set handed to an
//! external data-plane adapter.
pub mod builder;

use serde::{Deserialize, Serialize};

pub use builder::build;

/// How a cluster resolves its upstream address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterType {
    /// Upstream host is a literal IP; endpoints are static.
    Static,
    /// Upstream host needs DNS resolution.
    StrictDns,
}

/// `seconds`/`nanos` duration, matching the protobuf `Duration` shape xDS
/// configs use. `{0, 0}` means "no timeout".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationSpec {
    pub seconds: u64,
    pub nanos: u32,
}

impl DurationSpec {
    pub const NONE: Self = Self {
        seconds: 0,
        nanos: 0,
    };
}

/// Downstream (ingress) or upstream (egress cluster) TLS context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsContext {
    pub minimum_protocol_version: &'static str,
    pub ecdh_curves: Vec<String>,
    pub require_client_certificate: bool,
}

/// Forwards client certificate details to the upstream for HTTP listeners
/// terminating mTLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardClientCertDetails {
    pub mode: &'static str,
    pub uri: bool,
    pub subject: bool,
    pub dns: bool,
}

impl Default for ForwardClientCertDetails {
    fn default() -> Self {
        Self {
            mode: "SANITIZE_SET",
            uri: true,
            subject: true,
            dns: true,
        }
    }
}

/// The network filter a listener runs: HTTP connection manager, or a raw
/// TCP proxy for `tcp` routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Filter {
    Http {
        websocket_upgrade: bool,
        route_timeout: Option<DurationSpec>,
        forward_client_cert_details: Option<ForwardClientCertDetails>,
    },
    TcpProxy { cluster: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub filter: Filter,
    pub downstream_tls: Option<TlsContext>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ClusterType,
    pub dns_lookup_family: Option<&'static str>,
    pub endpoint: Endpoint,
    pub upstream_http2: bool,
    pub upstream_tls: Option<TlsContext>,
}

/// A complete, versioned data-plane configuration.
///
/// `version` is caller-provided and passed through verbatim: the builder
/// never increments it, and two inputs differing only in version yield
/// byte-identical listener/cluster content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XdsSnapshot {
    pub version: String,
    pub listeners: Vec<Listener>,
    pub clusters: Vec<Cluster>,
    /// Routes skipped because of an `AllocationError` or `BuilderError`;
    /// not part of the versioned spec shape, but useful to surface to
    /// operators without failing the whole build.
    pub warnings: Vec<String>,
}
