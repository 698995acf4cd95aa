//! Resolves the data-plane addressing details the xDS builder needs for
//! egress listeners but that the RIB's data model (spec §3) doesn't carry:
//! a peer's own proxy address, and the proxy port a remote route answers
//! on. Neither is exchanged by the wire protocol in §6, so a directory is
//! the seam an embedder fills in (e.g. from its own peer address book, or
//! a side-channel extension to the handshake).
//!
//! Routes for which the directory has no answer are silently skipped by
//! the builder, per spec §4.6 "Routes lacking an endpoint (local) or
//! envoyPort (internal) are silently skipped."
use crate::rib::InternalRoute;

pub trait PeerEnvoyDirectory: Send + Sync {
    /// The address `route`'s peer can be reached at for data-plane traffic.
    fn envoy_address(&self, peer_name: &str) -> Option<String>;
    /// The port the peer's own proxy listens on for this specific route.
    fn envoy_port(&self, route: &InternalRoute) -> Option<u16>;
}

/// Answers nothing. Every internal route is skipped until an embedder
/// supplies a real directory; this keeps the dispatcher usable out of the
/// box for local-only or ingress-only deployments.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDirectory;

impl PeerEnvoyDirectory for NullDirectory {
    fn envoy_address(&self, _peer_name: &str) -> Option<String> {
        None
    }

    fn envoy_port(&self, _route: &InternalRoute) -> Option<u16> {
        None
    }
}
