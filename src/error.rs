//! Conceptual error taxonomy shared across the RIB, peering engine and xDS builder.
use thiserror::Error;

/// Errors returned by [`crate::rib::reducer`] planning. Never committed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("peer token is required")]
    MissingPeerToken,
    #[error("peer `{0}` already exists")]
    DuplicatePeer(String),
    #[error("peer `{0}` is unknown")]
    UnknownPeer(String),
    #[error("route `{0}` already exists")]
    DuplicateRoute(String),
}

/// Token verification failures, surfaced to the RPC caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("token verification failed")]
    InvalidToken,
    #[error("capability `{0}` is not granted by this token")]
    MissingCapability(&'static str),
}

/// Transport-level failures. Recovered locally by the peering engine via
/// retry/backoff; if persistent, the peer transitions to `failed`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection lost to `{0}`")]
    ConnectionLost(String),
    #[error("operation timed out")]
    Timeout,
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
}

/// Errors surfaced by the xDS builder. The offending route is skipped rather
/// than failing the whole snapshot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuilderError {
    #[error("port pool exhausted for `{0}`")]
    AllocationExhausted(String),
    #[error("malformed endpoint `{0}`")]
    MalformedEndpoint(String),
}
