//! Propagation planning: the fan-out a reducer step hands to the peering
//! engine. Pure data produced by [`super::reducer::plan`]; no I/O happens
//! here, mirroring the reference service's `Outbox`.
use super::Update;

/// A single piece of propagation intent, targeted at one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Propagation {
    /// The peering engine should establish an outbound session.
    Open { peer: String },
    /// The peering engine should tear down the session.
    Close { peer: String, code: u32 },
    /// The peering engine should send this payload on an existing session.
    Update { peer: String, update: Update },
}

impl Propagation {
    pub fn peer(&self) -> &str {
        match self {
            Self::Open { peer } => peer,
            Self::Close { peer, .. } => peer,
            Self::Update { peer, .. } => peer,
        }
    }
}

/// Accumulates propagations in emission order during a single plan step.
#[derive(Debug, Default)]
pub struct Planner {
    propagations: Vec<Propagation>,
}

impl Planner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, peer: impl Into<String>) {
        self.propagations.push(Propagation::Open { peer: peer.into() });
    }

    pub fn close(&mut self, peer: impl Into<String>, code: u32) {
        self.propagations.push(Propagation::Close {
            peer: peer.into(),
            code,
        });
    }

    pub fn update(&mut self, peer: impl Into<String>, update: Update) {
        if update.updates.is_empty() {
            return;
        }
        self.propagations.push(Propagation::Update {
            peer: peer.into(),
            update,
        });
    }

    pub fn finish(self) -> Vec<Propagation> {
        self.propagations
    }
}

/// `code` used for a session closed because the local operator tore down the peer.
pub const CLOSE_PEER_DELETED: u32 = 1000;
/// `code` used for a session closed by the failure detector after heartbeat expiry.
pub const CLOSE_HEARTBEAT_EXPIRED: u32 = 1001;
/// `code` used for a session closed after repeated handshake/auth failures.
pub const CLOSE_AUTH_FAILED: u32 = 1002;
/// `code` used for a session closed because of a transport error that could not be recovered.
pub const CLOSE_TRANSPORT_ERROR: u32 = 1003;
