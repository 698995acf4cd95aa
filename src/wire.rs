//! Wire payloads exchanged between peer nodes.
//!
//! Framing and message ordering are delegated to an external bidirectional
//! message session (see spec §1 non-goals); this module only defines the
//! payload shapes and their serde mapping, mirroring how the reference
//! service separates `service::message` from the transport underneath it.
use serde::{Deserialize, Serialize};

use crate::identity::PeerInfo;
use crate::rib::Update;

/// Presented at handshake, by both the initiator and the acceptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Open {
    pub peer_info: PeerInfo,
}

/// Routes in, routes out, and full-table sync all share this envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMessage {
    #[serde(flatten)]
    pub update: Update,
}

/// Session teardown, with a numeric reason understood by both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Close {
    pub code: u32,
}

/// A message on the wire between two peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Open(Open),
    Update(UpdateMessage),
    Close(Close),
}
