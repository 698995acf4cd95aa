//! The bidirectional message session abstraction the peering engine rides
//! on top of. Framing and transport are an external collaborator (spec §1
//! non-goals); Catalyst only needs something that preserves per-connection
//! message ordering.
use crate::error::TransportError;
use crate::wire::Message;

/// One end of a bidirectional, ordered message session to a peer.
pub trait Transport: Send + Sync {
    fn send(&self, msg: Message) -> Result<(), TransportError>;
    /// Non-blocking receive; `Ok(None)` means no message is ready yet.
    fn try_recv(&self) -> Result<Option<Message>, TransportError>;
}

/// Dials a new [`Transport`] to `endpoint`. Supplied by the embedder; this
/// is the seam an in-process test harness replaces with an in-memory pipe.
pub trait Dialer: Send + Sync {
    fn dial(&self, endpoint: &str) -> Result<Box<dyn Transport>, TransportError>;
}
