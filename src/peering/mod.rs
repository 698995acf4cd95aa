//! Peering & Propagation Engine: session lifecycle, reconnect/heartbeat,
//! and the connection pool outbound sessions share.
pub mod engine;
pub mod pool;
pub mod session;
pub mod transport;

pub use engine::{PeerAuth, PeeringEngine};
pub use pool::Pool;
pub use session::{Link, Session, State};
pub use transport::{Dialer, Transport};
