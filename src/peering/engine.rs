//! Peering Engine: session lifecycle, reconnect, heartbeat, and the
//! pool of outbound RPC stubs sessions are built on.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use localtime::LocalTime;
use log::{debug, warn};

use crate::config::ReconnectBackoff;
use crate::error::TransportError;
use crate::identity::{NodeIdentity, PeerInfo};
use crate::rib::{Action, PeerRef, Propagation, Update};
use crate::wire::{Close, Message, Open, UpdateMessage};

use super::pool::{Pool, DEFAULT_TEARDOWN_GRACE};
use super::session::{Link, Session, State};
use super::transport::{Dialer, Transport};

/// Authenticates a peer's token at handshake time. External collaborator
/// (spec §1); distinct from the RPC-facing `VerifyToken` capability gate.
pub trait PeerAuth: Send + Sync {
    fn verify(&self, token: &str, identity: &NodeIdentity) -> bool;
}

struct PeerHandle {
    endpoint: String,
    transport: Arc<dyn Transport>,
}

/// A pending outbound redial, due once `retry_at` has passed.
struct ReconnectTarget {
    endpoint: String,
    retry_at: LocalTime,
}

/// Manages one session per connected peer, reconnecting outbound sessions
/// with backoff and tearing down sessions whose heartbeat has expired.
pub struct PeeringEngine {
    this_node: NodeIdentity,
    heartbeat: Duration,
    backoff: ReconnectBackoff,
    dialer: Box<dyn Dialer>,
    auth: Box<dyn PeerAuth>,
    sessions: Mutex<HashMap<String, Session>>,
    handles: Mutex<HashMap<String, PeerHandle>>,
    pool: Mutex<Pool<Arc<dyn Transport>>>,
    reconnect: Mutex<HashMap<String, ReconnectTarget>>,
}

impl PeeringEngine {
    pub fn new(
        this_node: NodeIdentity,
        heartbeat: Duration,
        backoff: ReconnectBackoff,
        dialer: Box<dyn Dialer>,
        auth: Box<dyn PeerAuth>,
    ) -> Self {
        Self {
            this_node,
            heartbeat,
            backoff,
            dialer,
            auth,
            sessions: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
            pool: Mutex::new(Pool::new()),
            reconnect: Mutex::new(HashMap::new()),
        }
    }

    /// Apply a single propagation emitted by a reducer commit. Returns any
    /// actions the engine wants fed back into the RIB (e.g. a synthesized
    /// `InternalProtocolOpen` once the handshake completes).
    pub fn apply(&self, propagation: Propagation, endpoint: Option<&str>, now: LocalTime) -> Vec<Action> {
        match propagation {
            Propagation::Open { peer } => self.open(&peer, endpoint.unwrap_or_default(), now),
            Propagation::Close { peer, code } => {
                self.close(&peer, code);
                // A reducer-driven close is deliberate (e.g. peer deleted);
                // don't let a pending backoff redial it back in.
                self.reconnect.lock().expect("reconnect mutex poisoned").remove(&peer);
                Vec::new()
            }
            Propagation::Update { peer, update } => {
                self.send_update(&peer, update, now);
                Vec::new()
            }
        }
    }

    /// Establish an outbound session to `peer` at `endpoint`. Transitions
    /// `idle -> dialing -> handshaking -> open`, synthesizing
    /// `InternalProtocolOpen` on success.
    fn open(&self, peer: &str, endpoint: &str, now: LocalTime) -> Vec<Action> {
        // Create the session before dialing, so a failed first attempt still
        // has backoff state to advance (spec §4.3 reconnect policy).
        {
            let mut sessions = self.sessions.lock().expect("sessions mutex poisoned");
            sessions
                .entry(peer.to_string())
                .or_insert_with(|| Session::dialing(peer, now, &self.backoff));
        }

        let dialed = self.dialer.dial(endpoint);
        let transport = {
            let mut pool = self.pool.lock().expect("pool mutex poisoned");
            match dialed {
                Ok(t) => {
                    let t: Arc<dyn Transport> = Arc::from(t);
                    pool.acquire(endpoint, || t.clone())
                }
                Err(_) => {
                    warn!(target: "peering", "dial to {endpoint} for {peer} failed");
                    let actions = self.close(peer, crate::rib::propagation::CLOSE_TRANSPORT_ERROR);
                    self.retry_later(peer, endpoint, now);
                    return actions;
                }
            }
        };

        {
            let mut sessions = self.sessions.lock().expect("sessions mutex poisoned");
            if let Some(session) = sessions.get_mut(peer) {
                session.to_handshaking();
            }
        }

        self.handles.lock().expect("handles mutex poisoned").insert(
            peer.to_string(),
            PeerHandle {
                endpoint: endpoint.to_string(),
                transport: transport.clone(),
            },
        );

        let open = Message::Open(Open {
            peer_info: PeerInfo {
                identity: self.this_node.clone(),
                peer_token: None,
            },
        });
        if transport.send(open).is_err() {
            let actions = self.close(peer, crate::rib::propagation::CLOSE_TRANSPORT_ERROR);
            self.retry_later(peer, endpoint, now);
            return actions;
        }
        self.touch(peer, now);

        vec![Action::InternalProtocolOpen {
            peer_info: PeerRef {
                name: peer.to_string(),
            },
        }]
    }

    /// Schedule a reconnect attempt for an outbound peer after its current
    /// backoff delay, then advance that delay exponentially (spec §4.3:
    /// initiator-side exponential backoff, 1s initial, 60s cap). No-op for
    /// inbound sessions, which never redial.
    fn retry_later(&self, peer: &str, endpoint: &str, now: LocalTime) {
        let delay = {
            let mut sessions = self.sessions.lock().expect("sessions mutex poisoned");
            match sessions.get_mut(peer) {
                Some(session) if session.link == Link::Outbound => session.next_backoff(&self.backoff),
                _ => return,
            }
        };
        self.reconnect.lock().expect("reconnect mutex poisoned").insert(
            peer.to_string(),
            ReconnectTarget {
                endpoint: endpoint.to_string(),
                retry_at: LocalTime::from_secs(now.as_secs() + delay.as_secs().max(1)),
            },
        );
    }

    /// Record traffic on `peer`'s session, resetting its heartbeat timer.
    fn touch(&self, peer: &str, now: LocalTime) {
        if let Some(session) = self.sessions.lock().expect("sessions mutex poisoned").get_mut(peer) {
            session.touch(now);
        }
    }

    /// Accept an inbound handshake presenting `token`. On failure, records
    /// an auth failure and may synthesize a close once the peer exceeds
    /// [`super::session::MAX_AUTH_FAILURES`].
    pub fn accept_handshake(
        &self,
        peer_identity: &NodeIdentity,
        token: &str,
        now: LocalTime,
    ) -> Result<Vec<Action>, Vec<Action>> {
        if self.auth.verify(token, peer_identity) {
            let mut sessions = self.sessions.lock().expect("sessions mutex poisoned");
            let session = sessions
                .entry(peer_identity.name.clone())
                .or_insert_with(|| Session::accepting(peer_identity.name.clone(), now));
            session.to_open(now);
            session.reset_backoff(&self.backoff);
            drop(sessions);
            self.reconnect
                .lock()
                .expect("reconnect mutex poisoned")
                .remove(&peer_identity.name);
            Ok(vec![Action::InternalProtocolConnected {
                peer_info: PeerRef {
                    name: peer_identity.name.clone(),
                },
            }])
        } else {
            let mut sessions = self.sessions.lock().expect("sessions mutex poisoned");
            let session = sessions
                .entry(peer_identity.name.clone())
                .or_insert_with(|| Session::accepting(peer_identity.name.clone(), now));
            let exhausted = session.record_auth_failure();
            if exhausted {
                drop(sessions);
                Err(self.fail_auth(&peer_identity.name))
            } else {
                Err(Vec::new())
            }
        }
    }

    fn send_update(&self, peer: &str, update: Update, now: LocalTime) {
        let transport = {
            let handles = self.handles.lock().expect("handles mutex poisoned");
            handles.get(peer).map(|h| h.transport.clone())
        };
        let Some(transport) = transport else {
            return;
        };
        let msg = Message::Update(UpdateMessage { update });
        if transport.send(msg).is_err() {
            debug!(target: "peering", "failed to send update to {peer}");
            return;
        }
        self.touch(peer, now);
    }

    /// Mechanically tear down the local session/handle/pool state for
    /// `peer` and send a transport-level close with `code`. Does not decide
    /// what happens to the peer's RIB entry — callers build that action.
    fn teardown(&self, peer: &str, code: u32) {
        {
            let mut sessions = self.sessions.lock().expect("sessions mutex poisoned");
            if let Some(session) = sessions.get_mut(peer) {
                session.to_closing();
                session.to_closed(format!("code {code}"));
            }
        }
        if let Some(handle) = self.handles.lock().expect("handles mutex poisoned").remove(peer) {
            let mut pool = self.pool.lock().expect("pool mutex poisoned");
            pool.release(&handle.endpoint);
            let _ = handle.transport.send(Message::Close(Close { code }));
        }
    }

    /// Tear down the session to `peer` and synthesize `InternalProtocolClose`
    /// for the dispatcher to feed back into the RIB, which removes the peer.
    fn close(&self, peer: &str, code: u32) -> Vec<Action> {
        self.teardown(peer, code);
        vec![Action::InternalProtocolClose {
            peer_info: PeerRef {
                name: peer.to_string(),
            },
            code,
        }]
    }

    /// Tear down the session after handshake auth exhaustion and synthesize
    /// `InternalProtocolAuthFailed`. Unlike [`Self::close`], the reducer
    /// keeps the peer in the table, marked `failed` (spec §4.3).
    fn fail_auth(&self, peer: &str) -> Vec<Action> {
        self.teardown(peer, crate::rib::propagation::CLOSE_AUTH_FAILED);
        vec![Action::InternalProtocolAuthFailed {
            peer_info: PeerRef {
                name: peer.to_string(),
            },
        }]
    }

    /// Drain inbound wire traffic for every session with a live transport,
    /// touching the session on any receipt and feeding `Update` messages
    /// back as `InternalProtocolUpdate` actions. A remote-initiated close
    /// tears the session down locally and, for an outbound session,
    /// schedules a reconnect.
    fn poll(&self, now: LocalTime) -> Vec<Action> {
        let peers: Vec<String> = self
            .handles
            .lock()
            .expect("handles mutex poisoned")
            .keys()
            .cloned()
            .collect();
        let mut actions = Vec::new();

        for peer in peers {
            loop {
                let transport = match self.handles.lock().expect("handles mutex poisoned").get(&peer) {
                    Some(handle) => handle.transport.clone(),
                    None => break,
                };
                match transport.try_recv() {
                    Ok(Some(Message::Update(UpdateMessage { update }))) => {
                        self.touch(&peer, now);
                        actions.push(Action::InternalProtocolUpdate {
                            peer_info: PeerRef { name: peer.clone() },
                            update,
                        });
                    }
                    Ok(Some(Message::Close(Close { code }))) => {
                        self.touch(&peer, now);
                        let endpoint = self
                            .handles
                            .lock()
                            .expect("handles mutex poisoned")
                            .get(&peer)
                            .map(|h| h.endpoint.clone());
                        let outbound = self
                            .sessions
                            .lock()
                            .expect("sessions mutex poisoned")
                            .get(&peer)
                            .map(|s| s.link == Link::Outbound)
                            .unwrap_or(false);
                        actions.extend(self.close(&peer, code));
                        if outbound {
                            if let Some(endpoint) = endpoint {
                                self.retry_later(&peer, &endpoint, now);
                            }
                        }
                        break;
                    }
                    Ok(Some(Message::Open(_))) => {
                        self.touch(&peer, now);
                    }
                    Ok(None) | Err(_) => break,
                }
            }
        }

        actions
    }

    /// Periodic tick: drain inbound traffic, expire stale sessions,
    /// redial any outbound peer whose backoff has elapsed, and sweep the
    /// connection pool. Call roughly every `heartbeat` interval from a
    /// background thread.
    pub fn tick(&self, now: LocalTime) -> Vec<Action> {
        let mut actions = self.poll(now);

        let stale: Vec<(String, Option<String>)> = {
            let sessions = self.sessions.lock().expect("sessions mutex poisoned");
            let handles = self.handles.lock().expect("handles mutex poisoned");
            sessions
                .iter()
                .filter(|(_, s)| s.is_open() && s.is_stale(now, self.heartbeat))
                .map(|(name, s)| {
                    let endpoint = (s.link == Link::Outbound)
                        .then(|| handles.get(name).map(|h| h.endpoint.clone()))
                        .flatten();
                    (name.clone(), endpoint)
                })
                .collect()
        };

        for (peer, endpoint) in stale {
            actions.extend(self.close(&peer, crate::rib::propagation::CLOSE_HEARTBEAT_EXPIRED));
            if let Some(endpoint) = endpoint {
                self.retry_later(&peer, &endpoint, now);
            }
        }

        let due: Vec<(String, String)> = {
            let mut reconnect = self.reconnect.lock().expect("reconnect mutex poisoned");
            let ready: Vec<String> = reconnect
                .iter()
                .filter(|(_, target)| target.retry_at.as_secs() <= now.as_secs())
                .map(|(name, _)| name.clone())
                .collect();
            ready
                .into_iter()
                .filter_map(|name| reconnect.remove(&name).map(|target| (name, target.endpoint)))
                .collect()
        };
        for (peer, endpoint) in due {
            actions.extend(self.open(&peer, &endpoint, now));
        }

        self.pool
            .lock()
            .expect("pool mutex poisoned")
            .sweep(DEFAULT_TEARDOWN_GRACE);

        actions
    }

    pub fn session_state(&self, peer: &str) -> Option<State> {
        self.sessions
            .lock()
            .expect("sessions mutex poisoned")
            .get(peer)
            .map(|s| s.state.clone())
    }
}
