//! Public RPC surface (spec §4.8): four capabilities gated by a
//! verify-token hook. Each getter checks the token against the capability
//! it guards and hands back a client scoped to just that slice of the
//! dispatcher — `getNetworkClient`/`getDataChannelClient` for local CRUD,
//! `getIBGPClient` for the inbound session other nodes call into, and a
//! gateway client for the GraphQL aggregation sink.
//!
//! The spec frames each getter as returning `{success:true, client} |
//! {success:false, error}`; that's exactly what `Result<Client, AuthError>`
//! already is, so the clients below return it directly rather than
//! wrapping it in a bespoke sum type.
use std::sync::Arc;

use crate::config::{Capabilities, VerifyToken};
use crate::dispatcher::{DispatchError, DispatchOutcome, Dispatcher};
use crate::error::AuthError;
use crate::identity::{Peer, PeerInfo};
use crate::rib::{Action, LocalRoute, PeerRef, Protocol, Update};

/// Entry point an embedder's transport layer hands each incoming RPC call
/// to, after it has extracted the bearer token from the request.
pub struct RpcSurface {
    dispatcher: Arc<Dispatcher>,
    auth: Arc<dyn VerifyToken>,
}

impl RpcSurface {
    pub fn new(dispatcher: Arc<Dispatcher>, auth: Arc<dyn VerifyToken>) -> Self {
        Self { dispatcher, auth }
    }

    fn authorize(&self, token: &str, required: Capabilities) -> Result<(), AuthError> {
        let granted = self.auth.verify(token).ok_or(AuthError::InvalidToken)?;
        if granted.contains(required) {
            Ok(())
        } else {
            Err(AuthError::MissingCapability(capability_name(required)))
        }
    }

    pub fn get_network_client(&self, token: &str) -> Result<NetworkClient, AuthError> {
        self.authorize(token, Capabilities::NETWORK)?;
        Ok(NetworkClient {
            dispatcher: self.dispatcher.clone(),
        })
    }

    pub fn get_data_channel_client(&self, token: &str) -> Result<DataChannelClient, AuthError> {
        self.authorize(token, Capabilities::DATA)?;
        Ok(DataChannelClient {
            dispatcher: self.dispatcher.clone(),
        })
    }

    pub fn get_ibgp_client(&self, token: &str) -> Result<IbgpClient, AuthError> {
        self.authorize(token, Capabilities::PEERING)?;
        Ok(IbgpClient {
            dispatcher: self.dispatcher.clone(),
        })
    }

    pub fn get_gateway_client(&self, token: &str) -> Result<GatewayClient, AuthError> {
        self.authorize(token, Capabilities::GATEWAY)?;
        Ok(GatewayClient {
            dispatcher: self.dispatcher.clone(),
        })
    }
}

fn capability_name(cap: Capabilities) -> &'static str {
    match cap {
        Capabilities::NETWORK => "network",
        Capabilities::DATA => "data",
        Capabilities::PEERING => "peering",
        Capabilities::GATEWAY => "gateway",
        _ => "unknown",
    }
}

/// Peer CRUD, gated by the `network` capability.
pub struct NetworkClient {
    dispatcher: Arc<Dispatcher>,
}

impl NetworkClient {
    pub fn add_peer(&self, info: PeerInfo) -> Result<DispatchOutcome, DispatchError> {
        self.dispatcher.dispatch(Action::LocalPeerCreate(info))
    }

    pub fn remove_peer(&self, name: impl Into<String>) -> Result<DispatchOutcome, DispatchError> {
        self.dispatcher
            .dispatch(Action::LocalPeerDelete { name: name.into() })
    }

    pub fn list_peers(&self) -> Vec<Peer> {
        self.dispatcher.snapshot().internal.peers.clone()
    }
}

/// Local route CRUD, gated by the `data` capability.
pub struct DataChannelClient {
    dispatcher: Arc<Dispatcher>,
}

impl DataChannelClient {
    pub fn add_route(&self, route: LocalRoute) -> Result<DispatchOutcome, DispatchError> {
        self.dispatcher.dispatch(Action::LocalRouteCreate(route))
    }

    pub fn remove_route(
        &self,
        name: impl Into<String>,
        protocol: Option<Protocol>,
        endpoint: Option<String>,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.dispatcher.dispatch(Action::LocalRouteDelete {
            name: name.into(),
            protocol,
            endpoint,
        })
    }

    pub fn list_routes(&self) -> Vec<LocalRoute> {
        self.dispatcher.snapshot().local.routes.clone()
    }
}

/// The inbound peer session surface other nodes call into, gated by the
/// `peering` capability. Named for the protocol it carries (spec's
/// "internal protocol" / interior gateway updates).
pub struct IbgpClient {
    dispatcher: Arc<Dispatcher>,
}

impl IbgpClient {
    pub fn open(&self, peer_info: PeerRef) -> Result<DispatchOutcome, DispatchError> {
        self.dispatcher
            .dispatch(Action::InternalProtocolOpen { peer_info })
    }

    pub fn update(
        &self,
        peer_info: PeerRef,
        update: Update,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.dispatcher
            .dispatch(Action::InternalProtocolUpdate { peer_info, update })
    }

    pub fn close(&self, peer_info: PeerRef, code: u32) -> Result<DispatchOutcome, DispatchError> {
        self.dispatcher
            .dispatch(Action::InternalProtocolClose { peer_info, code })
    }
}

/// Gated by the `gateway` capability. `updateConfig` in the spec names the
/// sink the dispatcher pushes aggregations to automatically; the client
/// here exposes the one caller-initiated operation on top of that: asking
/// for a resync outside the normal route-change trigger.
pub struct GatewayClient {
    dispatcher: Arc<Dispatcher>,
}

impl GatewayClient {
    pub fn resync(&self) -> Result<(), DispatchError> {
        self.dispatcher.resync_gateway()
    }
}
