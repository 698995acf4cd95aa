//! GraphQL gateway sync (spec §4.7, §6): when local GraphQL routes change,
//! Catalyst aggregates them into a `{services:[{name,url}]}` payload and
//! pushes it to an optional gateway endpoint. Skipped entirely when no
//! GraphQL routes exist.
use serde::{Deserialize, Serialize};

use crate::rib::{LocalRoute, Protocol, RouteTable};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayService {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub services: Vec<GatewayService>,
}

/// Sink the aggregation is pushed to. External collaborator; out of scope
/// per spec §1 (the core only produces the payload).
pub trait GatewaySync: Send + Sync {
    fn update_config(&self, config: GatewayConfig) -> Result<(), GatewayError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway endpoint unreachable: {0}")]
    Unreachable(String),
}

/// Whether `table.local.routes` contains at least one GraphQL route. The
/// dispatcher gates the sync on this so the gateway is never pushed an
/// empty aggregation when no GraphQL route was ever added.
pub fn has_graphql_routes(table: &RouteTable) -> bool {
    table.local.routes.iter().any(|r| r.protocol.is_graphql())
}

/// Build the aggregation from the current local route table. Only routes
/// with an `endpoint` contribute a service entry; a route with no endpoint
/// has nothing to aggregate toward.
pub fn aggregate(routes: &[LocalRoute]) -> GatewayConfig {
    let services = routes
        .iter()
        .filter(|r| r.protocol.is_graphql())
        .filter_map(|r| {
            r.endpoint.clone().map(|url| GatewayService {
                name: r.name.clone(),
                url,
            })
        })
        .collect();
    GatewayConfig { services }
}
