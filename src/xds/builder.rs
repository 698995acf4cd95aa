//! Pure function over RIB state, port allocations and TLS material: builds
//! a versioned [`super::XdsSnapshot`]. No I/O, no map-iteration
//! nondeterminism: listeners and clusters are always sorted by name before
//! being emitted (spec §9 "Builder determinism").
use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::config::TlsConfig;
use crate::rib::{InternalRoute, LocalRoute, Protocol};

use super::{
    Cluster, ClusterType, DurationSpec, Endpoint, Filter, ForwardClientCertDetails, Listener,
    TlsContext, XdsSnapshot,
};

/// A local route plus the key its port was allocated under.
#[derive(Debug, Clone)]
pub struct LocalInput {
    pub route: LocalRoute,
    pub port_key: String,
}

/// An internal route plus the key its egress port was allocated under, and
/// the address of the peer's own envoy instance (reached over the mesh,
/// distinct from the peer's RPC endpoint).
#[derive(Debug, Clone)]
pub struct InternalInput {
    pub route: InternalRoute,
    pub port_key: String,
    pub peer_envoy_address: Option<String>,
    pub envoy_port: Option<u16>,
}

#[derive(Debug, Clone)]
pub struct BuildInput {
    pub local: Vec<LocalInput>,
    pub internal: Vec<InternalInput>,
    pub port_allocations: BTreeMap<String, u16>,
    pub bind_address: String,
    pub version: String,
    pub tls: Option<TlsConfig>,
}

fn parse_endpoint(endpoint: &str) -> Option<(String, u16)> {
    let without_scheme = endpoint.split("://").last()?;
    let (host, port) = without_scheme.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    Some((host.to_string(), port))
}

/// True for anything Envoy can reach without a DNS lookup: a literal IPv4 or
/// IPv6 address, or the `localhost` hostname (spec §8 scenario 6 expects
/// `STATIC` for an `http://localhost:...` endpoint).
fn is_literal_ip(host: &str) -> bool {
    host == "localhost"
        || host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .is_ok()
}

fn cluster_resolution(host: &str) -> (ClusterType, Option<&'static str>) {
    if is_literal_ip(host) {
        (ClusterType::Static, None)
    } else {
        (ClusterType::StrictDns, Some("V4_ONLY"))
    }
}

fn downstream_tls(tls: &TlsConfig) -> TlsContext {
    TlsContext {
        minimum_protocol_version: "TLSv1_3",
        ecdh_curves: if tls.ecdh_curves.is_empty() {
            TlsConfig::default_ecdh_curves()
        } else {
            tls.ecdh_curves.clone()
        },
        require_client_certificate: true,
    }
}

fn upstream_tls(tls: &TlsConfig) -> TlsContext {
    // Upstream mTLS mirrors the downstream context; Catalyst presents the
    // same client certificate to every remote cluster.
    downstream_tls(tls)
}

struct ProtocolFilters {
    websocket_upgrade: bool,
    route_timeout: Option<DurationSpec>,
    upstream_http2: bool,
}

fn protocol_filters(protocol: Protocol) -> ProtocolFilters {
    match protocol {
        Protocol::Http => ProtocolFilters {
            websocket_upgrade: true,
            route_timeout: None,
            upstream_http2: false,
        },
        Protocol::HttpGraphql => ProtocolFilters {
            websocket_upgrade: true,
            route_timeout: Some(DurationSpec::NONE),
            upstream_http2: false,
        },
        Protocol::HttpGrpc => ProtocolFilters {
            websocket_upgrade: false,
            route_timeout: Some(DurationSpec::NONE),
            upstream_http2: true,
        },
        Protocol::Tcp => ProtocolFilters {
            websocket_upgrade: false,
            route_timeout: None,
            upstream_http2: false,
        },
    }
}

fn listener_filter(protocol: Protocol, cluster: &str, with_tls: bool) -> Filter {
    if protocol.is_tcp() {
        return Filter::TcpProxy {
            cluster: cluster.to_string(),
        };
    }
    let opts = protocol_filters(protocol);
    Filter::Http {
        websocket_upgrade: opts.websocket_upgrade,
        route_timeout: opts.route_timeout,
        forward_client_cert_details: with_tls.then(ForwardClientCertDetails::default),
    }
}

/// Build a snapshot from `input`. Routes lacking an endpoint (local) or an
/// envoy port (internal) are silently skipped, per spec. Routes whose
/// allocation is missing or whose endpoint fails to parse are skipped with
/// a warning instead of failing the whole build.
pub fn build(input: BuildInput) -> XdsSnapshot {
    let mut listeners = Vec::new();
    let mut clusters = Vec::new();
    let mut warnings = Vec::new();

    for item in &input.local {
        let Some(endpoint) = item.route.endpoint.as_deref() else {
            continue;
        };
        let Some(port) = input.port_allocations.get(&item.port_key).copied() else {
            warnings.push(format!(
                "port allocation exhausted for local route `{}`",
                item.route.name
            ));
            continue;
        };
        let Some((host, upstream_port)) = parse_endpoint(endpoint) else {
            warnings.push(format!(
                "malformed endpoint `{endpoint}` for local route `{}`",
                item.route.name
            ));
            continue;
        };

        let cluster_name = format!("local_{}", item.route.name);
        let (kind, dns_lookup_family) = cluster_resolution(&host);
        let opts = protocol_filters(item.route.protocol);

        listeners.push(Listener {
            name: format!("ingress_{}", item.route.name),
            address: input.bind_address.clone(),
            port,
            filter: listener_filter(item.route.protocol, &cluster_name, input.tls.is_some()),
            downstream_tls: input.tls.as_ref().map(downstream_tls),
        });
        clusters.push(Cluster {
            name: cluster_name,
            kind,
            dns_lookup_family,
            endpoint: Endpoint {
                host,
                port: upstream_port,
            },
            upstream_http2: opts.upstream_http2,
            upstream_tls: None,
        });
    }

    for item in &input.internal {
        let (Some(envoy_port), Some(peer_envoy_address)) =
            (item.envoy_port, item.peer_envoy_address.as_deref())
        else {
            continue;
        };
        let Some(port) = input.port_allocations.get(&item.port_key).copied() else {
            warnings.push(format!(
                "port allocation exhausted for internal route `{}` via `{}`",
                item.route.name, item.route.peer_name
            ));
            continue;
        };

        let cluster_name = format!(
            "remote_{}_via_{}",
            item.route.name, item.route.peer_name
        );
        let (kind, dns_lookup_family) = cluster_resolution(peer_envoy_address);
        let opts = protocol_filters(item.route.protocol);

        listeners.push(Listener {
            name: format!(
                "egress_{}_via_{}",
                item.route.name, item.route.peer_name
            ),
            address: input.bind_address.clone(),
            port,
            filter: listener_filter(item.route.protocol, &cluster_name, false),
            downstream_tls: None,
        });
        clusters.push(Cluster {
            name: cluster_name,
            kind,
            dns_lookup_family,
            endpoint: Endpoint {
                host: peer_envoy_address.to_string(),
                port: envoy_port,
            },
            upstream_http2: opts.upstream_http2,
            upstream_tls: input.tls.as_ref().map(upstream_tls),
        });
    }

    listeners.sort_by(|a, b| a.name.cmp(&b.name));
    clusters.sort_by(|a, b| a.name.cmp(&b.name));

    XdsSnapshot {
        version: input.version,
        listeners,
        clusters,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rib::Protocol;

    fn local(name: &str, protocol: Protocol, endpoint: &str, port: u16) -> (LocalInput, (String, u16)) {
        let key = format!("ingress:{name}");
        (
            LocalInput {
                route: LocalRoute {
                    name: name.to_string(),
                    protocol,
                    endpoint: Some(endpoint.to_string()),
                },
                port_key: key.clone(),
            },
            (key, port),
        )
    }

    #[test]
    fn grpc_route_gets_http2_and_no_timeout() {
        let (item, (key, port)) = local("grpc-api", Protocol::HttpGrpc, "http://localhost:50051", 8001);
        let mut allocations = BTreeMap::new();
        allocations.insert(key, port);

        let snapshot = build(BuildInput {
            local: vec![item],
            internal: vec![],
            port_allocations: allocations,
            bind_address: "0.0.0.0".to_string(),
            version: "v1".to_string(),
            tls: None,
        });

        let listener = &snapshot.listeners[0];
        assert_eq!(listener.name, "ingress_grpc-api");
        assert_eq!(listener.port, 8001);
        match &listener.filter {
            Filter::Http {
                websocket_upgrade,
                route_timeout,
                ..
            } => {
                assert!(!websocket_upgrade);
                assert_eq!(*route_timeout, Some(DurationSpec::NONE));
            }
            _ => panic!("expected http filter"),
        }

        let cluster = &snapshot.clusters[0];
        assert_eq!(cluster.name, "local_grpc-api");
        assert!(cluster.upstream_http2);
        assert_eq!(cluster.kind, ClusterType::Static);
    }

    #[test]
    fn missing_allocation_is_a_warning_not_a_listener() {
        let (item, _) = local("svc-a", Protocol::Http, "http://a:8080", 8000);
        let snapshot = build(BuildInput {
            local: vec![item],
            internal: vec![],
            port_allocations: BTreeMap::new(),
            bind_address: "0.0.0.0".to_string(),
            version: "v1".to_string(),
            tls: None,
        });
        assert!(snapshot.listeners.is_empty());
        assert_eq!(snapshot.warnings.len(), 1);
    }

    #[test]
    fn version_only_difference_yields_identical_content() {
        let (item_a, (key, port)) = local("svc-a", Protocol::Http, "http://a:8080", 8000);
        let (item_b, _) = local("svc-a", Protocol::Http, "http://a:8080", 8000);
        let mut allocations = BTreeMap::new();
        allocations.insert(key, port);

        let one = build(BuildInput {
            local: vec![item_a],
            internal: vec![],
            port_allocations: allocations.clone(),
            bind_address: "0.0.0.0".to_string(),
            version: "v1".to_string(),
            tls: None,
        });
        let two = build(BuildInput {
            local: vec![item_b],
            internal: vec![],
            port_allocations: allocations,
            bind_address: "0.0.0.0".to_string(),
            version: "v2".to_string(),
            tls: None,
        });
        assert_eq!(one.listeners, two.listeners);
        assert_eq!(one.clusters, two.clusters);
        assert_ne!(one.version, two.version);
    }

    #[test]
    fn dns_host_uses_strict_dns() {
        let (item, (key, port)) = local("svc-b", Protocol::Http, "http://backend.internal:9090", 8000);
        let mut allocations = BTreeMap::new();
        allocations.insert(key, port);
        let snapshot = build(BuildInput {
            local: vec![item],
            internal: vec![],
            port_allocations: allocations,
            bind_address: "0.0.0.0".to_string(),
            version: "v1".to_string(),
            tls: None,
        });
        assert_eq!(snapshot.clusters[0].kind, ClusterType::StrictDns);
        assert_eq!(snapshot.clusters[0].dns_lookup_family, Some("V4_ONLY"));
    }
}
