//! Single-writer serialization of actions into the RIB reducer (spec
//! §4.7, §5). The dispatcher is the only component that ever calls
//! [`crate::rib::reducer::plan`]/`commit`; everything else — the local RPC
//! surface, inbound peer updates, peer lifecycle events from the peering
//! engine — hands it an [`Action`] and gets back a [`DispatchOutcome`].
//!
//! Actions arrive from arbitrary threads but are processed one at a time,
//! in arrival order, on a dedicated worker thread (mirroring the reference
//! service's reactor: one thread owns the state, everyone else talks to it
//! over a channel). A single `dispatch` call does not return until the
//! commit, its propagation fan-out, and any resynthesized xDS/gateway
//! artifacts have all completed — there is no separate "settled" signal to
//! poll, which keeps the single-writer guarantee visible at the call site
//! and the test suite deterministic for free.
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel as chan;
use localtime::LocalTime;
use log::{debug, error};

use crate::config::{Config, TlsConfig};
use crate::dataplane::DataPlaneAdapter;
use crate::envoy::{NullDirectory, PeerEnvoyDirectory};
use crate::error::ValidationError;
use crate::gateway::{self, GatewaySync};
use crate::identity::NodeIdentity;
use crate::port_allocator::Allocator;
use crate::rib::propagation::Propagation;
use crate::rib::reducer::{ApplyError, Rib, StaleCommit};
use crate::rib::{Action, RouteTable};
use crate::xds::builder::{self, BuildInput, InternalInput, LocalInput};
use crate::xds::XdsSnapshot;

fn ingress_key(route: &str) -> String {
    format!("ingress:{route}")
}

fn egress_key(route: &str, peer: &str) -> String {
    format!("egress:{route}:{peer}")
}

/// What a successful [`Dispatcher::dispatch`] call produced.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub routes_changed: bool,
    pub propagations_sent: usize,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("dispatcher worker is no longer running")]
    WorkerGone,
}

impl From<ApplyError> for DispatchError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::Validation(e) => Self::Validation(e),
            ApplyError::Stale(StaleCommit) => {
                // The dispatcher is the only writer; a stale commit here
                // means a bug in the single-writer invariant, not a
                // recoverable race. Surfaced as Fatal per spec §7.
                panic!("commit rejected against a stale plan on the single-writer dispatcher")
            }
        }
    }
}

enum Job {
    Act {
        action: Action,
        reply: chan::Sender<Result<DispatchOutcome, DispatchError>>,
    },
    ResyncGateway {
        reply: chan::Sender<()>,
    },
}

/// Wires together the RIB, the peering engine, the port allocator and the
/// downstream adapters, and owns the worker thread that serializes actions
/// into the reducer.
pub struct Dispatcher {
    tx: Option<chan::Sender<Job>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    rib: Arc<Rib>,
}

struct Worker {
    node: NodeIdentity,
    rib: Arc<Rib>,
    engine: Arc<crate::peering::PeeringEngine>,
    ports: Mutex<Allocator>,
    bind_address: String,
    tls: Option<TlsConfig>,
    directory: Arc<dyn PeerEnvoyDirectory>,
    data_plane: Arc<dyn DataPlaneAdapter>,
    gateway: Option<Arc<dyn GatewaySync>>,
    version: AtomicU64,
}

impl Dispatcher {
    /// Spawn the worker thread and return a handle to it. `ports` should
    /// already be rehydrated from any persisted allocations (spec §4.5).
    pub fn spawn(
        config: &Config,
        engine: Arc<crate::peering::PeeringEngine>,
        ports: Allocator,
        data_plane: Arc<dyn DataPlaneAdapter>,
        gateway: Option<Arc<dyn GatewaySync>>,
        directory: Arc<dyn PeerEnvoyDirectory>,
    ) -> Self {
        let (tx, rx) = chan::unbounded();
        let rib = Arc::new(Rib::new(config.node.name.clone()));
        let worker = Worker {
            node: config.node.clone(),
            rib: Arc::clone(&rib),
            engine,
            ports: Mutex::new(ports),
            bind_address: config.bind_address.clone(),
            tls: config.tls.clone(),
            directory,
            data_plane,
            gateway,
            version: AtomicU64::new(0),
        };

        let handle = std::thread::Builder::new()
            .name(format!("dispatcher({})", config.node.name))
            .spawn(move || worker.run(rx))
            .expect("dispatcher thread name must not contain NULL bytes");

        Self {
            tx: Some(tx),
            worker: Mutex::new(Some(handle)),
            rib,
        }
    }

    /// A consistent snapshot of the current route table, for read-only
    /// callers (e.g. `listPeers`/`listRoutes` on the RPC surface) that
    /// don't need to go through the single-writer queue.
    pub fn snapshot(&self) -> Arc<RouteTable> {
        self.rib.snapshot()
    }

    /// Convenience constructor using [`NullDirectory`] and no gateway sync,
    /// for embedders that only need ingress listeners.
    pub fn spawn_minimal(config: &Config, engine: Arc<crate::peering::PeeringEngine>, ports: Allocator, data_plane: Arc<dyn DataPlaneAdapter>) -> Self {
        Self::spawn(config, engine, ports, data_plane, None, Arc::new(NullDirectory))
    }

    /// Submit `action` and block until it has committed (or failed to
    /// plan) and every downstream artifact it produces has settled.
    pub fn dispatch(&self, action: Action) -> Result<DispatchOutcome, DispatchError> {
        let tx = self.tx.as_ref().ok_or(DispatchError::WorkerGone)?;
        let (reply_tx, reply_rx) = chan::bounded(1);
        tx.send(Job::Act {
            action,
            reply: reply_tx,
        })
        .map_err(|_| DispatchError::WorkerGone)?;
        reply_rx.recv().map_err(|_| DispatchError::WorkerGone)?
    }

    /// Re-push the current GraphQL gateway aggregation regardless of
    /// whether routes have changed since the last push. Used by the
    /// `gateway` RPC capability to let an operator resync manually.
    pub fn resync_gateway(&self) -> Result<(), DispatchError> {
        let tx = self.tx.as_ref().ok_or(DispatchError::WorkerGone)?;
        let (reply_tx, reply_rx) = chan::bounded(1);
        tx.send(Job::ResyncGateway { reply: reply_tx })
            .map_err(|_| DispatchError::WorkerGone)?;
        reply_rx.recv().map_err(|_| DispatchError::WorkerGone)
    }

    /// Drain in-flight work and stop the worker thread. Per spec §5, this
    /// should be called with an overall shutdown budget by the embedder;
    /// the dispatcher itself just closes the queue and joins.
    pub fn shutdown(&mut self) {
        self.tx.take();
        if let Some(handle) = self.worker.lock().expect("worker mutex poisoned").take() {
            handle.join().ok();
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Worker {
    fn run(self, rx: chan::Receiver<Job>) {
        debug!(target: "dispatcher", "{} worker loop starting", self.node.name);
        for job in rx {
            match job {
                Job::Act { action, reply } => {
                    let outcome = self.handle(action);
                    let _ = reply.send(outcome);
                }
                Job::ResyncGateway { reply } => {
                    self.sync_gateway();
                    let _ = reply.send(());
                }
            }
        }
        debug!(target: "dispatcher", "{} worker loop exiting, queue closed", self.node.name);
    }

    /// Plan, commit, fan out propagations, and resynthesize downstream
    /// artifacts for a single action. Any fed-back actions the peering
    /// engine synthesizes (e.g. `InternalProtocolOpen` once a handshake
    /// completes) are processed inline, in the order they were produced,
    /// before this call returns — there is only one writer, so recursing
    /// here is equivalent to re-enqueuing and preserves ordering.
    fn handle(&self, action: Action) -> Result<DispatchOutcome, DispatchError> {
        let result = self.rib.apply(action)?;
        let propagations_sent = result.propagations.len();
        let now = LocalTime::now();

        let mut fed_back = Vec::new();
        for propagation in &result.propagations {
            fed_back.extend(self.apply_propagation(propagation, now));
        }

        if result.routes_changed {
            self.rebuild_xds();
            self.sync_gateway();
        }

        for action in fed_back {
            if let Err(err) = self.handle(action) {
                // Downstream fan-out failures must not block the caller
                // that originated this dispatch (spec §7).
                error!(target: "dispatcher", "fed-back action failed: {err}");
            }
        }

        Ok(DispatchOutcome {
            routes_changed: result.routes_changed,
            propagations_sent,
        })
    }

    fn apply_propagation(&self, propagation: &Propagation, now: LocalTime) -> Vec<Action> {
        let endpoint = match propagation {
            Propagation::Open { peer } => self
                .rib
                .snapshot()
                .peer(peer)
                .map(|p| p.info.identity.endpoint.clone()),
            _ => None,
        };
        self.engine.apply(propagation.clone(), endpoint.as_deref(), now)
    }

    fn reconcile_ports(&self, table: &RouteTable) {
        let mut ports = self.ports.lock().expect("port allocator mutex poisoned");
        let mut live = HashSet::new();
        for route in &table.local.routes {
            if route.endpoint.is_some() {
                let key = ingress_key(&route.name);
                ports.allocate(key.clone());
                live.insert(key);
            }
        }
        for route in &table.internal.routes {
            let key = egress_key(&route.name, &route.peer_name);
            ports.allocate(key.clone());
            live.insert(key);
        }
        let stale: Vec<String> = ports
            .allocations()
            .keys()
            .filter(|k| !live.contains(*k))
            .cloned()
            .collect();
        for key in stale {
            ports.release(&key);
        }
    }

    fn rebuild_xds(&self) {
        let table = self.rib.snapshot();
        self.reconcile_ports(&table);
        let ports = self.ports.lock().expect("port allocator mutex poisoned");

        let local = table
            .local
            .routes
            .iter()
            .filter(|r| r.endpoint.is_some())
            .map(|r| LocalInput {
                route: r.clone(),
                port_key: ingress_key(&r.name),
            })
            .collect();
        let internal = table
            .internal
            .routes
            .iter()
            .map(|r| InternalInput {
                port_key: egress_key(&r.name, &r.peer_name),
                peer_envoy_address: self.directory.envoy_address(&r.peer_name),
                envoy_port: self.directory.envoy_port(r),
                route: r.clone(),
            })
            .collect();

        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot: XdsSnapshot = builder::build(BuildInput {
            local,
            internal,
            port_allocations: ports.allocations().clone(),
            bind_address: self.bind_address.clone(),
            version: format!("v{version}"),
            tls: self.tls.clone(),
        });
        for warning in &snapshot.warnings {
            debug!(target: "xds", "{warning}");
        }
        self.data_plane.apply(&snapshot);
    }

    fn sync_gateway(&self) {
        let Some(sink) = &self.gateway else { return };
        let table = self.rib.snapshot();
        if !gateway::has_graphql_routes(&table) {
            return;
        }
        let config = gateway::aggregate(&table.local.routes);
        if let Err(err) = sink.update_config(config) {
            error!(target: "dispatcher", "gateway sync failed: {err}");
        }
    }
}
