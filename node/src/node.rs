//! Node wiring and lifecycle.
//!
//! Construction builds the store, CLA manager, routing agent and
//! dispatcher; `start` brings up listeners, static peers, discovery and the
//! periodic jobs; `shutdown` tears everything down in order: scheduler
//! first, then the CLA manager, then the store.

use super::*;
use bpv7::builder::Builder;
use bpv7::bundle_flags::BundleFlags;
use bpv7::bundle_id::BundleId;
use bpv7::eid::Eid;
use cla::{ClaKind, ConvergenceStatus};
use config::Config;
use dispatcher::Dispatcher;
use id_keeper::IdKeeper;
use routing::{RoutingAgent, RoutingContext};
use scheduler::Scheduler;
use std::sync::Arc;
use store::Store;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Routing(#[from] regex::Error),

    #[error(transparent)]
    Store(#[from] store::Error),

    #[error(transparent)]
    Cla(#[from] cla::Error),

    #[error(transparent)]
    Bundle(#[from] bpv7::Error),

    #[error(transparent)]
    Dispatch(#[from] dispatcher::Error),

    #[error(transparent)]
    Agent(#[from] agents::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

const EVENT_CHANNEL_DEPTH: usize = 64;
const EXPIRY_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10);
const RETRY_PASS_INTERVAL: std::time::Duration = std::time::Duration::from_secs(10);
const ID_PRUNE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60 * 60);

pub struct Node {
    config: Config,
    store: Arc<Store>,
    manager: Arc<cla::Manager>,
    discovery: Option<Arc<discovery::Discovery>>,
    dispatcher: Arc<Dispatcher>,
    agents: Arc<agents::Registry>,
    scheduler: Arc<Scheduler>,
    routing: Arc<dyn RoutingAgent>,
    id_keeper: Arc<IdKeeper>,
    events: std::sync::Mutex<Option<mpsc::Receiver<ConvergenceStatus>>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Node {
    pub async fn new(config: Config) -> Result<Arc<Self>> {
        let metadata = store::memory::MemoryMetadataStore::new();
        let payloads = store::localdisk::LocalDiskPayloadStore::new(&config.store_path).await?;
        let store = Arc::new(Store::new(metadata, payloads));

        let peers = cla::PeerTable::new();
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_DEPTH);
        let manager = cla::Manager::new(config.node_id.clone(), events_tx, peers.clone());

        let routing = routing::create(&config.routing)?;
        let registry = Arc::new(bpv7::registry::Registry::default());
        let id_keeper = Arc::new(IdKeeper::new());
        let signing_key = config.signing_key().map_err(Error::Config)?;

        let ctx = RoutingContext {
            store: store.clone(),
            peers: peers.clone(),
            node_id: config.node_id.clone(),
        };
        let agents = agents::Registry::new();
        let dispatcher = Dispatcher::new(
            ctx,
            routing.clone(),
            manager.clone(),
            agents.clone(),
            registry,
            id_keeper.clone(),
            signing_key,
            config.inspect_all_bundles,
        );

        let discovery = if config.discovery {
            let announcements = config
                .listen
                .iter()
                .filter_map(|listen| {
                    let port = listen
                        .address
                        .parse::<std::net::SocketAddr>()
                        .ok()
                        .map(|a| a.port())?;
                    Some(discovery::Announcement {
                        kind: listen.cla,
                        endpoint: config.node_id.clone(),
                        port,
                    })
                })
                .collect();
            Some(discovery::Discovery::new(
                config.node_id.clone(),
                announcements,
                std::time::Duration::from_secs(config.discovery_interval_secs),
                manager.clone(),
            ))
        } else {
            None
        };

        Ok(Arc::new(Self {
            config,
            store,
            manager,
            discovery,
            dispatcher,
            agents,
            scheduler: Scheduler::new(),
            routing,
            id_keeper,
            events: std::sync::Mutex::new(Some(events_rx)),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }))
    }

    pub fn node_id(&self) -> &Eid {
        &self.config.node_id
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn register_agent(&self, agent: Arc<dyn agents::ApplicationAgent>) -> Result<()> {
        self.agents.register(agent).map_err(Into::into)
    }

    pub fn unregister_agent(&self, endpoint: &Eid) {
        self.agents.unregister(endpoint)
    }

    pub async fn start(self: &Arc<Self>) -> Result<()> {
        info!("node {} starting", self.config.node_id);

        self.spawn_event_loop();

        // Listeners
        for listen in &self.config.listen {
            match listen.cla {
                ClaKind::Mtcp => {
                    let address = listen
                        .address
                        .parse()
                        .map_err(|e| Error::Config(format!("bad listen address: {e}")))?;
                    self.manager
                        .register(cla::mtcp::MtcpListener::new(address))
                        .await?;
                }
                kind => {
                    return Err(Error::Config(format!(
                        "no in-tree listener for CLA type {kind}"
                    )));
                }
            }
        }

        // Static peers
        for peer in &self.config.peer {
            match peer.cla {
                ClaKind::Mtcp => {
                    self.manager
                        .register(cla::mtcp::MtcpSender::new(
                            peer.endpoint.clone(),
                            peer.address.clone(),
                        ))
                        .await?;
                }
                kind => {
                    return Err(Error::Config(format!(
                        "no in-tree dialer for CLA type {kind}"
                    )));
                }
            }
        }

        if let Some(discovery) = &self.discovery {
            discovery.start().await?;
        }

        self.register_jobs();
        self.recover_store().await;

        info!("node {} started", self.config.node_id);
        Ok(())
    }

    fn spawn_event_loop(self: &Arc<Self>) {
        let Some(mut events) = self.events.lock().unwrap().take() else {
            return;
        };
        let this = self.clone();
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    event = events.recv() => {
                        let Some(event) = event else { return };
                        this.handle_event(event).await;
                    }
                }
            }
        });
    }

    async fn handle_event(self: &Arc<Self>, event: ConvergenceStatus) {
        match event {
            ConvergenceStatus::ReceivedBundle { cla, data } => {
                trace!("bundle from {cla}");
                let dispatcher = self.dispatcher.clone();
                // One pipeline pass per incoming bundle
                self.tracker.spawn(async move {
                    let _ = dispatcher.receive_bundle(data).await;
                });
            }
            ConvergenceStatus::PeerAppeared(peer) => {
                info!("peer appeared: {peer}");
                self.routing
                    .report_peer_appeared(self.routing_ctx(), &peer)
                    .await;
                // New contact: see whether parked bundles can move now
                let dispatcher = self.dispatcher.clone();
                self.tracker.spawn(async move {
                    dispatcher.process_pending().await;
                });
            }
            ConvergenceStatus::PeerDisappeared(peer) => {
                info!("peer disappeared: {peer}");
                self.routing
                    .report_peer_disappeared(self.routing_ctx(), &peer)
                    .await;
                self.manager.handle_peer_disappeared(&peer).await;
            }
        }
    }

    fn routing_ctx(&self) -> &RoutingContext {
        &self.dispatcher.ctx
    }

    fn register_jobs(self: &Arc<Self>) {
        let manager = self.manager.clone();
        self.scheduler
            .register("cla-retry", cla::manager::DEFAULT_RETRY_TIME, move || {
                let manager = manager.clone();
                async move { manager.retry_tick().await }
            });

        let dispatcher = self.dispatcher.clone();
        self.scheduler
            .register("store-expiry", EXPIRY_INTERVAL, move || {
                let dispatcher = dispatcher.clone();
                async move { dispatcher.reap_expired().await }
            });

        let dispatcher = self.dispatcher.clone();
        self.scheduler
            .register("pipeline-retry", RETRY_PASS_INTERVAL, move || {
                let dispatcher = dispatcher.clone();
                async move { dispatcher.process_pending().await }
            });

        let id_keeper = self.id_keeper.clone();
        self.scheduler
            .register("id-keeper-prune", ID_PRUNE_INTERVAL, move || {
                let id_keeper = id_keeper.clone();
                async move { id_keeper.prune() }
            });

        if let Some(interval) = self.routing.timer_interval() {
            let this = self.clone();
            self.scheduler.register("routing-timer", interval, move || {
                let this = this.clone();
                async move {
                    for bundle in this
                        .routing
                        .on_timer(this.routing_ctx())
                        .await
                    {
                        if let Err(e) = this.dispatcher.dispatch_outgoing(bundle).await {
                            debug!("routing broadcast failed: {e}");
                        }
                    }
                }
            });
        }
    }

    /// Re-ingests payload blobs that have no metadata record (e.g. after a
    /// crash between blob write and record insert cleanup).
    async fn recover_store(self: &Arc<Self>) {
        let orphans = match self.store.recoverable_blobs().await {
            Ok(orphans) => orphans,
            Err(e) => {
                warn!("store recovery scan failed: {e}");
                return;
            }
        };
        for blob in orphans {
            match self.store.load_blob(&blob).await {
                Ok(Some(data)) => {
                    info!("recovering orphaned bundle blob {blob}");
                    let _ = self.dispatcher.receive_bundle(data).await;
                }
                Ok(None) => {}
                Err(e) => warn!("failed to load blob {blob}: {e}"),
            }
        }
    }

    /// Builds, stamps, optionally signs, and dispatches a bundle sourced at
    /// this node.
    pub async fn send(
        &self,
        source: Eid,
        destination: Eid,
        payload: Vec<u8>,
        lifetime: std::time::Duration,
        flags: BundleFlags,
    ) -> Result<BundleId> {
        if !source.same_node(&self.config.node_id) {
            return Err(Error::Config(format!(
                "source {source} does not belong to this node"
            )));
        }
        let bundle = Builder::new()
            .source(source.clone())
            .destination(destination)
            .flags(flags)
            .timestamp(self.id_keeper.stamp(&source))
            .lifetime(lifetime)
            .payload(payload)
            .build()?;
        let id = bundle.id();
        self.dispatcher.dispatch_outgoing(bundle).await?;
        Ok(id)
    }

    /// An application agent has appeared; bundles parked for its endpoints
    /// get another delivery attempt.
    pub async fn poke_pending(&self) {
        self.dispatcher.process_pending().await;
    }

    /// Feeds one serialised bundle into the pipeline, as if it had arrived
    /// over a convergence layer. Out-of-tree adapters use the manager's
    /// status channel instead.
    pub async fn ingest(&self, data: Vec<u8>) -> Result<()> {
        self.dispatcher.receive_bundle(data).await.map_err(Into::into)
    }

    /// Registers an additional peer at runtime (learned out-of-band, e.g.
    /// through an operator interface).
    pub async fn add_peer(&self, cla: ClaKind, address: String, endpoint: Eid) -> Result<()> {
        match cla {
            ClaKind::Mtcp => self
                .manager
                .register(cla::mtcp::MtcpSender::new(endpoint, address))
                .await
                .map_err(Into::into),
            kind => Err(Error::Config(format!("no in-tree dialer for CLA type {kind}"))),
        }
    }

    /// Stops the node: scheduler, then the CLA manager (waiting for each
    /// adapter), then the store is left to flush on drop.
    pub async fn shutdown(&self) {
        info!("node {} stopping", self.config.node_id);

        self.scheduler.shutdown().await;
        if let Some(discovery) = &self.discovery {
            discovery.close().await;
        }
        self.manager.close().await;
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.agents.shutdown().await;

        info!("node {} stopped", self.config.node_id);
    }
}
