//! The CLA manager: supervises every registered transport endpoint,
//! restarts failed ones with bounded retries, and tracks peer
//! appearance/disappearance.

use super::*;

/// Retry failed adapters this often.
pub const DEFAULT_RETRY_TIME: std::time::Duration = std::time::Duration::from_secs(10);
/// Give up after this many consecutive failed restarts.
pub const DEFAULT_QUEUE_TTL: u32 = 10;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ElementState {
    Inactive,
    Active,
    Retiring,
}

struct Element {
    convergence: Arc<dyn Convergence>,
    state: ElementState,
    retries: u32,
}

pub struct Manager {
    node_id: Eid,
    elements: RwLock<HashMap<String, Element>>,
    providers: std::sync::Mutex<Vec<Arc<dyn ConvergenceProvider>>>,
    events: mpsc::Sender<ConvergenceStatus>,
    peers: Arc<PeerTable>,
    queue_ttl: u32,
}

impl Manager {
    pub fn new(
        node_id: Eid,
        events: mpsc::Sender<ConvergenceStatus>,
        peers: Arc<PeerTable>,
    ) -> Arc<Self> {
        Arc::new(Self {
            node_id,
            elements: RwLock::new(HashMap::new()),
            providers: std::sync::Mutex::new(Vec::new()),
            events,
            peers,
            queue_ttl: DEFAULT_QUEUE_TTL,
        })
    }

    /// The outbound status stream handed to adapters; routing consumes the
    /// receiving end.
    pub fn channel(&self) -> mpsc::Sender<ConvergenceStatus> {
        self.events.clone()
    }

    pub fn peers(&self) -> Arc<PeerTable> {
        self.peers.clone()
    }

    /// Registers and starts an adapter. Registering a sender whose peer is
    /// this node is a loopback and is silently ignored.
    pub async fn register(&self, convergence: Arc<dyn Convergence>) -> Result<()> {
        let name = convergence.name();

        if let Some(peer) = convergence.peer()
            && peer.same_node(&self.node_id)
        {
            debug!("Ignoring loopback CLA registration {name}");
            return Ok(());
        }

        {
            let mut elements = self.elements.write().unwrap();
            if elements.contains_key(&name) {
                return Err(Error::AlreadyExists(name));
            }
            elements.insert(
                name.clone(),
                Element {
                    convergence: convergence.clone(),
                    state: ElementState::Inactive,
                    retries: 0,
                },
            );
        }
        info!("Registered CLA {name}");

        self.try_start(&name).await;
        Ok(())
    }

    pub async fn register_provider(
        self: &Arc<Self>,
        provider: Arc<dyn ConvergenceProvider>,
    ) -> Result<()> {
        provider.start(self.clone()).await?;
        self.providers.lock().unwrap().push(provider);
        Ok(())
    }

    async fn try_start(&self, name: &str) {
        let Some(convergence) = self.element(name) else {
            return;
        };

        match convergence.start(self.events.clone()).await {
            StartOutcome::Up => {
                let mut elements = self.elements.write().unwrap();
                if let Some(element) = elements.get_mut(name) {
                    element.state = ElementState::Active;
                    element.retries = 0;
                }
                if let Some(peer) = convergence.peer() {
                    if self.peers.insert(peer.clone(), name.to_string()) {
                        let _ = self
                            .events
                            .try_send(ConvergenceStatus::PeerAppeared(peer));
                    }
                }
            }
            StartOutcome::Retry => {
                debug!("CLA {name} failed to start, queued for retry");
            }
            StartOutcome::Abandon => {
                warn!("CLA {name} failed permanently, evicting");
                self.evict(name).await;
            }
        }
    }

    fn element(&self, name: &str) -> Option<Arc<dyn Convergence>> {
        self.elements
            .read()
            .unwrap()
            .get(name)
            .map(|e| e.convergence.clone())
    }

    async fn evict(&self, name: &str) {
        let element = self.elements.write().unwrap().remove(name);
        if let Some(element) = element {
            element.convergence.close().await;
            if let Some(peer) = element.convergence.peer()
                && self.peers.remove(&peer)
            {
                let _ = self
                    .events
                    .try_send(ConvergenceStatus::PeerDisappeared(peer));
            }
            info!("Unregistered CLA {name}");
        }
    }

    pub async fn unregister(&self, name: &str) {
        self.evict(name).await;
    }

    /// Stops and restarts an adapter, keeping its registration.
    pub async fn restart(&self, name: &str) {
        let Some(convergence) = self.element(name) else {
            return;
        };
        convergence.close().await;
        {
            let mut elements = self.elements.write().unwrap();
            if let Some(element) = elements.get_mut(name) {
                element.state = ElementState::Inactive;
            }
        }
        self.try_start(name).await;
    }

    /// Active senders (endpoints with a known peer).
    pub fn senders(&self) -> Vec<Arc<dyn Convergence>> {
        self.elements
            .read()
            .unwrap()
            .values()
            .filter(|e| e.state == ElementState::Active && e.convergence.peer().is_some())
            .map(|e| e.convergence.clone())
            .collect()
    }

    /// Active receivers (listeners).
    pub fn receivers(&self) -> Vec<Arc<dyn Convergence>> {
        self.elements
            .read()
            .unwrap()
            .values()
            .filter(|e| e.state == ElementState::Active && e.convergence.peer().is_none())
            .map(|e| e.convergence.clone())
            .collect()
    }

    /// The active sender serving `peer`, if any.
    pub fn sender_for(&self, peer: &Eid) -> Option<Arc<dyn Convergence>> {
        let name = self.peers.cla_for(peer)?;
        let elements = self.elements.read().unwrap();
        let element = elements.get(&name)?;
        (element.state == ElementState::Active).then(|| element.convergence.clone())
    }

    /// One scheduler tick: re-activate inactive elements, evicting any that
    /// have exhausted their retry budget.
    pub async fn retry_tick(&self) {
        let stale: Vec<String> = {
            let mut elements = self.elements.write().unwrap();
            elements
                .iter_mut()
                .filter(|(_, e)| e.state == ElementState::Inactive)
                .map(|(name, e)| {
                    e.retries += 1;
                    name.clone()
                })
                .collect()
        };

        for name in stale {
            let exhausted = {
                let elements = self.elements.read().unwrap();
                elements
                    .get(&name)
                    .is_some_and(|e| e.retries > self.queue_ttl)
            };
            if exhausted {
                warn!("CLA {name} exhausted its retry budget");
                self.evict(&name).await;
            } else {
                self.try_start(&name).await;
            }
        }
    }

    /// A peer-disappeared event triggers an automatic restart of the
    /// element that served it.
    pub async fn handle_peer_disappeared(&self, peer: &Eid) {
        let Some(name) = self.peers.cla_for(peer) else {
            return;
        };
        self.peers.remove(peer);
        {
            let mut elements = self.elements.write().unwrap();
            if let Some(element) = elements.get_mut(&name) {
                element.state = ElementState::Inactive;
            }
        }
        debug!("Peer {peer} disappeared, restarting CLA {name}");
        self.try_start(&name).await;
    }

    /// Closes every provider and adapter, waiting for each in turn.
    pub async fn close(&self) {
        let providers = std::mem::take(&mut *self.providers.lock().unwrap());
        for provider in providers {
            provider.close().await;
        }

        let elements: Vec<(String, Arc<dyn Convergence>)> = {
            let mut elements = self.elements.write().unwrap();
            elements
                .iter_mut()
                .map(|(name, e)| {
                    e.state = ElementState::Retiring;
                    (name.clone(), e.convergence.clone())
                })
                .collect()
        };
        for (name, convergence) in elements {
            convergence.close().await;
            debug!("Closed CLA {name}");
        }
        self.elements.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeSender {
        name: String,
        peer: Eid,
        starts: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl Convergence for FakeSender {
        fn name(&self) -> String {
            self.name.clone()
        }

        fn kind(&self) -> ClaKind {
            ClaKind::Mtcp
        }

        fn peer(&self) -> Option<Eid> {
            Some(self.peer.clone())
        }

        async fn start(&self, _events: mpsc::Sender<ConvergenceStatus>) -> StartOutcome {
            let n = self.starts.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                StartOutcome::Retry
            } else {
                StartOutcome::Up
            }
        }

        async fn send(&self, _bundle: &[u8]) -> Result<()> {
            Ok(())
        }

        async fn close(&self) {}
    }

    fn make_manager() -> (Arc<Manager>, mpsc::Receiver<ConvergenceStatus>) {
        let (tx, rx) = mpsc::channel(16);
        let manager = Manager::new("dtn://me/".parse().unwrap(), tx, PeerTable::new());
        (manager, rx)
    }

    #[tokio::test]
    async fn register_start_and_peer_appeared() {
        let (manager, mut rx) = make_manager();
        let sender = Arc::new(FakeSender {
            name: "fake:1".into(),
            peer: "dtn://peer/".parse().unwrap(),
            starts: AtomicU32::new(0),
            fail_first: 0,
        });

        manager.register(sender).await.unwrap();
        assert_eq!(manager.senders().len(), 1);
        assert!(manager.receivers().is_empty());
        assert!(
            manager
                .sender_for(&"dtn://peer/x".parse().unwrap())
                .is_some()
        );

        assert!(matches!(
            rx.recv().await,
            Some(ConvergenceStatus::PeerAppeared(p)) if p == "dtn://peer/".parse().unwrap()
        ));
    }

    #[tokio::test]
    async fn duplicate_names_rejected() {
        let (manager, _rx) = make_manager();
        let mk = || {
            Arc::new(FakeSender {
                name: "fake:1".into(),
                peer: "dtn://peer/".parse().unwrap(),
                starts: AtomicU32::new(0),
                fail_first: 0,
            })
        };
        manager.register(mk()).await.unwrap();
        assert!(matches!(
            manager.register(mk()).await,
            Err(Error::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn loopback_guard() {
        let (manager, _rx) = make_manager();
        let sender = Arc::new(FakeSender {
            name: "fake:self".into(),
            peer: "dtn://me/incoming".parse().unwrap(),
            starts: AtomicU32::new(0),
            fail_first: 0,
        });
        manager.register(sender).await.unwrap();
        // No element registered for a sender pointing at ourselves
        assert!(manager.senders().is_empty());
    }

    #[tokio::test]
    async fn retry_until_up() {
        let (manager, _rx) = make_manager();
        let sender = Arc::new(FakeSender {
            name: "fake:flaky".into(),
            peer: "dtn://peer/".parse().unwrap(),
            starts: AtomicU32::new(0),
            fail_first: 2,
        });
        manager.register(sender.clone()).await.unwrap();
        assert!(manager.senders().is_empty());

        manager.retry_tick().await;
        assert!(manager.senders().is_empty());
        manager.retry_tick().await;
        assert_eq!(manager.senders().len(), 1);
        assert_eq!(sender.starts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_budget_evicts() {
        let (manager, _rx) = make_manager();
        let sender = Arc::new(FakeSender {
            name: "fake:dead".into(),
            peer: "dtn://peer/".parse().unwrap(),
            starts: AtomicU32::new(0),
            fail_first: u32::MAX,
        });
        manager.register(sender).await.unwrap();

        for _ in 0..=DEFAULT_QUEUE_TTL {
            manager.retry_tick().await;
        }
        // One more tick pushes it over the budget
        manager.retry_tick().await;
        assert!(manager.elements.read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn peer_disappeared_restarts() {
        let (manager, mut rx) = make_manager();
        let peer: Eid = "dtn://peer/".parse().unwrap();
        let sender = Arc::new(FakeSender {
            name: "fake:1".into(),
            peer: peer.clone(),
            starts: AtomicU32::new(0),
            fail_first: 0,
        });
        manager.register(sender.clone()).await.unwrap();
        let _ = rx.recv().await;

        manager.handle_peer_disappeared(&peer).await;
        // Restarted and the peer is re-announced
        assert!(matches!(
            rx.recv().await,
            Some(ConvergenceStatus::PeerAppeared(_))
        ));
        assert_eq!(sender.starts.load(Ordering::SeqCst), 2);
    }
}
