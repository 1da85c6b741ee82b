//! The application-agent multiplexer.
//!
//! Locally registered agents claim endpoints; the pipeline fans delivered
//! bundles out to them by destination. Agents talk to the node through
//! bounded channels — the registry owns the agent handles, each agent owns
//! only its channel endpoints, so shutdown never chases ownership cycles.

use super::*;
use bpv7::bundle::Bundle;
use bpv7::eid::Eid;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no registered agent for endpoint {0}")]
    NoAgent(Eid),

    #[error("endpoint {0} is already claimed by another agent")]
    EndpointClaimed(Eid),

    #[error("the agent has disconnected")]
    Disconnected,
}

/// Events surfaced to an agent besides payload delivery.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A status report referencing one of the agent's bundles arrived.
    StatusReport(bpv7::status_report::StatusReport),
    /// An outgoing bundle was refused by the pipeline and returned to its
    /// originating agent.
    SendFailed {
        bundle_id: bpv7::bundle_id::BundleId,
        reason: String,
    },
    /// The node is shutting down.
    Shutdown,
}

#[async_trait]
pub trait ApplicationAgent: Send + Sync {
    /// The endpoints this agent serves.
    fn endpoints(&self) -> Vec<Eid>;

    /// Hands a bundle to the agent. An error returns the bundle to the
    /// pipeline, which will retry once the agent is reachable again.
    async fn deliver(&self, bundle: &Bundle) -> Result<()>;

    async fn notify(&self, _event: AgentEvent) {}
}

/// Endpoint-keyed agent registry.
#[derive(Default)]
pub struct Registry {
    agents: RwLock<HashMap<Eid, Arc<dyn ApplicationAgent>>>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, agent: Arc<dyn ApplicationAgent>) -> Result<()> {
        let endpoints = agent.endpoints();
        let mut agents = self.agents.write().unwrap();
        for endpoint in &endpoints {
            if agents.contains_key(endpoint) {
                return Err(Error::EndpointClaimed(endpoint.clone()));
            }
        }
        for endpoint in endpoints {
            info!("Registered application agent for {endpoint}");
            agents.insert(endpoint, agent.clone());
        }
        Ok(())
    }

    pub fn unregister(&self, endpoint: &Eid) {
        if self.agents.write().unwrap().remove(endpoint).is_some() {
            info!("Unregistered application agent for {endpoint}");
        }
    }

    /// The agent serving `destination`.
    pub fn agent_for(&self, destination: &Eid) -> Option<Arc<dyn ApplicationAgent>> {
        self.agents.read().unwrap().get(destination).cloned()
    }

    pub fn has_endpoint(&self, destination: &Eid) -> bool {
        self.agents.read().unwrap().contains_key(destination)
    }

    /// All endpoints with a registered agent.
    pub fn endpoints(&self) -> Vec<Eid> {
        self.agents.read().unwrap().keys().cloned().collect()
    }

    pub async fn shutdown(&self) {
        let agents: Vec<Arc<dyn ApplicationAgent>> = {
            let mut agents = self.agents.write().unwrap();
            agents.drain().map(|(_, agent)| agent).collect()
        };
        for agent in agents {
            agent.notify(AgentEvent::Shutdown).await;
        }
    }
}

/// A channel-backed agent: delivered bundles and events are forwarded into
/// bounded channels whose receiving ends the application holds.
pub struct ChannelAgent {
    endpoints: Vec<Eid>,
    bundles: mpsc::Sender<Bundle>,
    events: mpsc::Sender<AgentEvent>,
}

impl ChannelAgent {
    /// Creates the agent plus the receiving ends of its two channels.
    pub fn new(
        endpoints: Vec<Eid>,
        depth: usize,
    ) -> (
        Arc<Self>,
        mpsc::Receiver<Bundle>,
        mpsc::Receiver<AgentEvent>,
    ) {
        let (bundles_tx, bundles_rx) = mpsc::channel(depth);
        let (events_tx, events_rx) = mpsc::channel(depth);
        (
            Arc::new(Self {
                endpoints,
                bundles: bundles_tx,
                events: events_tx,
            }),
            bundles_rx,
            events_rx,
        )
    }
}

#[async_trait]
impl ApplicationAgent for ChannelAgent {
    fn endpoints(&self) -> Vec<Eid> {
        self.endpoints.clone()
    }

    async fn deliver(&self, bundle: &Bundle) -> Result<()> {
        self.bundles
            .send(bundle.clone())
            .await
            .map_err(|_| Error::Disconnected)
    }

    async fn notify(&self, event: AgentEvent) {
        let _ = self.events.send(event).await;
    }
}
