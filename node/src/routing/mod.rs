//! The pluggable routing engine.
//!
//! Every algorithm implements [`RoutingAgent`]; the pipeline consults it at
//! each stage and reports per-peer outcomes back. Algorithms reach shared
//! state only through the injected [`RoutingContext`] — the store for
//! per-bundle forwarding metadata, the peer table for current reachability.

use super::*;
use bpv7::bundle::Bundle;
use bpv7::eid::Eid;
use cla::PeerTable;
use descriptor::BundleDescriptor;
use std::sync::Arc;
use store::Store;

pub mod dtlsr;
pub mod epidemic;
pub mod mule;
pub mod prophet;
pub mod spray;

/// Everything an algorithm may touch.
pub struct RoutingContext {
    pub store: Arc<Store>,
    pub peers: Arc<PeerTable>,
    pub node_id: Eid,
}

/// The forwarding vote for one bundle.
#[derive(Debug, Default)]
pub struct ForwardingPlan {
    /// Peer node ids that should receive a copy.
    pub peers: Vec<Eid>,
    /// When set, the bundle's constraints are purged after a successful
    /// send (e.g. direct delivery to the destination).
    pub delete_after_send: bool,
}

impl ForwardingPlan {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn to_peers(peers: Vec<Eid>) -> Self {
        Self {
            peers,
            delete_after_send: false,
        }
    }

    pub fn direct(peer: Eid) -> Self {
        Self {
            peers: vec![peer],
            delete_after_send: true,
        }
    }
}

#[async_trait]
pub trait RoutingAgent: Send + Sync {
    fn name(&self) -> &'static str;

    /// Called once per bundle as it enters the pipeline, before any
    /// forwarding decision.
    async fn notify_new_bundle(&self, ctx: &RoutingContext, desc: &BundleDescriptor);

    /// Gate for the dispatch stage.
    async fn dispatching_allowed(&self, ctx: &RoutingContext, desc: &BundleDescriptor) -> bool;

    /// Votes on which peers receive this bundle.
    async fn sender_for_bundle(
        &self,
        ctx: &RoutingContext,
        desc: &BundleDescriptor,
    ) -> ForwardingPlan;

    /// Last-minute, per-peer mutation of the outbound copy (e.g. attaching
    /// a copy-count block).
    async fn prepare_outbound(
        &self,
        _ctx: &RoutingContext,
        _desc: &BundleDescriptor,
        _peer: &Eid,
        _bundle: &mut Bundle,
    ) {
    }

    /// A send to `peer` failed; reclaim whatever was optimistically spent.
    async fn report_failure(&self, ctx: &RoutingContext, desc: &BundleDescriptor, peer: &Eid);

    async fn report_peer_appeared(&self, _ctx: &RoutingContext, _peer: &Eid) {}

    async fn report_peer_disappeared(&self, _ctx: &RoutingContext, _peer: &Eid) {}

    /// Interval for [`on_timer`](Self::on_timer), when the algorithm needs
    /// periodic work (metadata GC, link-state broadcast, aging).
    fn timer_interval(&self) -> Option<std::time::Duration> {
        None
    }

    /// Periodic tick. Returned bundles are injected into the outgoing
    /// pipeline (used for routing-control broadcasts).
    async fn on_timer(&self, _ctx: &RoutingContext) -> Vec<Bundle> {
        Vec::new()
    }
}

/// Builds the configured algorithm.
pub fn create(config: &config::RoutingConfig) -> Result<Arc<dyn RoutingAgent>, regex::Error> {
    Ok(match config {
        config::RoutingConfig::Epidemic => Arc::new(epidemic::Epidemic::new()),
        config::RoutingConfig::SprayAndWait { multiplicity } => {
            Arc::new(spray::SprayAndWait::vanilla(*multiplicity))
        }
        config::RoutingConfig::BinarySprayAndWait { multiplicity } => {
            Arc::new(spray::SprayAndWait::binary(*multiplicity))
        }
        config::RoutingConfig::Dtlsr => Arc::new(dtlsr::Dtlsr::new()),
        config::RoutingConfig::Prophet {
            p_encounter,
            beta,
            gamma,
        } => Arc::new(prophet::Prophet::new(*p_encounter, *beta, *gamma)),
        config::RoutingConfig::SensorMule {
            sensor_pattern,
            inner,
        } => {
            let inner = create(inner)?;
            Arc::new(mule::SensorMule::new(regex::Regex::new(sensor_pattern)?, inner))
        }
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use bpv7::builder::Builder;
    use store::memory::{MemoryMetadataStore, MemoryPayloadStore};

    pub fn context(node_id: &str) -> RoutingContext {
        RoutingContext {
            store: Arc::new(Store::new(
                MemoryMetadataStore::new(),
                MemoryPayloadStore::new(),
            )),
            peers: PeerTable::new(),
            node_id: node_id.parse().unwrap(),
        }
    }

    pub async fn stored_descriptor(
        ctx: &RoutingContext,
        source: &str,
        destination: &str,
    ) -> BundleDescriptor {
        let bundle = Builder::new()
            .source(source.parse().unwrap())
            .destination(destination.parse().unwrap())
            .payload(b"routing test payload".to_vec())
            .build()
            .unwrap();
        ctx.store
            .push(&bundle, &bundle.to_cbor().unwrap())
            .await
            .unwrap();
        BundleDescriptor::new_incoming(bundle)
    }
}
