//! Spray-and-wait routing, vanilla and binary.
//!
//! The originator starts a bundle with `L` copies. Vanilla hands one copy
//! per forward; binary hands over `floor(remaining/2)` (announced to the
//! receiving node in a copy-count block) and keeps the ceiling. Once a
//! node holds fewer than two copies it enters the wait phase and only
//! attempts direct delivery to the destination.

use super::*;
use bpv7::canonical::CanonicalData;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

pub const GC_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

#[derive(Debug, Default, Clone)]
struct SprayMeta {
    remaining: u64,
    sent: HashSet<Eid>,
    /// Copies promised to peers in the current forwarding pass; reclaimed
    /// on failure (binary mode).
    handover: HashMap<Eid, u64>,
}

pub struct SprayAndWait {
    multiplicity: u64,
    binary: bool,
    meta: Mutex<HashMap<String, SprayMeta>>,
}

impl SprayAndWait {
    pub fn vanilla(multiplicity: u64) -> Self {
        Self {
            multiplicity: multiplicity.max(1),
            binary: false,
            meta: Mutex::new(HashMap::new()),
        }
    }

    pub fn binary(multiplicity: u64) -> Self {
        Self {
            multiplicity: multiplicity.max(1),
            binary: true,
            meta: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    fn remaining(&self, key: &str) -> u64 {
        self.meta
            .lock()
            .unwrap()
            .get(key)
            .map_or(0, |m| m.remaining)
    }
}

#[async_trait]
impl RoutingAgent for SprayAndWait {
    fn name(&self) -> &'static str {
        if self.binary { "binary-spray" } else { "spray-and-wait" }
    }

    async fn notify_new_bundle(&self, ctx: &RoutingContext, desc: &BundleDescriptor) {
        let key = desc.key();
        let mut meta = self.meta.lock().unwrap();
        if meta.contains_key(&key) {
            return;
        }

        // An incoming copy-count block fixes our allocation; otherwise the
        // originator gets the full multiplicity and relays a single copy
        let remaining = match desc
            .bundle
            .find_block(bpv7::block::Type::BinarySpray)
            .map(|b| &b.data)
        {
            Some(CanonicalData::BinarySpray { remaining }) if self.binary => (*remaining).max(1),
            _ if desc.bundle.primary.source.same_node(&ctx.node_id) => self.multiplicity,
            _ => 1,
        };

        meta.insert(
            key,
            SprayMeta {
                remaining,
                sent: HashSet::new(),
                handover: HashMap::new(),
            },
        );
    }

    async fn dispatching_allowed(&self, _ctx: &RoutingContext, _desc: &BundleDescriptor) -> bool {
        true
    }

    async fn sender_for_bundle(
        &self,
        ctx: &RoutingContext,
        desc: &BundleDescriptor,
    ) -> ForwardingPlan {
        let key = desc.key();
        let destination = desc.bundle.primary.destination.clone();
        let peers = ctx.peers.current();

        let mut meta = self.meta.lock().unwrap();
        let meta = meta.entry(key).or_default();

        // Direct delivery trumps everything and ends our custody
        if let Some(peer) = peers.iter().find(|p| destination.same_node(p)) {
            return ForwardingPlan::direct(peer.clone());
        }

        // Wait phase
        if meta.remaining < 2 {
            return ForwardingPlan::none();
        }

        let mut plan = Vec::new();
        for peer in peers {
            if meta.remaining < 2 {
                break;
            }
            if meta.sent.contains(&peer) {
                continue;
            }
            let handover = if self.binary {
                let h = meta.remaining / 2;
                meta.remaining -= h;
                h
            } else {
                meta.remaining -= 1;
                1
            };
            meta.sent.insert(peer.clone());
            meta.handover.insert(peer.clone(), handover);
            plan.push(peer);
        }
        ForwardingPlan::to_peers(plan)
    }

    async fn prepare_outbound(
        &self,
        _ctx: &RoutingContext,
        desc: &BundleDescriptor,
        peer: &Eid,
        bundle: &mut Bundle,
    ) {
        if !self.binary {
            return;
        }
        let handover = self
            .meta
            .lock()
            .unwrap()
            .get(&desc.key())
            .and_then(|m| m.handover.get(peer).copied())
            .unwrap_or(1);

        if let Some(block) = bundle.find_block_mut(bpv7::block::Type::BinarySpray) {
            block.data = CanonicalData::BinarySpray {
                remaining: handover,
            };
        } else {
            bundle.add_block(CanonicalData::BinarySpray {
                remaining: handover,
            });
        }
    }

    async fn report_failure(&self, _ctx: &RoutingContext, desc: &BundleDescriptor, peer: &Eid) {
        let mut meta = self.meta.lock().unwrap();
        if let Some(meta) = meta.get_mut(&desc.key()) {
            meta.sent.remove(peer);
            let reclaimed = meta.handover.remove(peer).unwrap_or(0);
            meta.remaining += reclaimed;
        }
    }

    fn timer_interval(&self) -> Option<std::time::Duration> {
        Some(GC_INTERVAL)
    }

    /// Garbage-collects metadata for bundles no longer in the store.
    async fn on_timer(&self, ctx: &RoutingContext) -> Vec<Bundle> {
        let keys: Vec<String> = self.meta.lock().unwrap().keys().cloned().collect();
        for key in keys {
            if matches!(ctx.store.get(&key).await, Ok(None)) {
                self.meta.lock().unwrap().remove(&key);
            }
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routing::test_support::*;

    #[tokio::test]
    async fn originator_gets_multiplicity() {
        let ctx = context("dtn://me/");
        let agent = SprayAndWait::vanilla(4);
        let desc = stored_descriptor(&ctx, "dtn://me/app", "dtn://far/").await;
        agent.notify_new_bundle(&ctx, &desc).await;
        assert_eq!(agent.remaining(&desc.key()), 4);

        // A relayed bundle gets exactly one copy
        let relayed = stored_descriptor(&ctx, "dtn://elsewhere/", "dtn://far/").await;
        agent.notify_new_bundle(&ctx, &relayed).await;
        assert_eq!(agent.remaining(&relayed.key()), 1);
    }

    #[tokio::test]
    async fn vanilla_spend_and_wait_phase() {
        let ctx = context("dtn://me/");
        let agent = SprayAndWait::vanilla(3);
        let desc = stored_descriptor(&ctx, "dtn://me/app", "dtn://far/").await;
        agent.notify_new_bundle(&ctx, &desc).await;

        for name in ["a", "b", "c", "d"] {
            ctx.peers
                .insert(format!("dtn://{name}/").parse().unwrap(), "cla".into());
        }

        // Three copies: two can be sprayed, the last is retained
        let plan = agent.sender_for_bundle(&ctx, &desc).await;
        assert_eq!(plan.peers.len(), 2);
        assert_eq!(agent.remaining(&desc.key()), 1);

        // Wait phase: no more spraying
        let plan = agent.sender_for_bundle(&ctx, &desc).await;
        assert!(plan.peers.is_empty());

        // ...until the destination itself shows up
        ctx.peers.insert("dtn://far/".parse().unwrap(), "cla".into());
        let plan = agent.sender_for_bundle(&ctx, &desc).await;
        assert_eq!(plan.peers, vec!["dtn://far/".parse::<Eid>().unwrap()]);
        assert!(plan.delete_after_send);
    }

    #[tokio::test]
    async fn binary_halves_copies_and_conserves_total() {
        let ctx = context("dtn://me/");
        let agent = SprayAndWait::binary(8);
        let desc = stored_descriptor(&ctx, "dtn://me/app", "dtn://far/").await;
        agent.notify_new_bundle(&ctx, &desc).await;

        let peer: Eid = "dtn://relay/".parse().unwrap();
        ctx.peers.insert(peer.clone(), "cla".into());

        let plan = agent.sender_for_bundle(&ctx, &desc).await;
        assert_eq!(plan.peers, vec![peer.clone()]);
        // floor(8/2) handed over, ceil kept
        assert_eq!(agent.remaining(&desc.key()), 4);

        let mut outbound = desc.bundle.clone();
        agent
            .prepare_outbound(&ctx, &desc, &peer, &mut outbound)
            .await;
        match outbound
            .find_block(bpv7::block::Type::BinarySpray)
            .map(|b| &b.data)
        {
            Some(CanonicalData::BinarySpray { remaining }) => {
                // Conservation: handed + kept == initial multiplicity
                assert_eq!(remaining + agent.remaining(&desc.key()), 8);
            }
            other => panic!("missing copy-count block: {other:?}"),
        }
    }

    #[tokio::test]
    async fn binary_failure_reclaims_copies() {
        let ctx = context("dtn://me/");
        let agent = SprayAndWait::binary(8);
        let desc = stored_descriptor(&ctx, "dtn://me/app", "dtn://far/").await;
        agent.notify_new_bundle(&ctx, &desc).await;

        let peer: Eid = "dtn://relay/".parse().unwrap();
        ctx.peers.insert(peer.clone(), "cla".into());

        agent.sender_for_bundle(&ctx, &desc).await;
        assert_eq!(agent.remaining(&desc.key()), 4);

        agent.report_failure(&ctx, &desc, &peer).await;
        assert_eq!(agent.remaining(&desc.key()), 8);
        // And the peer is eligible again
        let plan = agent.sender_for_bundle(&ctx, &desc).await;
        assert_eq!(plan.peers, vec![peer]);
    }

    #[tokio::test]
    async fn incoming_copy_count_block_fixes_allocation() {
        let ctx = context("dtn://me/");
        let agent = SprayAndWait::binary(8);

        let mut desc = stored_descriptor(&ctx, "dtn://elsewhere/", "dtn://far/").await;
        desc.bundle
            .add_block(CanonicalData::BinarySpray { remaining: 3 });
        agent.notify_new_bundle(&ctx, &desc).await;
        assert_eq!(agent.remaining(&desc.key()), 3);
    }

    #[tokio::test]
    async fn gc_reaps_dead_metadata() {
        let ctx = context("dtn://me/");
        let agent = SprayAndWait::vanilla(4);
        let desc = stored_descriptor(&ctx, "dtn://me/app", "dtn://far/").await;
        agent.notify_new_bundle(&ctx, &desc).await;

        ctx.store.remove(&desc.key()).await.unwrap();
        agent.on_timer(&ctx).await;
        assert!(agent.meta.lock().unwrap().is_empty());
    }
}
