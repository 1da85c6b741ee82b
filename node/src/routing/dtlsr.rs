//! DTLSR: delay-tolerant link-state routing.
//!
//! Each node tracks when it last saw each direct peer and periodically
//! floods a link-state advertisement block carrying that map. Received
//! advertisements supersede older ones from the same node. Routes are
//! shortest paths by hop count over the aggregated graph; hop count is the
//! metric because observed latency is meaningless between scheduled
//! contacts.

use super::*;
use bpv7::builder::Builder;
use bpv7::canonical::{CanonicalData, LinkStateAdvert};
use bpv7::dtn_time::DtnTime;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

pub const BROADCAST_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);
/// Advertised links older than this are ignored when computing routes.
pub const LINK_STALE_AFTER_MS: u64 = 10 * 60 * 1000;
const ADVERT_LIFETIME_MS: u64 = 60 * 1000;

#[derive(Default)]
struct State {
    /// Direct neighbours and when we last saw them.
    direct: HashMap<Eid, DtnTime>,
    /// Latest advertisement per remote node.
    network: HashMap<Eid, LinkStateAdvert>,
    /// dest node id -> next-hop node id.
    routes: HashMap<Eid, Eid>,
}

pub struct Dtlsr {
    state: Mutex<State>,
}

impl Dtlsr {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    /// Breadth-first shortest paths from us over the aggregate graph,
    /// recording the first hop of each path.
    fn recompute(state: &mut State, local: &Eid) {
        let now = DtnTime::now().millisecs();
        let mut edges: HashMap<Eid, Vec<Eid>> = HashMap::new();
        edges.insert(local.clone(), state.direct.keys().cloned().collect());
        for (node, advert) in &state.network {
            let fresh: Vec<Eid> = advert
                .reachable
                .iter()
                .filter(|(_, seen)| now.saturating_sub(seen.millisecs()) < LINK_STALE_AFTER_MS)
                .map(|(peer, _)| peer.node_id())
                .collect();
            edges.insert(node.clone(), fresh);
        }

        let mut routes = HashMap::new();
        let mut visited: HashSet<Eid> = HashSet::from([local.clone()]);
        let mut queue: VecDeque<(Eid, Eid)> = state
            .direct
            .keys()
            .map(|peer| (peer.clone(), peer.clone()))
            .collect();

        while let Some((node, first_hop)) = queue.pop_front() {
            if !visited.insert(node.clone()) {
                continue;
            }
            routes.insert(node.clone(), first_hop.clone());
            if let Some(next) = edges.get(&node) {
                for peer in next {
                    if !visited.contains(peer) {
                        queue.push_back((peer.clone(), first_hop.clone()));
                    }
                }
            }
        }
        state.routes = routes;
    }

    fn advert(&self, local: &Eid) -> LinkStateAdvert {
        let state = self.state.lock().unwrap();
        LinkStateAdvert {
            node: local.clone(),
            timestamp: DtnTime::now(),
            reachable: state
                .direct
                .iter()
                .map(|(peer, seen)| (peer.clone(), *seen))
                .collect(),
        }
    }

    #[cfg(test)]
    fn next_hop(&self, destination: &Eid) -> Option<Eid> {
        self.state
            .lock()
            .unwrap()
            .routes
            .get(&destination.node_id())
            .cloned()
    }
}

impl Default for Dtlsr {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoutingAgent for Dtlsr {
    fn name(&self) -> &'static str {
        "dtlsr"
    }

    async fn notify_new_bundle(&self, ctx: &RoutingContext, desc: &BundleDescriptor) {
        let Some(CanonicalData::Dtlsr(advert)) = desc
            .bundle
            .find_block(bpv7::block::Type::Dtlsr)
            .map(|b| &b.data)
        else {
            return;
        };

        let mut state = self.state.lock().unwrap();
        let node = advert.node.node_id();
        // Newer timestamps supersede older ones
        match state.network.get(&node) {
            Some(known) if known.timestamp >= advert.timestamp => return,
            _ => {}
        }
        debug!("dtlsr advertisement from {node}");
        state.network.insert(node, advert.clone());
        Self::recompute(&mut state, &ctx.node_id);
    }

    async fn dispatching_allowed(&self, _ctx: &RoutingContext, _desc: &BundleDescriptor) -> bool {
        true
    }

    async fn sender_for_bundle(
        &self,
        ctx: &RoutingContext,
        desc: &BundleDescriptor,
    ) -> ForwardingPlan {
        let destination = desc.bundle.primary.destination.node_id();
        if ctx.peers.contains(&destination) {
            return ForwardingPlan::direct(destination);
        }

        let next_hop = self
            .state
            .lock()
            .unwrap()
            .routes
            .get(&destination)
            .cloned();
        match next_hop {
            Some(next_hop) if ctx.peers.contains(&next_hop) => {
                ForwardingPlan::to_peers(vec![next_hop])
            }
            _ => ForwardingPlan::none(),
        }
    }

    async fn report_failure(&self, ctx: &RoutingContext, _desc: &BundleDescriptor, peer: &Eid) {
        // A failed transmission is evidence the link is down
        let mut state = self.state.lock().unwrap();
        state.direct.remove(&peer.node_id());
        Self::recompute(&mut state, &ctx.node_id);
    }

    async fn report_peer_appeared(&self, ctx: &RoutingContext, peer: &Eid) {
        let mut state = self.state.lock().unwrap();
        state.direct.insert(peer.node_id(), DtnTime::now());
        Self::recompute(&mut state, &ctx.node_id);
    }

    async fn report_peer_disappeared(&self, ctx: &RoutingContext, peer: &Eid) {
        let mut state = self.state.lock().unwrap();
        state.direct.remove(&peer.node_id());
        Self::recompute(&mut state, &ctx.node_id);
    }

    fn timer_interval(&self) -> Option<std::time::Duration> {
        Some(BROADCAST_INTERVAL)
    }

    /// Floods the local link-state advertisement to every direct peer.
    async fn on_timer(&self, ctx: &RoutingContext) -> Vec<Bundle> {
        let advert = self.advert(&ctx.node_id);
        ctx.peers
            .current()
            .into_iter()
            .filter_map(|peer| {
                Builder::new()
                    .source(ctx.node_id.clone())
                    .destination(peer)
                    .lifetime_millis(ADVERT_LIFETIME_MS)
                    .add_block(CanonicalData::Dtlsr(advert.clone()))
                    .build()
                    .ok()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routing::test_support::*;

    fn eid(s: &str) -> Eid {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn direct_peers_route_directly() {
        let ctx = context("dtn://me/");
        let agent = Dtlsr::new();
        ctx.peers.insert(eid("dtn://a/"), "cla".into());
        agent.report_peer_appeared(&ctx, &eid("dtn://a/")).await;

        let desc = stored_descriptor(&ctx, "dtn://src/", "dtn://a/app").await;
        let plan = agent.sender_for_bundle(&ctx, &desc).await;
        assert_eq!(plan.peers, vec![eid("dtn://a/")]);
        assert!(plan.delete_after_send);
    }

    #[tokio::test]
    async fn multi_hop_route_via_advertisement() {
        let ctx = context("dtn://me/");
        let agent = Dtlsr::new();

        // We can reach a; a advertises reaching b
        ctx.peers.insert(eid("dtn://a/"), "cla".into());
        agent.report_peer_appeared(&ctx, &eid("dtn://a/")).await;

        let mut desc = stored_descriptor(&ctx, "dtn://a/", "dtn://me/").await;
        desc.bundle.add_block(CanonicalData::Dtlsr(LinkStateAdvert {
            node: eid("dtn://a/"),
            timestamp: DtnTime::now(),
            reachable: vec![(eid("dtn://b/"), DtnTime::now())],
        }));
        agent.notify_new_bundle(&ctx, &desc).await;

        assert_eq!(agent.next_hop(&eid("dtn://b/x")), Some(eid("dtn://a/")));

        // A bundle for b goes through a
        let to_b = stored_descriptor(&ctx, "dtn://src/", "dtn://b/app").await;
        let plan = agent.sender_for_bundle(&ctx, &to_b).await;
        assert_eq!(plan.peers, vec![eid("dtn://a/")]);
    }

    #[tokio::test]
    async fn older_advertisements_are_ignored() {
        let ctx = context("dtn://me/");
        let agent = Dtlsr::new();
        ctx.peers.insert(eid("dtn://a/"), "cla".into());
        agent.report_peer_appeared(&ctx, &eid("dtn://a/")).await;

        let newer = LinkStateAdvert {
            node: eid("dtn://a/"),
            timestamp: DtnTime::new(2_000_000),
            reachable: vec![(eid("dtn://b/"), DtnTime::now())],
        };
        let older = LinkStateAdvert {
            node: eid("dtn://a/"),
            timestamp: DtnTime::new(1_000_000),
            reachable: vec![],
        };

        let mut desc = stored_descriptor(&ctx, "dtn://a/", "dtn://me/").await;
        desc.bundle.add_block(CanonicalData::Dtlsr(newer));
        agent.notify_new_bundle(&ctx, &desc).await;

        let mut stale = stored_descriptor(&ctx, "dtn://a2/", "dtn://me/").await;
        stale.bundle.add_block(CanonicalData::Dtlsr(older));
        agent.notify_new_bundle(&ctx, &stale).await;

        // The newer advertisement's link survives
        assert_eq!(agent.next_hop(&eid("dtn://b/")), Some(eid("dtn://a/")));
    }

    #[tokio::test]
    async fn peer_loss_invalidates_routes() {
        let ctx = context("dtn://me/");
        let agent = Dtlsr::new();
        ctx.peers.insert(eid("dtn://a/"), "cla".into());
        agent.report_peer_appeared(&ctx, &eid("dtn://a/")).await;
        assert_eq!(agent.next_hop(&eid("dtn://a/")), Some(eid("dtn://a/")));

        ctx.peers.remove(&eid("dtn://a/"));
        agent.report_peer_disappeared(&ctx, &eid("dtn://a/")).await;
        assert_eq!(agent.next_hop(&eid("dtn://a/")), None);
    }

    #[tokio::test]
    async fn broadcast_carries_link_state() {
        let ctx = context("dtn://me/");
        let agent = Dtlsr::new();
        ctx.peers.insert(eid("dtn://a/"), "cla".into());
        agent.report_peer_appeared(&ctx, &eid("dtn://a/")).await;

        let bundles = agent.on_timer(&ctx).await;
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].primary.destination, eid("dtn://a/"));
        match bundles[0]
            .find_block(bpv7::block::Type::Dtlsr)
            .map(|b| &b.data)
        {
            Some(CanonicalData::Dtlsr(advert)) => {
                assert_eq!(advert.node, eid("dtn://me/"));
                assert_eq!(advert.reachable.len(), 1);
            }
            other => panic!("missing advertisement block: {other:?}"),
        }
    }
}
