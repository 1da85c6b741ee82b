//! PRoPHET: probabilistic routing using the history of encounters and
//! transitivity (RFC 6693).
//!
//! Delivery predictabilities increase on encounter, decay with time, and
//! propagate transitively through exchanged predictability blocks. A
//! bundle is handed to a peer only when that peer's predictability for the
//! destination beats ours.

use super::*;
use bpv7::builder::Builder;
use bpv7::canonical::{CanonicalData, DeliveryPredictability};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

pub const AGING_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);
const ADVERT_LIFETIME_MS: u64 = 60 * 1000;

/// RFC 6693 defaults; overridable from configuration.
pub const DEFAULT_P_ENCOUNTER: f64 = 0.75;
pub const DEFAULT_BETA: f64 = 0.25;
pub const DEFAULT_GAMMA: f64 = 0.98;

struct State {
    /// Our delivery predictability per remote node.
    own: HashMap<Eid, f64>,
    /// The predictability tables peers last advertised to us.
    peer_tables: HashMap<Eid, HashMap<Eid, f64>>,
    last_aged: Instant,
}

pub struct Prophet {
    p_encounter: f64,
    beta: f64,
    gamma: f64,
    state: Mutex<State>,
}

impl Prophet {
    pub fn new(p_encounter: f64, beta: f64, gamma: f64) -> Self {
        Self {
            p_encounter: p_encounter.clamp(0.0, 1.0),
            beta: beta.clamp(0.0, 1.0),
            gamma: gamma.clamp(0.0, 1.0),
            state: Mutex::new(State {
                own: HashMap::new(),
                peer_tables: HashMap::new(),
                last_aged: Instant::now(),
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_P_ENCOUNTER, DEFAULT_BETA, DEFAULT_GAMMA)
    }

    fn predictability(&self, node: &Eid) -> f64 {
        self.state
            .lock()
            .unwrap()
            .own
            .get(&node.node_id())
            .copied()
            .unwrap_or(0.0)
    }

    /// Exponential decay in units of the aging interval.
    fn age(&self, state: &mut State) {
        let elapsed = state.last_aged.elapsed();
        let units = elapsed.as_secs_f64() / AGING_INTERVAL.as_secs_f64();
        if units < 1.0 {
            return;
        }
        let factor = self.gamma.powf(units);
        for p in state.own.values_mut() {
            *p *= factor;
        }
        state.own.retain(|_, p| *p > f64::EPSILON);
        state.last_aged = Instant::now();
    }
}

#[async_trait]
impl RoutingAgent for Prophet {
    fn name(&self) -> &'static str {
        "prophet"
    }

    async fn notify_new_bundle(&self, _ctx: &RoutingContext, desc: &BundleDescriptor) {
        let Some(CanonicalData::Prophet(advert)) = desc
            .bundle
            .find_block(bpv7::block::Type::Prophet)
            .map(|b| &b.data)
        else {
            return;
        };

        let sender = advert.node.node_id();
        let mut state = self.state.lock().unwrap();
        let p_sender = state.own.get(&sender).copied().unwrap_or(0.0);

        // Transitivity: P(c) = max(P(c), P(b) * Pb(c) * beta)
        for (node, p_b_c) in &advert.entries {
            let node = node.node_id();
            let transitive = p_sender * p_b_c * self.beta;
            let entry = state.own.entry(node).or_insert(0.0);
            if transitive > *entry {
                *entry = transitive;
            }
        }

        state.peer_tables.insert(
            sender,
            advert
                .entries
                .iter()
                .map(|(node, p)| (node.node_id(), *p))
                .collect(),
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
        let destination = desc.bundle.primary.destination.node_id();
        let peers = ctx.peers.current();

        if let Some(peer) = peers.iter().find(|p| destination.same_node(p)) {
            return ForwardingPlan::direct(peer.clone());
        }

        let state = self.state.lock().unwrap();
        let own = state.own.get(&destination).copied().unwrap_or(0.0);
        let better: Vec<Eid> = peers
            .into_iter()
            .filter(|peer| {
                state
                    .peer_tables
                    .get(&peer.node_id())
                    .and_then(|table| table.get(&destination))
                    .is_some_and(|p| *p > own)
            })
            .collect();
        ForwardingPlan::to_peers(better)
    }

    async fn report_failure(&self, _ctx: &RoutingContext, _desc: &BundleDescriptor, _peer: &Eid) {}

    async fn report_peer_appeared(&self, _ctx: &RoutingContext, peer: &Eid) {
        let mut state = self.state.lock().unwrap();
        let entry = state.own.entry(peer.node_id()).or_insert(0.0);
        // P = P + (1 - P) * P_encounter
        *entry += (1.0 - *entry) * self.p_encounter;
    }

    fn timer_interval(&self) -> Option<std::time::Duration> {
        Some(AGING_INTERVAL)
    }

    /// Ages the predictability table and advertises it to current peers.
    async fn on_timer(&self, ctx: &RoutingContext) -> Vec<Bundle> {
        let entries: Vec<(Eid, f64)> = {
            let mut state = self.state.lock().unwrap();
            self.age(&mut state);
            state.own.iter().map(|(n, p)| (n.clone(), *p)).collect()
        };
        if entries.is_empty() {
            return Vec::new();
        }

        let advert = DeliveryPredictability {
            node: ctx.node_id.clone(),
            entries,
        };
        ctx.peers
            .current()
            .into_iter()
            .filter_map(|peer| {
                Builder::new()
                    .source(ctx.node_id.clone())
                    .destination(peer)
                    .lifetime_millis(ADVERT_LIFETIME_MS)
                    .add_block(CanonicalData::Prophet(advert.clone()))
                    .build()
                    .ok()
            })
            .collect()
    }
}
