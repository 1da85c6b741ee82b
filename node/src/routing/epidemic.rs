//! Epidemic routing: flood every bundle to every peer not already served.
//!
//! The set of peers a bundle has been offered to lives in the bundle item's
//! property bag under `routing/epidemic/sent`, so it survives restarts and
//! is visible to the store's lifecycle management.

use super::*;

const SENT_KEY: &str = "routing/epidemic/sent";

#[derive(Default)]
pub struct Epidemic;

impl Epidemic {
    pub fn new() -> Self {
        Self
    }

    async fn sent_list(ctx: &RoutingContext, desc: &BundleDescriptor) -> Vec<String> {
        match ctx.store.get(&desc.key()).await {
            Ok(Some(item)) => item.text_list(SENT_KEY),
            _ => Vec::new(),
        }
    }

    async fn store_sent(ctx: &RoutingContext, desc: &BundleDescriptor, sent: Vec<String>) {
        if let Ok(Some(mut item)) = ctx.store.get(&desc.key()).await {
            item.set_text_list(SENT_KEY, sent);
            if let Err(e) = ctx.store.update(&item).await {
                warn!("failed to update epidemic metadata: {e}");
            }
        }
    }

    /// Peers not yet offered this bundle.
    async fn eligible(ctx: &RoutingContext, desc: &BundleDescriptor) -> Vec<Eid> {
        let sent = Self::sent_list(ctx, desc).await;
        ctx.peers
            .current()
            .into_iter()
            .filter(|peer| !sent.contains(&peer.to_string()))
            .collect()
    }
}

#[async_trait]
impl RoutingAgent for Epidemic {
    fn name(&self) -> &'static str {
        "epidemic"
    }

    async fn notify_new_bundle(&self, _ctx: &RoutingContext, _desc: &BundleDescriptor) {}

    async fn dispatching_allowed(&self, ctx: &RoutingContext, desc: &BundleDescriptor) -> bool {
        if desc.bundle.primary.destination.same_node(&ctx.node_id) {
            return true;
        }
        !Self::eligible(ctx, desc).await.is_empty()
    }

    async fn sender_for_bundle(
        &self,
        ctx: &RoutingContext,
        desc: &BundleDescriptor,
    ) -> ForwardingPlan {
        let eligible = Self::eligible(ctx, desc).await;
        if eligible.is_empty() {
            return ForwardingPlan::none();
        }

        // Record the offers up front; a failure report reclaims its peer
        let mut sent = Self::sent_list(ctx, desc).await;
        sent.extend(eligible.iter().map(|p| p.to_string()));
        Self::store_sent(ctx, desc, sent).await;

        ForwardingPlan::to_peers(eligible)
    }

    async fn report_failure(&self, ctx: &RoutingContext, desc: &BundleDescriptor, peer: &Eid) {
        let peer = peer.to_string();
        let mut sent = Self::sent_list(ctx, desc).await;
        sent.retain(|p| *p != peer);
        Self::store_sent(ctx, desc, sent).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routing::test_support::*;

    #[tokio::test]
    async fn floods_each_peer_once() {
        let ctx = context("dtn://me/");
        let agent = Epidemic::new();
        let desc = stored_descriptor(&ctx, "dtn://src/", "dtn://far/").await;

        ctx.peers.insert("dtn://a/".parse().unwrap(), "cla-a".into());
        ctx.peers.insert("dtn://b/".parse().unwrap(), "cla-b".into());

        let plan = agent.sender_for_bundle(&ctx, &desc).await;
        assert_eq!(plan.peers.len(), 2);
        assert!(!plan.delete_after_send);

        // Nothing left on the second pass
        let plan = agent.sender_for_bundle(&ctx, &desc).await;
        assert!(plan.peers.is_empty());

        // A new peer becomes eligible without disturbing the served set
        ctx.peers.insert("dtn://c/".parse().unwrap(), "cla-c".into());
        let plan = agent.sender_for_bundle(&ctx, &desc).await;
        assert_eq!(plan.peers, vec!["dtn://c/".parse::<Eid>().unwrap()]);
    }

    #[tokio::test]
    async fn failure_reclaims_peer() {
        let ctx = context("dtn://me/");
        let agent = Epidemic::new();
        let desc = stored_descriptor(&ctx, "dtn://src/", "dtn://far/").await;

        let peer: Eid = "dtn://a/".parse().unwrap();
        ctx.peers.insert(peer.clone(), "cla-a".into());

        assert_eq!(agent.sender_for_bundle(&ctx, &desc).await.peers.len(), 1);
        agent.report_failure(&ctx, &desc, &peer).await;
        // Eligible again after the failure
        assert_eq!(agent.sender_for_bundle(&ctx, &desc).await.peers.len(), 1);
    }

    #[tokio::test]
    async fn dispatching_rules() {
        let ctx = context("dtn://me/");
        let agent = Epidemic::new();

        // Local destination is always dispatchable
        let local = stored_descriptor(&ctx, "dtn://src/", "dtn://me/app").await;
        assert!(agent.dispatching_allowed(&ctx, &local).await);

        // Remote destination needs at least one eligible peer
        let remote = stored_descriptor(&ctx, "dtn://src2/", "dtn://far/").await;
        assert!(!agent.dispatching_allowed(&ctx, &remote).await);
        ctx.peers.insert("dtn://a/".parse().unwrap(), "cla-a".into());
        assert!(agent.dispatching_allowed(&ctx, &remote).await);
    }
}
