//! The sensor-mule overlay.
//!
//! Wraps another algorithm and censors its forwarding votes: a peer whose
//! endpoint matches the sensor-node pattern only ever receives bundles
//! addressed to it. Traffic between ordinary peers (mules, servers) passes
//! through the inner algorithm untouched.

use super::*;

pub struct SensorMule {
    sensor_pattern: regex::Regex,
    inner: Arc<dyn RoutingAgent>,
}

impl SensorMule {
    pub fn new(sensor_pattern: regex::Regex, inner: Arc<dyn RoutingAgent>) -> Self {
        Self {
            sensor_pattern,
            inner,
        }
    }

    fn is_sensor(&self, peer: &Eid) -> bool {
        self.sensor_pattern.is_match(&peer.to_string())
    }
}

#[async_trait]
impl RoutingAgent for SensorMule {
    fn name(&self) -> &'static str {
        "sensor-mule"
    }

    async fn notify_new_bundle(&self, ctx: &RoutingContext, desc: &BundleDescriptor) {
        self.inner.notify_new_bundle(ctx, desc).await
    }

    async fn dispatching_allowed(&self, ctx: &RoutingContext, desc: &BundleDescriptor) -> bool {
        self.inner.dispatching_allowed(ctx, desc).await
    }

    async fn sender_for_bundle(
        &self,
        ctx: &RoutingContext,
        desc: &BundleDescriptor,
    ) -> ForwardingPlan {
        let mut plan = self.inner.sender_for_bundle(ctx, desc).await;
        let destination = &desc.bundle.primary.destination;

        let mut suppressed = Vec::new();
        plan.peers.retain(|peer| {
            if !self.is_sensor(peer) || destination.same_node(peer) {
                return true;
            }
            suppressed.push(peer.clone());
            false
        });
        // The inner algorithm spent resources on the suppressed peers;
        // reclaim them as if the sends had failed
        for peer in suppressed {
            self.inner.report_failure(ctx, desc, &peer).await;
        }
        plan
    }

    async fn prepare_outbound(
        &self,
        ctx: &RoutingContext,
        desc: &BundleDescriptor,
        peer: &Eid,
        bundle: &mut Bundle,
    ) {
        self.inner.prepare_outbound(ctx, desc, peer, bundle).await
    }

    async fn report_failure(&self, ctx: &RoutingContext, desc: &BundleDescriptor, peer: &Eid) {
        self.inner.report_failure(ctx, desc, peer).await
    }

    async fn report_peer_appeared(&self, ctx: &RoutingContext, peer: &Eid) {
        self.inner.report_peer_appeared(ctx, peer).await
    }

    async fn report_peer_disappeared(&self, ctx: &RoutingContext, peer: &Eid) {
        self.inner.report_peer_disappeared(ctx, peer).await
    }

    fn timer_interval(&self) -> Option<std::time::Duration> {
        self.inner.timer_interval()
    }

    async fn on_timer(&self, ctx: &RoutingContext) -> Vec<Bundle> {
        self.inner.on_timer(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routing::epidemic::Epidemic;
    use routing::test_support::*;

    fn agent() -> SensorMule {
        SensorMule::new(
            regex::Regex::new("^dtn://sensor-").unwrap(),
            Arc::new(Epidemic::new()),
        )
    }

    #[tokio::test]
    async fn sensors_only_get_their_own_traffic() {
        let ctx = context("dtn://mule/");
        let agent = agent();

        ctx.peers
            .insert("dtn://sensor-7/".parse().unwrap(), "cla".into());
        ctx.peers
            .insert("dtn://server/".parse().unwrap(), "cla".into());

        // A bundle for the server must not leak to the sensor
        let desc = stored_descriptor(&ctx, "dtn://sensor-9/", "dtn://server/in").await;
        let plan = agent.sender_for_bundle(&ctx, &desc).await;
        assert_eq!(plan.peers, vec!["dtn://server/".parse::<Eid>().unwrap()]);

        // A bundle addressed to the sensor reaches it
        let desc = stored_descriptor(&ctx, "dtn://server/", "dtn://sensor-7/cmd").await;
        let plan = agent.sender_for_bundle(&ctx, &desc).await;
        assert!(
            plan.peers
                .contains(&"dtn://sensor-7/".parse::<Eid>().unwrap())
        );
    }

    #[tokio::test]
    async fn non_sensor_traffic_unaffected() {
        let ctx = context("dtn://mule/");
        let agent = agent();
        ctx.peers
            .insert("dtn://relay/".parse().unwrap(), "cla".into());

        let desc = stored_descriptor(&ctx, "dtn://src/", "dtn://far/").await;
        let plan = agent.sender_for_bundle(&ctx, &desc).await;
        assert_eq!(plan.peers, vec!["dtn://relay/".parse::<Eid>().unwrap()]);
    }
}
