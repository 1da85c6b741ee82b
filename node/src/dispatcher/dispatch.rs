//! The initial processing stage: routing notification, the check
//! functions, and the local-delivery/forward decision.

use super::*;

impl Dispatcher {
    /// Drives one bundle through the pipeline to its outcome.
    pub(super) async fn run(self: &Arc<Self>, desc: &mut BundleDescriptor) -> Result<()> {
        if desc.has_tag(Tag::Faulty) {
            return self
                .abort_faulty(desc, ReasonCode::BlockUnintelligible)
                .await;
        }

        self.routing.notify_new_bundle(&self.ctx, desc).await;

        if let Some(reason) = self.run_checks(desc).await {
            desc.tag(Tag::Faulty);
            return self.abort_faulty(desc, reason).await;
        }

        if self.is_local_destination(desc) {
            self.local_delivery(desc).await
        } else {
            desc.add_constraint(Constraint::ForwardPending);
            self.forward(desc).await
        }
    }

    fn is_local_destination(&self, desc: &BundleDescriptor) -> bool {
        let destination = &desc.bundle.primary.destination;
        destination.same_node(&self.ctx.node_id) || self.agents.has_endpoint(destination)
    }

    /// Runs the configured check functions; the first failure yields the
    /// deletion reason.
    async fn run_checks(&self, desc: &BundleDescriptor) -> Option<ReasonCode> {
        if !self.routing.dispatching_allowed(&self.ctx, desc).await {
            return Some(ReasonCode::NoKnownRouteToDestination);
        }
        if Self::lifetime_exceeded(&desc.bundle) {
            return Some(ReasonCode::LifetimeExpired);
        }
        if desc.bundle.hop_count().is_some_and(|hc| hc.exceeded()) {
            return Some(ReasonCode::HopLimitExceeded);
        }
        None
    }

    fn lifetime_exceeded(bundle: &Bundle) -> bool {
        if bundle.primary.timestamp.is_clocked() {
            bundle.primary.expires_at() <= DtnTime::now()
        } else {
            bundle.bundle_age().unwrap_or(0) >= bundle.primary.lifetime
        }
    }
}
