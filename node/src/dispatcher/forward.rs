//! The forwarding stage: hop-count accounting, parallel fan-out to the
//! peers the routing algorithm voted for, and failure reporting.

use super::*;
use bpv7::eid::Eid;
use bpv7::status_report::StatusKind;

impl Dispatcher {
    pub(super) async fn forward(self: &Arc<Self>, desc: &mut BundleDescriptor) -> Result<()> {
        desc.remove_constraint(Constraint::DispatchPending);
        desc.add_constraint(Constraint::ForwardPending);
        desc.sync(&self.ctx.store).await?;

        // Increment the hop count; it is rolled back if no copy leaves this
        // node, so a later successful retry does not double-count
        let prior_hop_count = desc.bundle.hop_count();
        if let Some(mut hop_count) = prior_hop_count {
            hop_count.count += 1;
            if hop_count.exceeded() {
                desc.tag(Tag::Faulty);
                return self.abort_faulty(desc, ReasonCode::HopLimitExceeded).await;
            }
            desc.bundle.set_hop_count(hop_count);
        }

        let plan = self.routing.sender_for_bundle(&self.ctx, desc).await;
        if plan.peers.is_empty() {
            if let Some(hop_count) = prior_hop_count {
                desc.bundle.set_hop_count(hop_count);
            }
            return self.park(desc).await;
        }
        debug!(
            "forwarding {} to {} peer(s)",
            desc.bundle.id(),
            plan.peers.len()
        );

        let sends = plan
            .peers
            .iter()
            .map(|peer| self.send_to_peer(desc, peer));
        let results = futures::future::join_all(sends).await;

        let mut successes = 0usize;
        for (peer, result) in plan.peers.iter().zip(results) {
            match result {
                Ok(()) => successes += 1,
                Err(e) => {
                    warn!("forward of {} to {peer} failed: {e}", desc.bundle.id());
                    self.routing.report_failure(&self.ctx, desc, peer).await;
                }
            }
        }

        if successes == 0 {
            if let Some(hop_count) = prior_hop_count {
                desc.bundle.set_hop_count(hop_count);
            }
            return self.park(desc).await;
        }

        self.send_status_report(
            desc,
            StatusKind::Forwarded,
            ReasonCode::NoAdditionalInformation,
        )
        .await;

        if plan.delete_after_send {
            desc.remove_constraint(Constraint::ForwardPending);
            desc.purge(&self.ctx.store).await?;
        } else {
            self.park(desc).await?;
        }
        Ok(())
    }

    /// Parks the bundle for a later retry pass.
    async fn park(&self, desc: &mut BundleDescriptor) -> Result<()> {
        desc.remove_constraint(Constraint::ForwardPending);
        desc.add_constraint(Constraint::Contraindicated);
        desc.sync(&self.ctx.store).await.map_err(Into::into)
    }

    async fn send_to_peer(&self, desc: &BundleDescriptor, peer: &Eid) -> Result<()> {
        let sender = self
            .manager
            .sender_for(peer)
            .ok_or_else(|| cla::Error::NotActive(peer.to_string()))?;

        let mut outbound = desc.bundle.clone();
        self.routing
            .prepare_outbound(&self.ctx, desc, peer, &mut outbound)
            .await;

        outbound.set_previous_node(self.ctx.node_id.clone());
        self.refresh_bundle_age(desc, &mut outbound).await;

        sender.send(&outbound.to_cbor()?).await.map_err(Into::into)
    }

    /// For unclocked sources the bundle age must account for the time the
    /// bundle sat in this node's custody.
    async fn refresh_bundle_age(&self, desc: &BundleDescriptor, outbound: &mut Bundle) {
        if outbound.primary.timestamp.is_clocked() {
            return;
        }
        let Some(age) = outbound.bundle_age() else {
            return;
        };
        if let Some(received_at) = self.received_at(desc).await {
            let dwell = DtnTime::now().millisecs().saturating_sub(received_at);
            outbound.set_bundle_age(age.saturating_add(dwell));
        }
    }
}
