//! Local delivery: reassembly of fragments, administrative-record
//! handling, and hand-off to application agents.

use super::*;
use bpv7::status_report::{AdministrativeRecord, StatusKind};

impl Dispatcher {
    pub(super) async fn local_delivery(
        self: &Arc<Self>,
        desc: &mut BundleDescriptor,
    ) -> Result<()> {
        desc.remove_constraint(Constraint::DispatchPending);

        if desc.bundle.is_fragment() {
            desc.tag(Tag::ReassemblyPending);
            desc.add_constraint(Constraint::ReassemblyPending);
            desc.sync(&self.ctx.store).await?;
            return self.try_reassemble(desc).await;
        }

        if desc.bundle.is_admin_record() {
            return self.handle_admin_record(desc).await;
        }

        let destination = desc.bundle.primary.destination.clone();
        let Some(agent) = self.agents.agent_for(&destination) else {
            debug!("no registered agent for {destination}, parking bundle");
            desc.tag(Tag::NoLocalAgent);
            desc.add_constraint(Constraint::LocalEndpoint);
            return desc.sync(&self.ctx.store).await.map_err(Into::into);
        };

        match agent.deliver(&desc.bundle).await {
            Ok(()) => {
                info!("delivered bundle {} to {destination}", desc.bundle.id());
                desc.tag(Tag::Delivered);
                self.send_status_report(
                    desc,
                    StatusKind::Delivered,
                    ReasonCode::NoAdditionalInformation,
                )
                .await;
                desc.remove_constraint(Constraint::LocalEndpoint);
                desc.purge(&self.ctx.store).await.map_err(Into::into)
            }
            Err(e) => {
                warn!("agent for {destination} refused delivery: {e}");
                desc.add_constraint(Constraint::LocalEndpoint);
                desc.sync(&self.ctx.store).await.map_err(Into::into)
            }
        }
    }

    /// Attempts reassembly from the stored parts; incomplete coverage just
    /// leaves the reassembly-pending constraint standing.
    async fn try_reassemble(self: &Arc<Self>, desc: &mut BundleDescriptor) -> Result<()> {
        let key = desc.key();
        let Some(item) = self.ctx.store.get(&key).await? else {
            return Ok(());
        };

        let mut fragments = Vec::with_capacity(item.parts.len());
        for part in &item.parts {
            let raw = self.ctx.store.load_part(part).await?;
            fragments.push(bpv7::bundle::parse(&raw, &self.registry)?);
        }

        match bpv7::fragment::reassemble(fragments) {
            Ok(bundle) => {
                info!("reassembled bundle {}", bundle.id());
                desc.remove_constraint(Constraint::ReassemblyPending);
                desc.purge(&self.ctx.store).await?;

                let raw = bundle.to_cbor()?;
                self.ctx.store.push(&bundle, &raw).await?;
                self.stamp_received(&bundle).await?;
                let mut whole = BundleDescriptor::new_incoming(bundle);
                let this = self.clone();
                Box::pin(async move { this.run(&mut whole).await }).await
            }
            Err(bpv7::Error::FragmentGap(_)) => {
                // Not complete yet; wait for more fragments
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Administrative records addressed to this node.
    async fn handle_admin_record(&self, desc: &mut BundleDescriptor) -> Result<()> {
        match AdministrativeRecord::from_bundle(&desc.bundle) {
            Ok(AdministrativeRecord::StatusReport(report)) => {
                info!(
                    "status report for {} from {}: reason {:?}",
                    report.bundle_id,
                    desc.bundle.primary.source,
                    report.reason
                );
                // Surface the report to the agent that sourced the bundle
                if let Some(agent) = self.agents.agent_for(&report.bundle_id.source) {
                    agent
                        .notify(agents::AgentEvent::StatusReport(report))
                        .await;
                }
            }
            Ok(AdministrativeRecord::Unrecognised(record_type, _)) => {
                debug!("ignoring administrative record of unknown type {record_type}");
            }
            Err(e) => {
                warn!("malformed administrative record: {e}");
                desc.tag(Tag::Faulty);
            }
        }
        desc.tag(Tag::Delivered);
        desc.purge(&self.ctx.store).await.map_err(Into::into)
    }
}
