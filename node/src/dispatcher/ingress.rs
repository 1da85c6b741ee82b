//! Bundle reception: parsing, duplicate suppression, unknown-block
//! handling, and injection of locally sourced bundles.

use super::*;
use bpv7::status_report::{AdministrativeRecord, StatusKind};
use store::PushOutcome;

impl Dispatcher {
    /// Entry point for bundles arriving over a convergence layer.
    pub async fn receive_bundle(self: &Arc<Self>, data: Vec<u8>) -> Result<()> {
        let bundle = match bpv7::bundle::parse(&data, &self.registry) {
            Ok(bundle) => bundle,
            Err(e) => {
                warn!("discarding malformed bundle: {e}");
                return Err(e.into());
            }
        };
        debug!("received bundle {}", bundle.id());

        if self.inspect_all_bundles
            && bundle.is_admin_record()
            && !bundle.primary.destination.same_node(&self.ctx.node_id)
            && let Ok(record) = AdministrativeRecord::from_bundle(&bundle)
        {
            debug!("administrative record in transit: {record:?}");
        }

        match self.ctx.store.push(&bundle, &data).await? {
            PushOutcome::Duplicate => {
                trace!("duplicate bundle {} dropped", bundle.id());
                return Ok(());
            }
            PushOutcome::New | PushOutcome::NewPart => {}
        }
        self.stamp_received(&bundle).await?;

        let mut desc = BundleDescriptor::new_incoming(bundle);
        self.check_blocks(&mut desc).await;
        self.run(&mut desc).await
    }

    /// Entry point for bundles originating at this node (application
    /// agents, status reports, routing broadcasts).
    pub async fn dispatch_outgoing(self: &Arc<Self>, mut bundle: Bundle) -> Result<()> {
        if let Some(key) = &self.signing_key
            && bundle.primary.source.same_node(&self.ctx.node_id)
            && !bundle.is_fragment()
            && bundle.find_block(bpv7::block::Type::Signature).is_none()
        {
            bpv7::signature::sign(&mut bundle, key)?;
        }

        let raw = bundle.to_cbor()?;
        if let PushOutcome::Duplicate = self.ctx.store.push(&bundle, &raw).await? {
            warn!("outgoing bundle {} duplicates a stored bundle", bundle.id());
            return Ok(());
        }
        self.stamp_received(&bundle).await?;

        let mut desc = BundleDescriptor::new_outgoing(bundle);
        self.run(&mut desc).await
    }

    /// Walks canonical blocks in reverse, resolving every block whose type
    /// code the registry does not know according to its control flags.
    pub(super) async fn check_blocks(self: &Arc<Self>, desc: &mut BundleDescriptor) {
        let mut drop_numbers = Vec::new();
        let mut report_unsupported = false;
        let mut mark_faulty = false;

        for block in desc.bundle.blocks.iter().rev() {
            let bpv7::canonical::CanonicalData::Unrecognised(code, _) = &block.data else {
                continue;
            };
            trace!(
                "bundle {} carries unknown block type {code}",
                desc.bundle.id()
            );
            if block.flags.delete_bundle_on_failure {
                mark_faulty = true;
            } else if block.flags.delete_block_on_failure {
                drop_numbers.push(block.number);
            }
            if block.flags.report_on_failure {
                report_unsupported = true;
            }
        }

        if mark_faulty {
            desc.tag(Tag::Faulty);
        }

        for number in drop_numbers {
            debug!("removing unsupported block {number}");
            desc.bundle.remove_block(number);
        }

        if report_unsupported {
            self.send_status_report(desc, StatusKind::Received, ReasonCode::BlockUnsupported)
                .await;
        }
    }
}
