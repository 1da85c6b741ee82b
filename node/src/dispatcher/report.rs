//! Status-report generation.
//!
//! A report is only produced when the referenced bundle requested it, and
//! never for outgoing bundles or for administrative records — reports about
//! reports would loop.

use super::*;
use bpv7::builder::Builder;
use bpv7::bundle_flags::BundleFlags;
use bpv7::status_report::{AdministrativeRecord, StatusKind, StatusReport};

impl Dispatcher {
    pub(crate) async fn send_status_report(
        self: &Arc<Self>,
        desc: &BundleDescriptor,
        kind: StatusKind,
        reason: ReasonCode,
    ) {
        if desc.has_tag(Tag::Outgoing) || desc.bundle.is_admin_record() {
            return;
        }

        let flags = &desc.bundle.primary.flags;
        let requested = match kind {
            StatusKind::Received => flags.receipt_report_requested,
            StatusKind::Forwarded => flags.forward_report_requested,
            StatusKind::Delivered => flags.delivery_report_requested,
            StatusKind::Deleted => flags.delete_report_requested,
        };
        if !requested {
            return;
        }

        let report_to = desc.bundle.primary.report_to.clone();
        if report_to.is_null() || report_to.same_node(&self.ctx.node_id) {
            return;
        }

        let report = StatusReport::new(&desc.bundle, kind, reason, DtnTime::now());
        let bundle = Builder::new()
            .source(self.ctx.node_id.clone())
            .destination(report_to)
            .flags(BundleFlags {
                is_admin_record: true,
                ..Default::default()
            })
            .timestamp(self.id_keeper.stamp(&self.ctx.node_id))
            .lifetime_millis(desc.bundle.primary.lifetime)
            .payload(AdministrativeRecord::StatusReport(report).to_payload())
            .build();

        match bundle {
            Ok(bundle) => {
                debug!("emitting {kind:?} report for {}", desc.bundle.id());
                let this = self.clone();
                if let Err(e) =
                    Box::pin(async move { this.dispatch_outgoing(bundle).await }).await
                {
                    warn!("failed to dispatch status report: {e}");
                }
            }
            Err(e) => warn!("failed to build status report: {e}"),
        }
    }
}
