//! The bundle processing pipeline.
//!
//! ```text
//! receive-incoming -> check-blocks \
//!                                   -> process-initial -> { local | forward | drop }
//! send-outgoing   ------------------/
//! ```
//!
//! Each stage lives in its own submodule, mirroring the flow: `ingress`
//! (reception, duplicate suppression, unknown-block handling), `dispatch`
//! (the check functions and the local/forward decision), `forward`,
//! `local` (delivery and reassembly) and `report` (status reports).

use super::*;
use agents::AgentEvent;
use bpv7::bundle::Bundle;
use bpv7::dtn_time::DtnTime;
use bpv7::status_report::ReasonCode;
use descriptor::{BundleDescriptor, Constraint, Tag};
use id_keeper::IdKeeper;
use routing::{RoutingAgent, RoutingContext};
use std::sync::Arc;

mod dispatch;
mod forward;
mod ingress;
mod local;
mod report;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] store::Error),

    #[error(transparent)]
    Bundle(#[from] bpv7::Error),

    #[error(transparent)]
    Cla(#[from] cla::Error),

    #[error(transparent)]
    Agent(#[from] agents::Error),
}

/// Item property recording when this node took custody, for bundle-age
/// accounting on unclocked bundles.
const RECEIVED_AT_KEY: &str = "pipeline/received-at";

pub struct Dispatcher {
    pub(crate) ctx: RoutingContext,
    pub(crate) routing: Arc<dyn RoutingAgent>,
    pub(crate) manager: Arc<cla::Manager>,
    pub(crate) agents: Arc<agents::Registry>,
    pub(crate) registry: Arc<bpv7::registry::Registry>,
    pub(crate) id_keeper: Arc<IdKeeper>,
    pub(crate) signing_key: Option<ed25519_dalek::SigningKey>,
    pub(crate) inspect_all_bundles: bool,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: RoutingContext,
        routing: Arc<dyn RoutingAgent>,
        manager: Arc<cla::Manager>,
        agents: Arc<agents::Registry>,
        registry: Arc<bpv7::registry::Registry>,
        id_keeper: Arc<IdKeeper>,
        signing_key: Option<ed25519_dalek::SigningKey>,
        inspect_all_bundles: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            routing,
            manager,
            agents,
            registry,
            id_keeper,
            signing_key,
            inspect_all_bundles,
        })
    }

    pub(crate) async fn stamp_received(&self, bundle: &Bundle) -> Result<()> {
        let key = bundle.id().scrubbed().to_key();
        if let Some(mut item) = self.ctx.store.get(&key).await? {
            item.set_unsigned(RECEIVED_AT_KEY, DtnTime::now().millisecs());
            self.ctx.store.update(&item).await?;
        }
        Ok(())
    }

    pub(crate) async fn received_at(&self, desc: &BundleDescriptor) -> Option<u64> {
        self.ctx
            .store
            .get(&desc.key())
            .await
            .ok()
            .flatten()
            .and_then(|item| item.unsigned(RECEIVED_AT_KEY))
    }

    /// A faulty bundle leaves the pipeline: incoming ones are dropped with
    /// an optional deletion report, outgoing ones go back to their agent.
    pub(crate) async fn abort_faulty(
        self: &Arc<Self>,
        desc: &mut BundleDescriptor,
        reason: ReasonCode,
    ) -> Result<()> {
        if desc.has_tag(Tag::Outgoing) {
            let source = desc.bundle.primary.source.clone();
            if let Some(agent) = self.agents.agent_for(&source) {
                agent
                    .notify(AgentEvent::SendFailed {
                        bundle_id: desc.bundle.id(),
                        reason: format!("{reason:?}"),
                    })
                    .await;
            }
        } else {
            self.send_status_report(desc, bpv7::status_report::StatusKind::Deleted, reason)
                .await;
        }
        warn!("dropping faulty bundle {}: {reason:?}", desc.bundle.id());
        desc.purge(&self.ctx.store).await.map_err(Into::into)
    }

    /// Retry pass over stored pending bundles: contraindicated ones go back
    /// through forwarding, undelivered local ones back to their agents.
    pub async fn process_pending(self: &Arc<Self>) {
        let items = match self.ctx.store.pending().await {
            Ok(items) => items,
            Err(e) => {
                warn!("failed to poll pending bundles: {e}");
                return;
            }
        };

        for item in items {
            if item.fragmented {
                // Reassembly is re-attempted as fragments arrive
                continue;
            }
            let Some(part) = item.parts.first() else {
                continue;
            };
            let bundle = match self.ctx.store.load_part(part).await {
                Ok(raw) => match bpv7::bundle::parse(&raw, &self.registry) {
                    Ok(bundle) => bundle,
                    Err(e) => {
                        warn!("stored bundle {} no longer parses: {e}", item.key);
                        let _ = self.ctx.store.remove(&item.key).await;
                        continue;
                    }
                },
                Err(e) => {
                    warn!("failed to load stored bundle {}: {e}", item.key);
                    continue;
                }
            };

            let mut desc = BundleDescriptor::from_item(bundle, &item);
            let result = if desc.has_constraint(Constraint::Contraindicated) {
                desc.remove_constraint(Constraint::Contraindicated);
                desc.add_constraint(Constraint::ForwardPending);
                self.forward(&mut desc).await
            } else if desc.has_constraint(Constraint::LocalEndpoint) {
                self.local_delivery(&mut desc).await
            } else {
                continue;
            };
            if let Err(e) = result {
                warn!("retry pass failed for {}: {e}", item.key);
            }
        }
    }

    /// Expiry reaper tick.
    pub async fn reap_expired(&self) {
        match self.ctx.store.remove_expired().await {
            Ok(removed) => {
                for key in removed {
                    info!("bundle {key} expired");
                }
            }
            Err(e) => warn!("expiry reaping failed: {e}"),
        }
    }
}
