//! The in-memory handle the routing pipeline passes around.
//!
//! Constraints are durable processing obligations and synchronise to the
//! store; tags are transient observations local to one pipeline pass. A
//! descriptor whose constraint set empties out has no reason to stay stored
//! and is deleted on the next sync.

use super::*;
use bpv7::bundle::Bundle;
use std::collections::BTreeSet;
use store::{Property, Store};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Constraint {
    DispatchPending,
    ForwardPending,
    ReassemblyPending,
    Contraindicated,
    LocalEndpoint,
}

impl Constraint {
    fn as_str(&self) -> &'static str {
        match self {
            Constraint::DispatchPending => "dispatch-pending",
            Constraint::ForwardPending => "forward-pending",
            Constraint::ReassemblyPending => "reassembly-pending",
            Constraint::Contraindicated => "contraindicated",
            Constraint::LocalEndpoint => "local-endpoint",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "dispatch-pending" => Some(Constraint::DispatchPending),
            "forward-pending" => Some(Constraint::ForwardPending),
            "reassembly-pending" => Some(Constraint::ReassemblyPending),
            "contraindicated" => Some(Constraint::Contraindicated),
            "local-endpoint" => Some(Constraint::LocalEndpoint),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tag {
    Incoming,
    Outgoing,
    Faulty,
    ReassemblyPending,
    NoLocalAgent,
    Delivered,
}

const CONSTRAINTS_KEY: &str = "pipeline/constraints";

#[derive(Debug, Clone)]
pub struct BundleDescriptor {
    pub bundle: Bundle,
    pub constraints: BTreeSet<Constraint>,
    pub tags: BTreeSet<Tag>,
}

impl BundleDescriptor {
    pub fn new_incoming(bundle: Bundle) -> Self {
        let mut d = Self {
            bundle,
            constraints: BTreeSet::new(),
            tags: BTreeSet::new(),
        };
        d.tags.insert(Tag::Incoming);
        d.constraints.insert(Constraint::DispatchPending);
        d
    }

    pub fn new_outgoing(bundle: Bundle) -> Self {
        let mut d = Self {
            bundle,
            constraints: BTreeSet::new(),
            tags: BTreeSet::new(),
        };
        d.tags.insert(Tag::Outgoing);
        d.constraints.insert(Constraint::DispatchPending);
        d
    }

    /// Rebuilds a descriptor for a stored bundle, restoring its persisted
    /// constraints.
    pub fn from_item(bundle: Bundle, item: &store::BundleItem) -> Self {
        let mut constraints = BTreeSet::new();
        if let Some(Property::TextList(list)) = item.properties.get(CONSTRAINTS_KEY) {
            for s in list {
                if let Some(c) = Constraint::from_str(s) {
                    constraints.insert(c);
                }
            }
        }
        Self {
            bundle,
            constraints,
            tags: BTreeSet::new(),
        }
    }

    pub fn key(&self) -> String {
        self.bundle.id().scrubbed().to_key()
    }

    pub fn has_constraint(&self, c: Constraint) -> bool {
        self.constraints.contains(&c)
    }

    pub fn add_constraint(&mut self, c: Constraint) {
        self.constraints.insert(c);
    }

    pub fn remove_constraint(&mut self, c: Constraint) {
        self.constraints.remove(&c);
    }

    pub fn tag(&mut self, t: Tag) {
        self.tags.insert(t);
    }

    pub fn has_tag(&self, t: Tag) -> bool {
        self.tags.contains(&t)
    }

    /// Synchronises constraints to the store: an empty constraint set
    /// deletes the item, otherwise the item's pending flag and persisted
    /// constraint list are refreshed.
    pub async fn sync(&self, store: &Store) -> store::Result<()> {
        let key = self.key();
        if self.constraints.is_empty() {
            return store.remove(&key).await;
        }
        if let Some(mut item) = store.get(&key).await? {
            item.pending = true;
            item.set_text_list(
                CONSTRAINTS_KEY,
                self.constraints.iter().map(|c| c.as_str().to_string()).collect(),
            );
            store.update(&item).await?;
        }
        Ok(())
    }

    /// Drops every constraint and deletes the stored item.
    pub async fn purge(&mut self, store: &Store) -> store::Result<()> {
        self.constraints.clear();
        store.remove(&self.key()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bpv7::builder::Builder;
    use store::memory::{MemoryMetadataStore, MemoryPayloadStore};

    fn test_descriptor() -> BundleDescriptor {
        BundleDescriptor::new_incoming(
            Builder::new()
                .source("dtn://src/".parse().unwrap())
                .destination("dtn://dst/".parse().unwrap())
                .payload(b"x".to_vec())
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn constraints_round_trip_through_store() {
        let store = Store::new(MemoryMetadataStore::new(), MemoryPayloadStore::new());
        let mut desc = test_descriptor();
        store
            .push(&desc.bundle, &desc.bundle.to_cbor().unwrap())
            .await
            .unwrap();

        desc.add_constraint(Constraint::ForwardPending);
        desc.remove_constraint(Constraint::DispatchPending);
        desc.sync(&store).await.unwrap();

        let item = store.query_id(&desc.key()).await.unwrap();
        let restored = BundleDescriptor::from_item(desc.bundle.clone(), &item);
        assert!(restored.has_constraint(Constraint::ForwardPending));
        assert!(!restored.has_constraint(Constraint::DispatchPending));
    }

    #[tokio::test]
    async fn empty_constraints_delete_on_sync() {
        let store = Store::new(MemoryMetadataStore::new(), MemoryPayloadStore::new());
        let mut desc = test_descriptor();
        store
            .push(&desc.bundle, &desc.bundle.to_cbor().unwrap())
            .await
            .unwrap();

        desc.remove_constraint(Constraint::DispatchPending);
        desc.sync(&store).await.unwrap();
        assert!(store.get(&desc.key()).await.unwrap().is_none());
    }

    #[test]
    fn tags_are_transient() {
        let mut desc = test_descriptor();
        desc.tag(Tag::Faulty);
        assert!(desc.has_tag(Tag::Faulty));
        assert!(desc.has_tag(Tag::Incoming));
        assert!(!desc.has_tag(Tag::Delivered));
    }
}
