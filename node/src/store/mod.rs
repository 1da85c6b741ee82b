//! The persistent bundle store.
//!
//! Metadata records and payload blobs are kept behind two traits so the
//! embedded index engine stays swappable; the [`Store`] facade coordinates
//! the two. Records are keyed by the scrubbed bundle identifier and blobs
//! are content-addressed by the SHA-256 of the full identifier, so replica
//! fragments of one bundle accumulate as parts of a single record.

use super::*;
use bpv7::bundle::Bundle;
use bpv7::dtn_time::DtnTime;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

pub mod localdisk;
pub mod memory;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no bundle item with key {0}")]
    NotFound(String),

    #[error("bundle item {0} already exists")]
    Conflict(String),

    #[error("payload blob {0} has gone from storage")]
    MissingBlob(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Internal(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// A value in a bundle item's free-form property bag. Routing algorithms
/// keep their per-bundle forwarding metadata here.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Property {
    Text(String),
    Unsigned(u64),
    TextList(Vec<String>),
    Blob(Vec<u8>),
}

/// One stored copy of (part of) a bundle's payload.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BundlePart {
    /// Blob name in the payload store.
    pub blob: String,
    pub offset: u64,
    pub total_len: u64,
}

/// The storage record for one (possibly fragmented) bundle.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BundleItem {
    /// Scrubbed bundle id string.
    pub key: String,
    /// Indexed: the routing pipeline still has work to do on this bundle.
    pub pending: bool,
    /// Indexed: absolute expiry time.
    pub expires: u64,
    pub fragmented: bool,
    pub parts: Vec<BundlePart>,
    pub properties: HashMap<String, Property>,
}

impl BundleItem {
    pub fn text_list(&self, key: &str) -> Vec<String> {
        match self.properties.get(key) {
            Some(Property::TextList(list)) => list.clone(),
            _ => Vec::new(),
        }
    }

    pub fn set_text_list(&mut self, key: &str, list: Vec<String>) {
        self.properties
            .insert(key.to_string(), Property::TextList(list));
    }

    pub fn unsigned(&self, key: &str) -> Option<u64> {
        match self.properties.get(key) {
            Some(Property::Unsigned(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn set_unsigned(&mut self, key: &str, value: u64) {
        self.properties
            .insert(key.to_string(), Property::Unsigned(value));
    }
}

/// The metadata index. Implementations must keep `pending` and `expires`
/// queryable without a full scan.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<BundleItem>>;

    /// Inserts a new record; returns `false` without touching anything if
    /// the key already exists.
    async fn insert(&self, item: &BundleItem) -> Result<bool>;

    /// Overwrites an existing record, reindexing `pending` and `expires`.
    async fn replace(&self, item: &BundleItem) -> Result<()>;

    /// Removes a record. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// All records whose pending flag is set.
    async fn pending(&self) -> Result<Vec<BundleItem>>;

    /// Removes and returns every record expiring at or before `now`.
    async fn take_expired(&self, now: u64) -> Result<Vec<BundleItem>>;
}

/// Payload blob storage. A blob is written exactly once; a failed write
/// must leave nothing behind.
#[async_trait]
pub trait PayloadStore: Send + Sync {
    async fn save(&self, name: &str, data: &[u8]) -> Result<()>;

    async fn load(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Deleting an absent blob is not an error.
    async fn delete(&self, name: &str) -> Result<()>;

    /// Blob names present in storage, for startup recovery.
    async fn list(&self) -> Result<Vec<String>>;
}

/// The outcome of [`Store::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// First copy of this bundle.
    New,
    /// A fragment of an already-known bundle; a new part was recorded.
    NewPart,
    /// An exact replica of a stored bundle or part.
    Duplicate,
}

/// Facade coordinating the metadata index and the payload blobs.
pub struct Store {
    metadata: Arc<dyn MetadataStore>,
    payloads: Arc<dyn PayloadStore>,
}

/// Blob name: hex SHA-256 of the full (unscrubbed) bundle id string.
pub fn blob_name(id: &bpv7::bundle_id::BundleId) -> String {
    let digest = Sha256::digest(id.to_key().as_bytes());
    digest.iter().fold(String::new(), |mut s, b| {
        s.push_str(&format!("{b:02x}"));
        s
    })
}

impl Store {
    pub fn new(metadata: Arc<dyn MetadataStore>, payloads: Arc<dyn PayloadStore>) -> Self {
        Self { metadata, payloads }
    }

    /// Absolute expiry of a bundle: creation plus lifetime for clocked
    /// sources, otherwise now plus the lifetime not yet consumed by age.
    fn expiry(bundle: &Bundle) -> u64 {
        if bundle.primary.timestamp.is_clocked() {
            bundle.primary.expires_at().millisecs()
        } else {
            let age = bundle.bundle_age().unwrap_or(0);
            DtnTime::now()
                .millisecs()
                .saturating_add(bundle.primary.lifetime.saturating_sub(age))
        }
    }

    /// Idempotent insertion. The payload blob is written before the record
    /// so a failure part-way leaves the record absent, never half-built.
    pub async fn push(&self, bundle: &Bundle, raw: &[u8]) -> Result<PushOutcome> {
        let id = bundle.id();
        let key = id.scrubbed().to_key();
        let blob = blob_name(&id);
        let part = BundlePart {
            blob: blob.clone(),
            offset: id.fragment.map_or(0, |f| f.offset),
            total_len: id.fragment.map_or_else(
                || bundle.payload().map_or(0, |p| p.len() as u64),
                |f| f.total_len,
            ),
        };

        match self.metadata.get(&key).await? {
            None => {
                self.payloads.save(&blob, raw).await?;
                let item = BundleItem {
                    key: key.clone(),
                    pending: true,
                    expires: Self::expiry(bundle),
                    fragmented: id.is_fragment(),
                    parts: vec![part],
                    properties: HashMap::new(),
                };
                if self.metadata.insert(&item).await? {
                    Ok(PushOutcome::New)
                } else {
                    // Raced with another copy; ours is now surplus
                    self.payloads.delete(&blob).await?;
                    Ok(PushOutcome::Duplicate)
                }
            }
            Some(mut item) => {
                if !id.is_fragment() || item.parts.iter().any(|p| p.blob == part.blob) {
                    return Ok(PushOutcome::Duplicate);
                }
                self.payloads.save(&blob, raw).await?;
                item.parts.push(part);
                item.fragmented = true;
                self.metadata.replace(&item).await?;
                Ok(PushOutcome::NewPart)
            }
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<BundleItem>> {
        self.metadata.get(key).await
    }

    /// The item, or a not-found error.
    pub async fn query_id(&self, key: &str) -> Result<BundleItem> {
        self.metadata
            .get(key)
            .await?
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    pub async fn update(&self, item: &BundleItem) -> Result<()> {
        self.metadata.replace(item).await
    }

    pub async fn pending(&self) -> Result<Vec<BundleItem>> {
        self.metadata.pending().await
    }

    /// Raw serialised bundle bytes of one stored part.
    pub async fn load_part(&self, part: &BundlePart) -> Result<Vec<u8>> {
        self.payloads
            .load(&part.blob)
            .await?
            .ok_or_else(|| Error::MissingBlob(part.blob.clone()))
    }

    /// Removes the record and every payload blob it references.
    pub async fn remove(&self, key: &str) -> Result<()> {
        if let Some(item) = self.metadata.get(key).await? {
            for part in &item.parts {
                self.payloads.delete(&part.blob).await?;
            }
            self.metadata.remove(key).await?;
        }
        Ok(())
    }

    /// Scans the expiry index and removes everything past its deadline.
    /// Returns the keys of the removed items.
    pub async fn remove_expired(&self) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for item in self
            .metadata
            .take_expired(DtnTime::now().millisecs())
            .await?
        {
            for part in &item.parts {
                self.payloads.delete(&part.blob).await?;
            }
            removed.push(item.key);
        }
        Ok(removed)
    }

    /// All blob names on disk, for startup recovery of orphaned payloads.
    pub async fn recoverable_blobs(&self) -> Result<Vec<String>> {
        let mut orphans = Vec::new();
        let mut referenced = std::collections::HashSet::new();
        for item in self.metadata.pending().await? {
            for part in &item.parts {
                referenced.insert(part.blob.clone());
            }
        }
        for blob in self.payloads.list().await? {
            if !referenced.contains(&blob) {
                orphans.push(blob);
            }
        }
        Ok(orphans)
    }

    pub async fn load_blob(&self, name: &str) -> Result<Option<Vec<u8>>> {
        self.payloads.load(name).await
    }
}

#[cfg(test)]
mod tests;
