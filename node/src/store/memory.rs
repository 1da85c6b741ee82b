//! In-memory metadata index with pending and expiry indexes.

use super::*;
use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    items: HashMap<String, BundleItem>,
    pending: HashSet<String>,
    // (expires, key) so the BTreeSet iterates in deadline order
    expiry: BTreeSet<(u64, String)>,
}

#[derive(Default)]
pub struct MemoryMetadataStore {
    inner: Mutex<Inner>,
}

impl MemoryMetadataStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl Inner {
    fn index(&mut self, item: &BundleItem) {
        if item.pending {
            self.pending.insert(item.key.clone());
        } else {
            self.pending.remove(&item.key);
        }
        self.expiry.insert((item.expires, item.key.clone()));
    }

    fn unindex(&mut self, item: &BundleItem) {
        self.pending.remove(&item.key);
        self.expiry.remove(&(item.expires, item.key.clone()));
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn get(&self, key: &str) -> Result<Option<BundleItem>> {
        Ok(self.inner.lock().unwrap().items.get(key).cloned())
    }

    async fn insert(&self, item: &BundleItem) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if inner.items.contains_key(&item.key) {
            return Ok(false);
        }
        inner.items.insert(item.key.clone(), item.clone());
        inner.index(item);
        Ok(true)
    }

    async fn replace(&self, item: &BundleItem) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.items.insert(item.key.clone(), item.clone()) {
            Some(old) => {
                inner.unindex(&old);
                inner.index(item);
                Ok(())
            }
            None => {
                inner.items.remove(&item.key);
                Err(Error::NotFound(item.key.clone()))
            }
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(old) = inner.items.remove(key) {
            inner.unindex(&old);
        }
        Ok(())
    }

    async fn pending(&self) -> Result<Vec<BundleItem>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .pending
            .iter()
            .filter_map(|key| inner.items.get(key).cloned())
            .collect())
    }

    async fn take_expired(&self, now: u64) -> Result<Vec<BundleItem>> {
        let mut inner = self.inner.lock().unwrap();
        let dead: Vec<(u64, String)> = inner
            .expiry
            .range(..=(now, String::from("\u{10FFFF}")))
            .filter(|(expires, _)| *expires <= now)
            .cloned()
            .collect();

        let mut items = Vec::with_capacity(dead.len());
        for entry in dead {
            inner.expiry.remove(&entry);
            inner.pending.remove(&entry.1);
            if let Some(item) = inner.items.remove(&entry.1) {
                items.push(item);
            }
        }
        Ok(items)
    }
}

/// In-memory payload store, for tests and diskless deployments.
#[derive(Default)]
pub struct MemoryPayloadStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryPayloadStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl PayloadStore for MemoryPayloadStore {
    async fn save(&self, name: &str, data: &[u8]) -> Result<()> {
        self.blobs
            .lock()
            .unwrap()
            .insert(name.to_string(), data.to_vec());
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().unwrap().get(name).cloned())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.blobs.lock().unwrap().remove(name);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.blobs.lock().unwrap().keys().cloned().collect())
    }
}
