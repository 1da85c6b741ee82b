//! Payload blobs as files under `<store>/blobs/`.
//!
//! A blob is written to a temporary name and renamed into place, so a crash
//! mid-write never leaves a readable half-blob under its final name.

use super::*;
use std::path::PathBuf;

pub struct LocalDiskPayloadStore {
    root: PathBuf,
}

impl LocalDiskPayloadStore {
    pub async fn new(store_path: &std::path::Path) -> Result<Arc<Self>> {
        let root = store_path.join("blobs");
        tokio::fs::create_dir_all(&root).await?;
        Ok(Arc::new(Self { root }))
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

#[async_trait]
impl PayloadStore for LocalDiskPayloadStore {
    async fn save(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.path_of(name);
        let tmp = self.root.join(format!(".{name}.tmp"));
        tokio::fs::write(&tmp, data).await?;
        match tokio::fs::rename(&tmp, &path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp).await;
                Err(e.into())
            }
        }
    }

    async fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_of(name)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, name: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_of(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str()
                && !name.starts_with('.')
            {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}
