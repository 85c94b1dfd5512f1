use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{ObjectStore, validate_key};
use crate::error::StorageError;

/// Object store rooted at a local directory. Keys map to relative paths.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn upload(
        &self,
        source: &Path,
        key: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let destination = self.path_for(key)?;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Readers must never observe a partially written object.
        let partial = destination.with_extension("partial");
        let bytes = tokio::fs::copy(source, &partial).await?;
        tokio::fs::rename(&partial, &destination).await?;

        debug!(key, content_type, bytes, "stored object");
        Ok(key.to_string())
    }
}
