//! Local filesystem blob backend
//!
//! Objects are sharded by hash prefix (`ab/cd/abcd...`) and written atomically
//! via a temp file in the target directory followed by a rename, so a reader
//! never observes a partial blob and two writers of the same hash both leave
//! a complete file behind.

use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use super::{is_valid_hash, BlobBackend};
use crate::error::{Error, Result};

pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a backend rooted at `root`, creating the directory if needed
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();

        if !root.exists() {
            std::fs::create_dir_all(&root).map_err(|e| {
                Error::Blob(format!(
                    "Failed to create blob directory {}: {}",
                    root.display(),
                    e
                ))
            })?;
            info!("Created blob directory: {}", root.display());
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        if !is_valid_hash(key) {
            return Err(Error::InvalidData(format!("Invalid blob key: {}", key)));
        }
        Ok(self.root.join(&key[0..2]).join(&key[2..4]).join(key))
    }
}

#[async_trait]
impl BlobBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn put_object(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.object_path(key)?;
        let bytes = bytes.to_vec();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let dir = path
                .parent()
                .ok_or_else(|| Error::Blob(format!("No parent for {}", path.display())))?;
            std::fs::create_dir_all(dir)?;

            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path)
                .map_err(|e| Error::Blob(format!("Failed to persist {}: {}", path.display(), e)))?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Blob(format!("Blob write task failed: {}", e)))?
    }

    async fn head_object(&self, key: &str) -> Result<bool> {
        let path = self.object_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
