//! Content-addressed blob store
//!
//! Message bodies and attachments are stored once per SHA-256 hash. The
//! relational `blobs` table is the index; bytes live in a pluggable
//! [`BlobBackend`] keyed by the hash, so a duplicate write of identical bytes
//! is harmless.
//!
//! # Write path
//!
//! 1. Hash the bytes
//! 2. Index hit: reuse (`stored = false`)
//! 3. Backend `head_object` hit: record index, reuse
//! 4. Otherwise `put_object` and record the index row. `stored` is true only
//!    for the writer whose `INSERT OR IGNORE` created the row.
//!
//! If the backend is unreachable the bytes go inline into the `blobs` table
//! instead, and the fallback is logged.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::BlobLocation;

mod local;
mod memory;
mod s3;

pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use s3::{S3Backend, S3Config};

/// Environment variable selecting the blob backend (`local` or `s3`)
pub const BLOB_BACKEND_ENV: &str = "MAILROOM_BLOB_BACKEND";
/// Environment variable overriding the local blob directory
pub const BLOB_DIR_ENV: &str = "MAILROOM_BLOB_DIR";

/// Storage for blob bytes keyed by content hash
#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Human-readable name for this backend
    fn name(&self) -> &str;

    /// Write bytes under `key`. Writing the same key twice must be harmless.
    async fn put_object(&self, key: &str, bytes: &[u8]) -> Result<()>;

    async fn head_object(&self, key: &str) -> Result<bool>;

    /// Read bytes, `None` if the key does not exist
    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Outcome of [`ContentStore::put`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PutResult {
    pub hash: String,
    /// false means the content already existed and was reused
    pub stored: bool,
    pub location: BlobLocation,
    pub size: usize,
}

/// Compute the content hash (lowercase hex SHA-256)
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Whether a string looks like a content hash (guards backend key paths)
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == 64 && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Deduplicating blob store
#[derive(Clone)]
pub struct ContentStore {
    db: Database,
    backend: Arc<dyn BlobBackend>,
}

impl ContentStore {
    pub fn new(db: Database, backend: Arc<dyn BlobBackend>) -> Self {
        Self { db, backend }
    }

    /// Build a store from `MAILROOM_BLOB_BACKEND`
    ///
    /// `local` (default) keeps blobs under `MAILROOM_BLOB_DIR` or `<data_dir>/blobs`;
    /// `s3` reads `MAILROOM_S3_*` settings.
    pub fn from_env(db: Database, data_dir: &Path) -> Result<Self> {
        let kind = std::env::var(BLOB_BACKEND_ENV).unwrap_or_else(|_| "local".to_string());
        let backend: Arc<dyn BlobBackend> = match kind.to_lowercase().as_str() {
            "local" => {
                let dir = std::env::var(BLOB_DIR_ENV)
                    .map(std::path::PathBuf::from)
                    .unwrap_or_else(|_| data_dir.join("blobs"));
                Arc::new(LocalBackend::new(dir)?)
            }
            "s3" => Arc::new(S3Backend::new(S3Config::from_env()?)),
            other => {
                return Err(Error::Config(format!(
                    "Unknown {} '{}'. Valid options: local, s3",
                    BLOB_BACKEND_ENV, other
                )))
            }
        };
        Ok(Self::new(db, backend))
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Store bytes, reusing an existing blob with the same hash
    pub async fn put(&self, bytes: &[u8]) -> Result<PutResult> {
        let hash = content_hash(bytes);

        if let Some(record) = self.db.get_blob_record(&hash)? {
            debug!(hash = %hash, "Blob already indexed, reusing");
            return Ok(PutResult {
                hash,
                stored: false,
                location: record.location,
                size: bytes.len(),
            });
        }

        let write = match self.backend.head_object(&hash).await {
            Ok(true) => {
                // Bytes are there but the index lost track of them
                self.db.record_blob(&hash, bytes.len() as i64)?;
                return Ok(PutResult {
                    hash,
                    stored: false,
                    location: BlobLocation::Backend,
                    size: bytes.len(),
                });
            }
            Ok(false) => self.backend.put_object(&hash, bytes).await,
            Err(e) => Err(e),
        };

        match write {
            Ok(()) => {
                let stored = self.db.record_blob(&hash, bytes.len() as i64)?;
                Ok(PutResult {
                    hash,
                    stored,
                    location: BlobLocation::Backend,
                    size: bytes.len(),
                })
            }
            Err(e) => {
                warn!(
                    hash = %hash,
                    backend = self.backend.name(),
                    error = %e,
                    "Blob backend unavailable, storing inline"
                );
                let stored = self.db.record_inline_blob(&hash, bytes)?;
                // Lost the race to a backend write: the index row says where the bytes are
                let location = if stored {
                    BlobLocation::Inline
                } else {
                    self.db
                        .get_blob_record(&hash)?
                        .map(|r| r.location)
                        .unwrap_or(BlobLocation::Inline)
                };
                Ok(PutResult {
                    hash,
                    stored,
                    location,
                    size: bytes.len(),
                })
            }
        }
    }

    /// Fetch bytes by hash
    pub async fn get(&self, hash: &str) -> Result<Vec<u8>> {
        if !is_valid_hash(hash) {
            return Err(Error::InvalidData(format!("Invalid content hash: {}", hash)));
        }

        let location = self.db.get_blob_record(hash)?.map(|r| r.location);
        let bytes = match location {
            Some(BlobLocation::Inline) => self.db.get_inline_blob(hash)?,
            Some(BlobLocation::Backend) | None => self.backend.get_object(hash).await?,
        };

        bytes.ok_or_else(|| Error::NotFound(format!("blob {}", hash)))
    }

    pub async fn exists(&self, hash: &str) -> Result<bool> {
        if self.db.get_blob_record(hash)?.is_some() {
            return Ok(true);
        }
        if !is_valid_hash(hash) {
            return Ok(false);
        }
        self.backend.head_object(hash).await
    }
}
