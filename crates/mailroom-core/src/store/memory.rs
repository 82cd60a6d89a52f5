//! In-memory blob backend for tests and dry runs

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::BlobBackend;
use crate::error::{Error, Result};

/// Blob backend that keeps objects in a map
///
/// Can be switched to unavailable to exercise the inline fallback, and counts
/// `put_object` calls so dedup can be asserted.
#[derive(Default)]
pub struct MemoryBackend {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    unavailable: AtomicBool,
    puts: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of successful `put_object` calls
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().map(|m| m.len()).unwrap_or(0)
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(Error::Blob("memory backend unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BlobBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put_object(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.check()?;
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| Error::Blob("memory backend poisoned".to_string()))?;
        objects.insert(key.to_string(), bytes.to_vec());
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn head_object(&self, key: &str) -> Result<bool> {
        self.check()?;
        let objects = self
            .objects
            .lock()
            .map_err(|_| Error::Blob("memory backend poisoned".to_string()))?;
        Ok(objects.contains_key(key))
    }

    async fn get_object(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check()?;
        let objects = self
            .objects
            .lock()
            .map_err(|_| Error::Blob("memory backend poisoned".to_string()))?;
        Ok(objects.get(key).cloned())
    }
}
