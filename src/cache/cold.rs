//! Cold Storage Backend
//!
//! Secondary store holding compressed payloads of demoted entries. The entry store
//! keeps the key and metadata; only the payload bytes live here.
//!
//! # Design
//!
//! - Pluggable backend (in-memory, file, embedded KV, ...)
//! - Synchronous calls: every operation is a single keyed read/write and is made
//!   outside the entry store lock
//! - Payload keys carry the entry generation (`key#generation`); a stale copy can
//!   never be read as the payload of a newer entry with the same key

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use dashmap::DashMap;

use crate::error::Result;

/// Cold storage backend trait
pub trait ColdStorage: Send + Sync {
    /// Get a stored payload
    fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Store a payload, replacing any previous one
    fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Remove a payload, returning whether it existed
    fn remove(&self, key: &str) -> Result<bool>;

    /// Get storage statistics
    fn stats(&self) -> ColdStorageStats;
}

/// Cold storage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColdStorageStats {
    /// Payloads stored
    pub object_count: u64,
    /// Bytes stored (compressed)
    pub total_bytes: u64,
    /// Read operations
    pub reads: u64,
    /// Write operations
    pub writes: u64,
    /// Delete operations
    pub deletes: u64,
}

/// In-memory cold storage, the default backend
#[derive(Default)]
pub struct InMemoryColdStorage {
    storage: DashMap<String, Bytes>,
    object_count: AtomicU64,
    total_bytes: AtomicU64,
    reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
}

impl InMemoryColdStorage {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self::default()
    }
}

impl ColdStorage for InMemoryColdStorage {
    fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.storage.get(key).map(|data| data.clone()))
    }

    fn put(&self, key: &str, data: Bytes) -> Result<()> {
        self.writes.fetch_add(1, Ordering::Relaxed);

        let size = data.len() as u64;
        match self.storage.insert(key.to_string(), data) {
            Some(old) => {
                self.total_bytes.fetch_sub(old.len() as u64, Ordering::Relaxed);
                self.total_bytes.fetch_add(size, Ordering::Relaxed);
            }
            None => {
                self.object_count.fetch_add(1, Ordering::Relaxed);
                self.total_bytes.fetch_add(size, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        self.deletes.fetch_add(1, Ordering::Relaxed);

        if let Some((_, old)) = self.storage.remove(key) {
            self.object_count.fetch_sub(1, Ordering::Relaxed);
            self.total_bytes.fetch_sub(old.len() as u64, Ordering::Relaxed);
            return Ok(true);
        }
        Ok(false)
    }

    fn stats(&self) -> ColdStorageStats {
        ColdStorageStats {
            object_count: self.object_count.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
