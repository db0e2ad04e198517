//! Cache Entry Types
//!
//! Metadata tracked per cached upstream response, plus the physical location of its
//! payload (hot in memory, or compressed in cold storage).

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::compression::CompressionAlgorithm;

/// Storage tier of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Uncompressed, in the fast store
    Hot,
    /// Compressed, in the secondary store
    Cold,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Hot => write!(f, "hot"),
            Tier::Cold => write!(f, "cold"),
        }
    }
}

/// Build a cache key that is unique per operation and parameters.
///
/// Parameters are sorted so that argument order does not produce distinct keys.
pub fn cache_key(operation: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return operation.to_string();
    }
    let mut sorted: Vec<_> = params.to_vec();
    sorted.sort();
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}:{}", operation, joined)
}

/// Metadata snapshot of a cache entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryMetadata {
    /// Unique key (operation + parameters)
    pub key: String,
    /// Logical category ("products", "prices", ...)
    pub group: String,
    /// Caller-declared logical size, counted against the budget
    pub size_bytes: u64,
    /// Insertion time
    pub created_at: DateTime<Utc>,
    /// Absolute expiry; never renewed by reads
    pub expires_at: DateTime<Utc>,
    /// Time of the last hit (or insertion)
    pub last_access_at: DateTime<Utc>,
    /// Number of accesses including the insertion
    pub access_count: u64,
    /// Current tier
    pub tier: Tier,
}

impl EntryMetadata {
    /// An entry whose expiry is at or before `now` is logically absent
    #[inline]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Accesses per hour since creation, with age floored at one hour
    pub fn access_frequency(&self, now: DateTime<Utc>) -> f64 {
        let age_hours = (now - self.created_at).num_milliseconds() as f64 / 3_600_000.0;
        self.access_count as f64 / age_hours.max(1.0)
    }

    /// Age of the entry
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.created_at
    }
}

/// Position of an entry in the LRU order.
///
/// Ordered by last access stamp, then creation stamp, so equal recency evicts the
/// older insertion first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct LruKey {
    pub access: u64,
    pub created: u64,
}

/// Where an entry's payload lives
#[derive(Debug, Clone)]
pub(crate) enum Location {
    Hot(Bytes),
    Cold {
        algorithm: CompressionAlgorithm,
        stored_bytes: u64,
    },
}

/// Entry as held by the store
#[derive(Debug, Clone)]
pub(crate) struct StoredEntry {
    pub meta: EntryMetadata,
    pub location: Location,
    /// Unique per insertion; doubles as the entry generation
    pub created_stamp: u64,
    pub access_stamp: u64,
}

impl StoredEntry {
    #[inline]
    pub fn lru_key(&self) -> LruKey {
        LruKey {
            access: self.access_stamp,
            created: self.created_stamp,
        }
    }
}

/// Cached value returned to callers together with its metadata
#[derive(Clone)]
pub struct CacheEntry {
    /// Metadata as of the lookup
    pub metadata: EntryMetadata,
    value: Bytes,
    generation: u64,
}

impl CacheEntry {
    pub(crate) fn new(metadata: EntryMetadata, value: Bytes, generation: u64) -> Self {
        Self {
            metadata,
            value,
            generation,
        }
    }

    /// Insertion generation; changes whenever the key is re-inserted
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Cached payload (zero-copy)
    #[inline]
    pub fn value(&self) -> &Bytes {
        &self.value
    }

    /// Consume into the payload
    pub fn into_value(self) -> Bytes {
        self.value
    }

    /// Tier the entry was served from
    #[inline]
    pub fn tier(&self) -> Tier {
        self.metadata.tier
    }
}

impl std::fmt::Debug for CacheEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEntry")
            .field("key", &self.metadata.key)
            .field("group", &self.metadata.group)
            .field("size", &self.metadata.size_bytes)
            .field("access_count", &self.metadata.access_count)
            .field("tier", &self.metadata.tier)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
