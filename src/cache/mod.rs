//! Response Cache
//!
//! Budgeted, two-tier cache for expensive upstream ERP responses.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                     CacheManager (facade)                            │
//! │   get_or_populate · clear_* · configure_ttl · stats · maintenance    │
//! ├───────────────────────┬───────────────────────┬──────────────────────┤
//! │  EntryStore           │  TierManager          │  FlushController     │
//! │  LRU index + budget   │  hot/cold migration   │  segmented clears    │
//! │  (evicts inside put)  │  (LZ4, generation     │  (time-boxed,        │
//! │                       │   checked swaps)      │   resumable)         │
//! ├───────────────────────┴───────────┬───────────┴──────────────────────┤
//! │  Hot payloads (in entry map)      │  ColdStorage (compressed)        │
//! └───────────────────────────────────┴──────────────────────────────────┘
//! ```
//!
//! # Invariants
//!
//! - `current_size == sum(size_bytes of stored entries)` after every mutation
//! - `current_size <= max_size` after every `put` returns
//! - At most one population in flight per key
//! - Flush and migration never run over overlapping scopes at the same time

pub mod clock;
pub mod cold;
pub mod compression;
pub mod entry;
pub mod flush;
pub mod manager;
pub mod metrics;
pub mod store;
pub mod tier;

pub use clock::{Clock, ManualClock, SystemClock};
pub use cold::{ColdStorage, ColdStorageStats, InMemoryColdStorage};
pub use compression::{CompressionAlgorithm, CompressionConfig, CompressionManager, Compressor};
pub use entry::{cache_key, CacheEntry, EntryMetadata, Tier};
pub use flush::{FlushConfig, FlushController, FlushReport, FlushScope, ScopeLocks};
pub use manager::{CacheManager, CacheManagerBuilder, CacheStats, Lookup};
pub use metrics::{CacheMetrics, MetricsSnapshot};
pub use store::{BudgetSnapshot, EntryStore, KeyPattern, PutOutcome, StoreConfig, TierCounts};
pub use tier::{HotCutoff, MigrationReport, TierManager, TierThresholds, TwoTierStats};

/// Default global budget (100MB)
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 100 * 1024 * 1024;

/// Group whose entries are rotated by age
pub const BATCH_GROUP: &str = "batch";

/// Entries reaped per maintenance pass
pub const REAP_BATCH_SIZE: usize = 1000;

// =============================================================================
// Tests
// =============================================================================
