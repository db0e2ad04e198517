//! erpcache - Response Cache Manager for an ERP Web Service
//!
//! Caches expensive upstream API responses under a global size budget, calibrates
//! per-operation TTLs from measured upstream latency, tiers entries by access
//! frequency and clears itself in bounded segments.
//!
//! # Architecture
//!
//! ```text
//!                      ┌──────────────────────┐
//!   callers ─────────▶ │  CacheManager facade │ ◀──── OperationRegistry (TTL, toggles)
//!                      └──────────┬───────────┘               ▲
//!                                 │                           │ calibrated TTLs
//!               ┌─────────────────┼─────────────────┐         │
//!               ▼                 ▼                 ▼   ┌─────┴──────────┐
//!        EntryStore + LRU    TierManager     FlushController│ AutoConfigurator│
//!        (global budget)     (hot / cold)    (segmented)    │ probe + session │
//!                                 │                         └────────────────┘
//!                                 ▼
//!                           ColdStorage (LZ4)
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Entry store, eviction, tiering, segmented flush and the facade
//! - [`calibration`] - Latency probe, session resolver and TTL calibrator
//! - [`config`] - Cache settings and per-operation policy
//! - [`error`] - Error types

pub mod cache;
pub mod calibration;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use cache::{CacheManager, CacheManagerBuilder, CacheStats, Lookup};
pub use calibration::{AutoConfigurator, HttpLatencyProbe, LatencyProbe, TtlCalibrator};
pub use config::{CacheSettings, OperationConfig, OperationRegistry};
pub use error::{Error, Result};
