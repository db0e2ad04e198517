//! Segmented Flush Controller
//!
//! Clears large numbers of entries in bounded, resumable steps.
//!
//! # Design
//!
//! - Below `trigger_threshold_entries` candidates, one direct pass
//! - Above it, segments of `segment_size` keys (oldest first), each deleted in its
//!   own store critical section so the budget is updated per segment
//! - A pattern scope lists its matching keys once, in chunked scans, and then
//!   works through that list; no step holds the store lock for a full scan
//! - Wall-clock time is checked after every segment; exceeding
//!   `max_wall_clock` returns `completed = false` and the caller re-invokes
//! - Scope locks keep a flush and a migration pass off the same entries

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info};

use super::store::{EntryStore, KeyPattern, SCAN_CHUNK};
use crate::error::{Error, Result};

// =============================================================================
// Scopes
// =============================================================================

/// Set of entries a maintenance operation works on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FlushScope {
    /// Every entry
    All,
    /// Entries of one group
    Group(String),
    /// Entries whose key matches a glob
    Pattern(String),
}

impl FlushScope {
    /// Whether two scopes may touch the same entry
    pub fn overlaps(&self, other: &FlushScope) -> bool {
        match (self, other) {
            (FlushScope::Group(a), FlushScope::Group(b)) => a == b,
            _ => true,
        }
    }
}

impl std::fmt::Display for FlushScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlushScope::All => write!(f, "all"),
            FlushScope::Group(g) => write!(f, "group:{}", g),
            FlushScope::Pattern(p) => write!(f, "pattern:{}", p),
        }
    }
}

/// Registry of scopes currently held by maintenance passes
#[derive(Debug, Default)]
pub struct ScopeLocks {
    active: Mutex<Vec<(u64, FlushScope)>>,
    next_id: AtomicU64,
}

impl ScopeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a scope, failing fast if an overlapping one is held
    pub fn try_acquire(self: &Arc<Self>, scope: FlushScope) -> Result<ScopeGuard> {
        let mut active = self.active.lock();
        if let Some((_, held)) = active.iter().find(|(_, held)| held.overlaps(&scope)) {
            debug!(requested = %scope, held = %held, "scope busy");
            return Err(Error::ScopeBusy {
                scope: held.to_string(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        active.push((id, scope));
        Ok(ScopeGuard {
            locks: Arc::clone(self),
            id,
        })
    }

    /// Number of scopes currently held
    pub fn held(&self) -> usize {
        self.active.lock().len()
    }
}

/// Releases its scope on drop
#[derive(Debug)]
pub struct ScopeGuard {
    locks: Arc<ScopeLocks>,
    id: u64,
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.locks.active.lock().retain(|(id, _)| *id != self.id);
    }
}

// =============================================================================
// Configuration & Report
// =============================================================================

/// Segmented flush configuration
#[derive(Debug, Clone, PartialEq)]
pub struct FlushConfig {
    /// Candidate count at which flushing switches to segments
    pub trigger_threshold_entries: usize,
    /// Keys deleted per segment
    pub segment_size: usize,
    /// Wall-clock budget of one invocation
    pub max_wall_clock: Duration,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            trigger_threshold_entries: 1000,
            segment_size: 500,
            max_wall_clock: Duration::from_secs(30),
        }
    }
}

/// Outcome of one flush invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlushReport {
    /// Scope flushed
    pub scope: String,
    /// Entries deleted by this invocation
    pub cleared: usize,
    /// False when the time budget ran out first
    pub completed: bool,
    /// Matching entries left behind
    pub remaining: usize,
    /// Segments processed (1 for a direct pass)
    pub segments: usize,
    /// Time spent
    pub elapsed: Duration,
}

// =============================================================================
// Flush Controller
// =============================================================================

/// Clears scopes of the entry store within a time budget
pub struct FlushController {
    store: Arc<EntryStore>,
    locks: Arc<ScopeLocks>,
    config: RwLock<FlushConfig>,
}

impl FlushController {
    pub fn new(store: Arc<EntryStore>, locks: Arc<ScopeLocks>, config: FlushConfig) -> Self {
        Self {
            store,
            locks,
            config: RwLock::new(config),
        }
    }

    /// Current configuration
    pub fn config(&self) -> FlushConfig {
        self.config.read().clone()
    }

    /// Replace the configuration
    pub fn set_config(&self, config: FlushConfig) {
        *self.config.write() = config;
    }

    /// Flush a scope
    pub fn flush(&self, scope: FlushScope) -> Result<FlushReport> {
        let _guard = self.locks.try_acquire(scope.clone())?;
        let config = self.config();

        let start = Instant::now();
        let mut targets = match &scope {
            FlushScope::All => Targets::All,
            FlushScope::Group(group) => Targets::Group(group.clone()),
            FlushScope::Pattern(glob) => {
                let pattern = KeyPattern::new(glob)?;
                Targets::Keys(self.store.matching_keys(&pattern).into_iter())
            }
        };
        let candidates = targets.remaining(&self.store);

        let report = if candidates < config.trigger_threshold_entries {
            let cleared = targets.clear_all(&self.store);
            FlushReport {
                scope: scope.to_string(),
                cleared,
                completed: true,
                remaining: 0,
                segments: 1,
                elapsed: start.elapsed(),
            }
        } else {
            self.segmented(&scope, &mut targets, &config, start)
        };

        self.store.metrics().record_flushed(report.cleared as u64);
        info!(
            scope = %report.scope,
            cleared = report.cleared,
            completed = report.completed,
            remaining = report.remaining,
            segments = report.segments,
            "flush finished"
        );
        Ok(report)
    }

    fn segmented(
        &self,
        scope: &FlushScope,
        targets: &mut Targets,
        config: &FlushConfig,
        start: Instant,
    ) -> FlushReport {
        let segment_size = config.segment_size.max(1);
        let mut cleared = 0;
        let mut segments = 0;

        let completed = loop {
            let keys = targets.next_segment(&self.store, segment_size);
            if keys.is_empty() {
                break true;
            }

            cleared += self.store.delete_keys(&keys);
            segments += 1;
            debug!(scope = %scope, segment = segments, cleared, "flush segment done");

            if start.elapsed() >= config.max_wall_clock {
                break targets.remaining(&self.store) == 0;
            }
        };

        let remaining = if completed {
            0
        } else {
            targets.remaining(&self.store)
        };

        FlushReport {
            scope: scope.to_string(),
            cleared,
            completed,
            remaining,
            segments,
            elapsed: start.elapsed(),
        }
    }
}

/// Entries a flush still has to visit
enum Targets {
    All,
    Group(String),
    /// Keys that matched when the flush started, not yet deleted
    Keys(std::vec::IntoIter<String>),
}

impl Targets {
    fn remaining(&self, store: &EntryStore) -> usize {
        match self {
            Targets::All => store.len(),
            Targets::Group(group) => store.group_len(group),
            Targets::Keys(keys) => keys
                .as_slice()
                .iter()
                .filter(|k| store.generation(k).is_some())
                .count(),
        }
    }

    fn next_segment(&mut self, store: &EntryStore, segment_size: usize) -> Vec<String> {
        match self {
            Targets::All => store.lru_keys(segment_size),
            Targets::Group(group) => store.group_keys(group, segment_size),
            Targets::Keys(keys) => keys.by_ref().take(segment_size).collect(),
        }
    }

    fn clear_all(&mut self, store: &EntryStore) -> usize {
        match self {
            Targets::All => store.clear(),
            Targets::Group(group) => store.delete_by_group(group),
            Targets::Keys(keys) => keys
                .as_slice()
                .chunks(SCAN_CHUNK)
                .map(|chunk| store.delete_keys(chunk))
                .sum(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use bytes::Bytes;

    const HOUR: Duration = Duration::from_secs(3600);

    fn fill(store: &EntryStore, prefix: &str, group: &str, n: usize) {
        for i in 0..n {
            store
                .put(&format!("{}-{}", prefix, i), Bytes::new(), 10, group, HOUR)
                .unwrap();
        }
    }

    fn controller(config: FlushConfig) -> (FlushController, Arc<EntryStore>, Arc<ScopeLocks>) {
        let store = Arc::new(EntryStore::in_memory(u64::MAX / 2));
        let locks = Arc::new(ScopeLocks::new());
        let controller = FlushController::new(Arc::clone(&store), Arc::clone(&locks), config);
        (controller, store, locks)
    }

    #[test]
    fn test_scope_overlap() {
        let all = FlushScope::All;
        let a = FlushScope::Group("a".into());
        let b = FlushScope::Group("b".into());
        let p = FlushScope::Pattern("x*".into());

        assert!(all.overlaps(&a));
        assert!(a.overlaps(&all));
        assert!(a.overlaps(&a.clone()));
        assert!(!a.overlaps(&b));
        assert!(p.overlaps(&a));
    }

    #[test]
    fn test_scope_locks_exclusive() {
        let locks = Arc::new(ScopeLocks::new());

        let guard = locks.try_acquire(FlushScope::Group("prices".into())).unwrap();
        let _other = locks.try_acquire(FlushScope::Group("stock".into())).unwrap();
        assert_matches!(
            locks.try_acquire(FlushScope::All),
            Err(Error::ScopeBusy { .. })
        );

        drop(guard);
        assert_eq!(locks.held(), 1);
        assert!(locks.try_acquire(FlushScope::Group("prices".into())).is_ok());
    }

    #[test]
    fn test_direct_flush_below_threshold() {
        let (controller, store, _) = controller(FlushConfig::default());
        fill(&store, "k", "g", 50);

        let report = controller.flush(FlushScope::All).unwrap();
        assert_eq!(report.cleared, 50);
        assert!(report.completed);
        assert_eq!(report.segments, 1);
        assert_eq!(store.current_size(), 0);
    }

    #[test]
    fn test_flush_is_idempotent() {
        let (controller, store, _) = controller(FlushConfig::default());
        fill(&store, "k", "g", 10);

        controller.flush(FlushScope::All).unwrap();
        let second = controller.flush(FlushScope::All).unwrap();
        assert_eq!(second.cleared, 0);
        assert!(second.completed);
        assert_eq!(store.current_size(), 0);
    }

    #[test]
    fn test_segmented_flush_completes_within_budget() {
        let (controller, store, _) = controller(FlushConfig {
            trigger_threshold_entries: 100,
            segment_size: 30,
            max_wall_clock: Duration::from_secs(60),
        });
        fill(&store, "k", "g", 250);

        let report = controller.flush(FlushScope::All).unwrap();
        assert_eq!(report.cleared, 250);
        assert!(report.completed);
        assert_eq!(report.segments, 9);
        assert!(store.is_empty());
    }

    #[test]
    fn test_segmented_flush_resumes_after_timeout() {
        let (controller, store, _) = controller(FlushConfig {
            trigger_threshold_entries: 100,
            segment_size: 40,
            max_wall_clock: Duration::ZERO,
        });
        fill(&store, "k", "g", 200);

        let first = controller.flush(FlushScope::All).unwrap();
        assert_eq!(first.cleared, 40);
        assert!(!first.completed);
        assert_eq!(first.remaining, 160);
        assert_eq!(store.current_size(), 1600);

        let mut total = first.cleared;
        loop {
            let report = controller.flush(FlushScope::All).unwrap();
            total += report.cleared;
            if report.completed {
                break;
            }
        }
        assert_eq!(total, 200);
        assert_eq!(store.current_size(), 0);
    }

    #[test]
    fn test_group_flush_leaves_other_groups() {
        let (controller, store, _) = controller(FlushConfig {
            trigger_threshold_entries: 100,
            segment_size: 25,
            max_wall_clock: Duration::from_secs(60),
        });
        fill(&store, "price", "prices", 150);
        fill(&store, "cat", "categories", 20);

        let report = controller
            .flush(FlushScope::Group("prices".into()))
            .unwrap();
        assert_eq!(report.cleared, 150);
        assert!(report.completed);
        assert_eq!(store.len(), 20);
        assert_eq!(store.current_size(), 200);
    }

    #[test]
    fn test_pattern_flush() {
        let (controller, store, _) = controller(FlushConfig::default());
        fill(&store, "GetArticulosWS", "products", 5);
        fill(&store, "GetStockArticulosWS", "stock", 5);

        let report = controller
            .flush(FlushScope::Pattern("GetArticulosWS-*".into()))
            .unwrap();
        assert_eq!(report.cleared, 5);
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_segmented_pattern_flush() {
        let (controller, store, _) = controller(FlushConfig {
            trigger_threshold_entries: 100,
            segment_size: 60,
            max_wall_clock: Duration::from_secs(60),
        });
        fill(&store, "GetArticulosWS", "products", 2_500);
        fill(&store, "GetStockArticulosWS", "stock", 40);

        let report = controller
            .flush(FlushScope::Pattern("GetArticulosWS-*".into()))
            .unwrap();
        assert_eq!(report.cleared, 2_500);
        assert!(report.completed);
        assert_eq!(report.segments, 42);
        assert_eq!(store.len(), 40);
        assert_eq!(store.current_size(), 400);
    }

    #[test]
    fn test_pattern_flush_resumes_after_timeout() {
        let (controller, store, _) = controller(FlushConfig {
            trigger_threshold_entries: 100,
            segment_size: 50,
            max_wall_clock: Duration::ZERO,
        });
        fill(&store, "price", "prices", 300);
        fill(&store, "cat", "categories", 30);

        let first = controller
            .flush(FlushScope::Pattern("price-*".into()))
            .unwrap();
        assert_eq!(first.cleared, 50);
        assert!(!first.completed);
        assert_eq!(first.remaining, 250);

        // Entries added between invocations are picked up by the next listing
        fill(&store, "price-late", "prices", 5);

        let mut total = first.cleared;
        loop {
            let report = controller
                .flush(FlushScope::Pattern("price-*".into()))
                .unwrap();
            total += report.cleared;
            if report.completed {
                break;
            }
        }
        assert_eq!(total, 305);
        assert_eq!(store.len(), 30);
        assert_eq!(store.current_size(), store.recount_size());
    }

    #[test]
    fn test_flush_refused_while_scope_held() {
        let (controller, store, locks) = controller(FlushConfig::default());
        fill(&store, "k", "g", 5);

        let _migration = locks.try_acquire(FlushScope::All).unwrap();
        assert_matches!(
            controller.flush(FlushScope::Group("g".into())),
            Err(Error::ScopeBusy { .. })
        );
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let (controller, _, locks) = controller(FlushConfig::default());
        assert_matches!(
            controller.flush(FlushScope::Pattern("a[b-a]".into())),
            Err(Error::InvalidPattern { .. })
        );
        assert_eq!(locks.held(), 0);
    }
}
