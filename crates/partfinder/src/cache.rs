//! TTL-bounded cache of per-root directory indexes.
//!
//! Each root maps to one [`CacheRecord`]: the scanned child directories plus
//! a normalized-name index over them. Records are immutable once installed
//! and shared as `Arc`s, so readers never observe a half-built index. A rescan
//! replaces the whole record.
//!
//! Expiry is lazy. Age is checked on every read and a stale record is evicted
//! by the read that discovers it; nothing sweeps in the background unless the
//! owner calls [`DirectoryCache::purge_expired`].

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fnv::FnvHashMap;
use parking_lot::RwLock;

use crate::metrics::{MetricsSink, NoopMetrics};
use crate::normalize::normalize;

/// A child directory found by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Name as it appears on disk.
    pub name: String,
    pub path: PathBuf,
}

impl DirectoryEntry {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Normalized key -> entry position, built in one pass over the entries.
///
/// On key collision the first entry keeps the slot.
#[derive(Debug, Default)]
pub struct DirectoryIndex {
    by_key: FnvHashMap<String, usize>,
    /// Keys in insertion order; drives the substring fallback.
    ordered: Vec<(String, usize)>,
}

impl DirectoryIndex {
    pub fn build(entries: &[DirectoryEntry]) -> Self {
        let mut index = Self::default();
        for (position, entry) in entries.iter().enumerate() {
            let key = normalize(&entry.name);
            if index.by_key.contains_key(&key) {
                continue;
            }
            index.by_key.insert(key.clone(), position);
            index.ordered.push((key, position));
        }
        index
    }

    /// Exact key lookup, then the first key containing `key` as a substring.
    ///
    /// An empty key is contained in every key, so it resolves to the first
    /// indexed entry.
    pub fn find(&self, key: &str) -> Option<usize> {
        if let Some(position) = self.by_key.get(key) {
            return Some(*position);
        }
        self.ordered
            .iter()
            .find(|(candidate, _)| candidate.contains(key))
            .map(|(_, position)| *position)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// One installed scan of a root.
#[derive(Debug)]
pub struct CacheRecord {
    pub entries: Vec<DirectoryEntry>,
    pub index: DirectoryIndex,
    pub created_at: Instant,
    pub count: usize,
}

impl CacheRecord {
    fn new(entries: Vec<DirectoryEntry>) -> Self {
        let index = DirectoryIndex::build(&entries);
        Self {
            count: entries.len(),
            entries,
            index,
            created_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn is_stale(&self, ttl: Duration) -> bool {
        self.age() > ttl
    }

    /// Resolves a raw term against this record.
    pub fn search(&self, term: &str) -> Option<&DirectoryEntry> {
        let key = normalize(term);
        self.index
            .find(&key)
            .and_then(|position| self.entries.get(position))
    }
}

/// Thread-safe store of [`CacheRecord`]s keyed by root path.
pub struct DirectoryCache {
    ttl: Duration,
    records: RwLock<FnvHashMap<String, Arc<CacheRecord>>>,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for DirectoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryCache")
            .field("ttl", &self.ttl)
            .field("records", &self.records.read().len())
            .finish()
    }
}

impl DirectoryCache {
    /// Creates a cache whose records expire `ttl_secs` after installation.
    pub fn new(ttl_secs: u64, metrics: Arc<dyn MetricsSink>) -> Self {
        Self::with_ttl(Duration::from_secs(ttl_secs), metrics)
    }

    pub fn with_ttl(ttl: Duration, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            ttl,
            records: RwLock::new(FnvHashMap::default()),
            metrics,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the live record for `root`, evicting it if it has gone stale.
    pub fn get(&self, root: &str) -> Option<Arc<CacheRecord>> {
        let record = self.records.read().get(root).cloned();

        let Some(record) = record else {
            self.metrics.record_cache_event(false, root);
            return None;
        };

        if record.is_stale(self.ttl) {
            let mut records = self.records.write();
            // Only evict the record we judged stale; a concurrent `set` wins.
            if records
                .get(root)
                .is_some_and(|current| Arc::ptr_eq(current, &record))
            {
                records.remove(root);
            }
            drop(records);
            log::debug!(
                "cache record expired root={} age_ms={}",
                root,
                record.age().as_millis()
            );
            self.metrics.record_cache_event(false, root);
            return None;
        }

        self.metrics.record_cache_event(true, root);
        Some(record)
    }

    /// Installs a fresh record for `root`, replacing any previous one.
    pub fn set(&self, root: &str, entries: Vec<DirectoryEntry>) {
        let record = Arc::new(CacheRecord::new(entries));
        log::debug!(
            "cache record installed root={} entries={} keys={}",
            root,
            record.count,
            record.index.len()
        );
        self.records.write().insert(root.to_string(), record);
    }

    /// Looks `term` up in the cached record for `root`.
    ///
    /// Returns `None` when there is no live record; the cache never scans, so
    /// the caller must scan, `set` and retry.
    pub fn search(&self, root: &str, term: &str) -> Option<DirectoryEntry> {
        let record = self.get(root)?;
        record.search(term).cloned()
    }

    /// Removes the record for `root`, or every record when `root` is `None`.
    pub fn invalidate(&self, root: Option<&str>) {
        let mut records = self.records.write();
        match root {
            Some(root) => {
                records.remove(root);
            }
            None => records.clear(),
        }
    }

    /// Evicts every stale record and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, record| !record.is_stale(self.ttl));
        before - records.len()
    }

    /// Number of installed records, stale ones included.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for DirectoryCache {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_CACHE_TTL_SECS, Arc::new(NoopMetrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn entry(name: &str) -> DirectoryEntry {
        DirectoryEntry::new(name, format!("/inventory/{name}"))
    }

    fn cache(ttl: Duration) -> DirectoryCache {
        DirectoryCache::with_ttl(ttl, Arc::new(NoopMetrics))
    }

    #[derive(Default)]
    struct CountingMetrics {
        hits: AtomicUsize,
        misses: AtomicUsize,
    }

    impl MetricsSink for CountingMetrics {
        fn record_cache_event(&self, hit: bool, _root: &str) {
            if hit {
                self.hits.fetch_add(1, Ordering::Relaxed);
            } else {
                self.misses.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    #[test]
    fn empty_record_matches_nothing() {
        let cache = DirectoryCache::default();
        cache.set("/p", Vec::new());
        assert!(cache.get("/p").is_some());
        assert_eq!(cache.search("/p", "x"), None);
    }

    #[test]
    fn exact_match_is_case_insensitive() {
        let cache = DirectoryCache::default();
        cache.set("/p", vec![entry("A"), entry("B")]);
        assert_eq!(cache.search("/p", "a"), Some(entry("A")));
        assert_eq!(cache.search("/p", "b"), Some(entry("B")));
    }

    #[test]
    fn partial_match_falls_back_to_substring() {
        let cache = DirectoryCache::default();
        cache.set("/p", vec![entry("MOTOR-ABC-123"), entry("PUMP-XYZ-9")]);
        assert_eq!(cache.search("/p", "abc"), Some(entry("MOTOR-ABC-123")));
        assert_eq!(cache.search("/p", "xyz 9"), Some(entry("PUMP-XYZ-9")));
        assert_eq!(cache.search("/p", "valve"), None);
    }

    #[test]
    fn accents_and_symbols_do_not_block_matches() {
        let cache = DirectoryCache::default();
        cache.set("/p", vec![entry("Válvula São Paulo"), entry("Resistor 100Ω")]);
        assert_eq!(
            cache.search("/p", "VALVULA sao"),
            Some(entry("Válvula São Paulo"))
        );
        assert_eq!(cache.search("/p", "100 ohm"), Some(entry("Resistor 100Ω")));
    }

    #[test]
    fn first_entry_wins_on_collision() {
        let cache = DirectoryCache::default();
        let first = DirectoryEntry::new("Café", "/first");
        let second = DirectoryEntry::new("CAFE", "/second");
        cache.set("/p", vec![first.clone(), second]);
        assert_eq!(cache.search("/p", "cafe"), Some(first));
        let record = cache.get("/p").unwrap();
        assert_eq!(record.count, 2);
        assert_eq!(record.index.len(), 1);
    }

    #[test]
    fn symbol_only_term_matches_first_entry() {
        let cache = DirectoryCache::default();
        cache.set("/p", vec![entry("MOTOR-ABC-123"), entry("PUMP-9")]);
        assert_eq!(cache.search("/p", "@#$"), Some(entry("MOTOR-ABC-123")));
        assert_eq!(cache.search("/p", ""), Some(entry("MOTOR-ABC-123")));

        cache.set("/empty", Vec::new());
        assert_eq!(cache.search("/empty", "@#$"), None);
    }

    #[test]
    fn search_without_record_is_absent() {
        let cache = DirectoryCache::default();
        assert_eq!(cache.search("/unknown", "a"), None);
    }

    #[test]
    fn set_replaces_whole_record() {
        let cache = DirectoryCache::default();
        cache.set("/p", vec![entry("OLD")]);
        cache.set("/p", vec![entry("NEW")]);
        assert_eq!(cache.search("/p", "old"), None);
        assert_eq!(cache.search("/p", "new"), Some(entry("NEW")));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn record_expires_after_ttl() {
        let cache = DirectoryCache::new(1, Arc::new(NoopMetrics));
        assert_eq!(cache.ttl(), Duration::from_secs(1));
        cache.set("/p", vec![entry("A")]);
        assert!(cache.get("/p").is_some());

        thread::sleep(Duration::from_millis(1100));

        assert!(cache.get("/p").is_none());
        assert!(cache.is_empty(), "stale record should be evicted on read");
    }

    #[test]
    fn reports_hits_and_misses() {
        let metrics = Arc::new(CountingMetrics::default());
        let cache = DirectoryCache::with_ttl(Duration::from_secs(60), metrics.clone());
        cache.get("/p");
        cache.set("/p", vec![entry("A")]);
        cache.get("/p");
        cache.search("/p", "a");

        assert_eq!(metrics.hits.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.misses.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn invalidate_one_or_all() {
        let cache = DirectoryCache::default();
        cache.set("/a", vec![entry("A")]);
        cache.set("/b", vec![entry("B")]);

        cache.invalidate(Some("/a"));
        assert!(cache.get("/a").is_none());
        assert!(cache.get("/b").is_some());

        cache.invalidate(None);
        assert!(cache.is_empty());
    }

    #[test]
    fn purge_removes_only_stale_records() {
        let cache = cache(Duration::from_millis(50));
        cache.set("/old", vec![entry("A")]);
        thread::sleep(Duration::from_millis(80));
        cache.set("/fresh", vec![entry("B")]);

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("/fresh").is_some());
    }

    #[test]
    fn concurrent_searches_see_consistent_records() {
        const THREADS: usize = 8;
        const QUERIES: usize = 200;

        let cache = Arc::new(cache(Duration::from_secs(60)));
        let entries: Vec<_> = (0..THREADS)
            .map(|i| entry(&format!("PART-{i:03}-X")))
            .collect();
        cache.set("/p", entries);

        let successes = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let cache = cache.clone();
                let successes = successes.clone();
                thread::spawn(move || {
                    let expected = format!("PART-{i:03}-X");
                    for _ in 0..QUERIES {
                        let found = cache.search("/p", &format!("part {i:03}"));
                        if found.map(|e| e.name) == Some(expected.clone()) {
                            successes.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(successes.load(Ordering::Relaxed), THREADS * QUERIES);
    }

    #[test]
    fn concurrent_writers_leave_one_whole_record() {
        let cache = Arc::new(cache(Duration::from_secs(60)));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for round in 0..50 {
                        let entries = vec![entry(&format!("W{i}-{round}")), entry("SHARED")];
                        cache.set("/p", entries);
                        let _ = cache.search("/p", "shared");
                        if round % 10 == 0 {
                            cache.invalidate(Some("/p"));
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        cache.set("/p", vec![entry("FINAL"), entry("SHARED")]);
        let record = cache.get("/p").unwrap();
        assert_eq!(record.count, 2);
        assert_eq!(cache.search("/p", "final"), Some(entry("FINAL")));
    }
}
