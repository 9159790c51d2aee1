//! Metrics and logging collaborator.
//!
//! Components receive an `Arc<dyn MetricsSink>` at construction. Every method
//! has a no-op default, so a missing collaborator changes nothing functional.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::loader::LoadStats;

/// Identifier for one process session, generated once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh 8-character session id.
    pub fn generate() -> Self {
        Self(short_id())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns the first 8 hex characters of a v4 uuid.
pub fn short_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

/// Terminal outcome of one orchestrated search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    PathError,
    NotFound,
    NoAssets,
    Done,
    Cancelled,
    Error,
}

impl SearchOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PathError => "path_error",
            Self::NotFound => "not_found",
            Self::NoAssets => "no_assets",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }
}

/// Summary of one search handed to [`MetricsSink::record_search`].
#[derive(Debug, Clone)]
pub struct SearchReport {
    pub trace_id: String,
    pub term: String,
    pub outcome: SearchOutcome,
    pub duration: Duration,
}

/// Receives cache, search and batch events. Must be callable from any thread.
pub trait MetricsSink: Send + Sync {
    fn record_cache_event(&self, _hit: bool, _root: &str) {}

    fn record_scan(&self, _root: &str, _directories: usize, _duration: Duration) {}

    fn record_search(&self, _report: &SearchReport) {}

    fn record_batch(&self, _stats: &LoadStats) {}

    fn record_asset_failure(&self, _path: &Path, _reason: &str) {}
}

/// Collaborator that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

/// Session-scoped metrics: logs every event and keeps running counters.
#[derive(Debug)]
pub struct SessionMetrics {
    session_id: SessionId,
    searches: AtomicU64,
    found: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    batches: AtomicU64,
    errors: AtomicU64,
    warnings: AtomicU64,
    search_times_ms: Mutex<Vec<f64>>,
    speedups: Mutex<Vec<f64>>,
}

/// Point-in-time view of a [`SessionMetrics`].
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSummary {
    pub session_id: String,
    pub total_searches: u64,
    pub found_searches: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_rate: f64,
    pub batches: u64,
    /// Searches that ended in `path-error` or `error`.
    pub total_errors: u64,
    /// Assets that failed to load.
    pub total_warnings: u64,
    pub min_search_ms: Option<f64>,
    pub avg_search_ms: Option<f64>,
    pub max_search_ms: Option<f64>,
    pub avg_speedup: Option<f64>,
    pub max_speedup: Option<f64>,
}

impl SessionMetrics {
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            searches: AtomicU64::new(0),
            found: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            batches: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            warnings: AtomicU64::new(0),
            search_times_ms: Mutex::new(Vec::new()),
            speedups: Mutex::new(Vec::new()),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn summary(&self) -> MetricsSummary {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let (min_search_ms, avg_search_ms, max_search_ms) = spread(&self.search_times_ms.lock());
        let (_, avg_speedup, max_speedup) = spread(&self.speedups.lock());

        MetricsSummary {
            session_id: self.session_id.to_string(),
            total_searches: self.searches.load(Ordering::Relaxed),
            found_searches: self.found.load(Ordering::Relaxed),
            cache_hits: hits,
            cache_misses: misses,
            cache_hit_rate: hits as f64 / (hits + misses).max(1) as f64,
            batches: self.batches.load(Ordering::Relaxed),
            total_errors: self.errors.load(Ordering::Relaxed),
            total_warnings: self.warnings.load(Ordering::Relaxed),
            min_search_ms,
            avg_search_ms,
            max_search_ms,
            avg_speedup,
            max_speedup,
        }
    }

    pub fn log_summary(&self) {
        let summary = self.summary();
        log::info!(
            "session summary session={} searches={} found={} cache_hits={} cache_misses={} hit_rate={:.2} batches={} errors={} warnings={} avg_search_ms={:?} avg_speedup={:?}",
            summary.session_id,
            summary.total_searches,
            summary.found_searches,
            summary.cache_hits,
            summary.cache_misses,
            summary.cache_hit_rate,
            summary.batches,
            summary.total_errors,
            summary.total_warnings,
            summary.avg_search_ms,
            summary.avg_speedup,
        );
    }
}

impl MetricsSink for SessionMetrics {
    fn record_cache_event(&self, hit: bool, root: &str) {
        let counter = if hit {
            &self.cache_hits
        } else {
            &self.cache_misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "cache {} session={} root={}",
            if hit { "hit" } else { "miss" },
            self.session_id,
            root
        );
    }

    fn record_scan(&self, root: &str, directories: usize, duration: Duration) {
        log::info!(
            "directory scan session={} root={} directories={} scan_ms={:.2}",
            self.session_id,
            root,
            directories,
            duration.as_secs_f64() * 1000.0
        );
    }

    fn record_search(&self, report: &SearchReport) {
        self.searches.fetch_add(1, Ordering::Relaxed);
        match report.outcome {
            SearchOutcome::Done => {
                self.found.fetch_add(1, Ordering::Relaxed);
            }
            SearchOutcome::Error | SearchOutcome::PathError => {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
        let duration_ms = report.duration.as_secs_f64() * 1000.0;
        self.search_times_ms.lock().push(duration_ms);
        log::info!(
            "search finished session={} trace={} term={:?} outcome={} duration_ms={:.2}",
            self.session_id,
            report.trace_id,
            report.term,
            report.outcome.as_str(),
            duration_ms
        );
    }

    fn record_batch(&self, stats: &LoadStats) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.speedups.lock().push(stats.speedup_estimate);
        log::info!(
            "asset batch session={} loaded={} failed={} total={} workers={} duration_ms={:.2} speedup~{:.2} throughput~{:.2}/s",
            self.session_id,
            stats.loaded,
            stats.failed,
            stats.total,
            stats.workers,
            stats.duration.as_secs_f64() * 1000.0,
            stats.speedup_estimate,
            stats.throughput
        );
    }

    fn record_asset_failure(&self, path: &Path, reason: &str) {
        self.warnings.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "asset failure session={} path={} reason={}",
            self.session_id,
            path.display(),
            reason
        );
    }
}

fn spread(values: &[f64]) -> (Option<f64>, Option<f64>, Option<f64>) {
    if values.is_empty() {
        return (None, None, None);
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let avg = values.iter().sum::<f64>() / values.len() as f64;
    (Some(min), Some(avg), Some(max))
}
