//! Search orchestration: resolve root, match folder, list assets, load.
//!
//! One [`SearchOrchestrator::run`] call walks the phases in [`SearchPhase`]
//! order and ends the event stream with exactly one terminal event. The
//! cancellation token is checked at every phase boundary and throughout
//! loading.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::cache::{DirectoryCache, DirectoryEntry};
use crate::cancel::CancellationToken;
use crate::config::FinderConfig;
use crate::error::{resolve_readable_dir, FinderError};
use crate::events::{EventEmitter, SearchEvent};
use crate::fswalk::{list_assets, scan_directories};
use crate::loader::{AssetLoader, LoadJob, LoadOutcome};
use crate::metrics::{short_id, MetricsSink, NoopMetrics, SearchOutcome, SearchReport};
use crate::thumbnail::{BoundingBox, ImageThumbnailer, ThumbnailDecoder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub root: PathBuf,
    /// Raw user input; normalized before matching.
    pub term: String,
}

impl SearchRequest {
    pub fn new(root: impl Into<PathBuf>, term: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            term: term.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPhase {
    Start,
    ResolvingPath,
    ResolvingMatch,
    ListingAssets,
    Loading,
    Finished,
}

impl SearchPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::ResolvingPath => "resolving_path",
            Self::ResolvingMatch => "resolving_match",
            Self::ListingAssets => "listing_assets",
            Self::Loading => "loading",
            Self::Finished => "finished",
        }
    }
}

/// Transient per-invocation state, dropped with the terminal event.
#[derive(Debug)]
struct SearchState {
    trace_id: String,
    phase: SearchPhase,
    started: Instant,
}

impl SearchState {
    fn new() -> Self {
        Self {
            trace_id: short_id(),
            phase: SearchPhase::Start,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: SearchPhase) {
        log::debug!(
            "search phase trace={} from={} to={} elapsed_ms={}",
            self.trace_id,
            self.phase.as_str(),
            next.as_str(),
            self.started.elapsed().as_millis()
        );
        self.phase = next;
    }
}

/// Composes cache, filesystem listing and asset loading into one search.
///
/// The cache is shared across searches; everything else is per invocation.
pub struct SearchOrchestrator {
    cache: Arc<DirectoryCache>,
    decoder: Arc<dyn ThumbnailDecoder>,
    metrics: Arc<dyn MetricsSink>,
}

impl std::fmt::Debug for SearchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchOrchestrator")
            .field("cache", &self.cache)
            .finish()
    }
}

impl Default for SearchOrchestrator {
    fn default() -> Self {
        Self::new(
            Arc::new(DirectoryCache::default()),
            Arc::new(ImageThumbnailer),
            Arc::new(NoopMetrics),
        )
    }
}

impl SearchOrchestrator {
    pub fn new(
        cache: Arc<DirectoryCache>,
        decoder: Arc<dyn ThumbnailDecoder>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            cache,
            decoder,
            metrics,
        }
    }

    pub fn cache(&self) -> &Arc<DirectoryCache> {
        &self.cache
    }

    /// Runs one search to completion, emitting its events through `events`.
    ///
    /// Never fails: every failure becomes a terminal event, and the returned
    /// outcome mirrors it.
    pub fn run(
        &self,
        request: &SearchRequest,
        config: &FinderConfig,
        cancel: &CancellationToken,
        events: &EventEmitter<'_>,
    ) -> SearchOutcome {
        let mut state = SearchState::new();
        log::info!(
            "search started trace={} root={} term={:?}",
            state.trace_id,
            request.root.display(),
            request.term
        );

        let outcome = self.run_phases(&mut state, request, config, cancel, events);
        state.advance(SearchPhase::Finished);

        let duration = state.started.elapsed();
        log::info!(
            "search finished trace={} outcome={} duration_ms={}",
            state.trace_id,
            outcome.as_str(),
            duration.as_millis()
        );
        self.metrics.record_search(&SearchReport {
            trace_id: state.trace_id,
            term: request.term.clone(),
            outcome,
            duration,
        });
        outcome
    }

    fn run_phases(
        &self,
        state: &mut SearchState,
        request: &SearchRequest,
        config: &FinderConfig,
        cancel: &CancellationToken,
        events: &EventEmitter<'_>,
    ) -> SearchOutcome {
        if cancel.is_cancelled() {
            return cancelled(events);
        }

        state.advance(SearchPhase::ResolvingPath);
        let root = match resolve_readable_dir(request.root.clone()) {
            Ok(root) => root,
            Err(error) => {
                log::warn!(
                    "search root rejected trace={} root={} error={}",
                    state.trace_id,
                    request.root.display(),
                    error
                );
                events.emit(SearchEvent::PathError {
                    root: request.root.clone(),
                    message: error.to_string(),
                });
                return SearchOutcome::PathError;
            }
        };
        if cancel.is_cancelled() {
            return cancelled(events);
        }

        state.advance(SearchPhase::ResolvingMatch);
        let matched = match self.resolve_match(state, &root, &request.term, cancel) {
            Ok(Some(Some(entry))) => entry,
            Ok(Some(None)) => {
                events.emit(SearchEvent::NotFound {
                    term: request.term.clone(),
                });
                return SearchOutcome::NotFound;
            }
            Ok(None) => return cancelled(events),
            Err(error) => return failed(state, events, error),
        };
        if cancel.is_cancelled() {
            return cancelled(events);
        }

        state.advance(SearchPhase::ListingAssets);
        let assets = match list_assets(&matched.path, cancel) {
            Ok(Some(assets)) => assets,
            Ok(None) => return cancelled(events),
            Err(error) => return failed(state, events, error),
        };
        if assets.is_empty() {
            events.emit(SearchEvent::NoAssets {
                matched_name: matched.name,
            });
            return SearchOutcome::NoAssets;
        }
        if cancel.is_cancelled() {
            return cancelled(events);
        }

        state.advance(SearchPhase::Loading);
        events.emit(SearchEvent::Found {
            matched_name: matched.name.clone(),
            asset_count: assets.len(),
        });

        let jobs: Vec<LoadJob> = assets
            .into_iter()
            .enumerate()
            .map(|(index, path)| LoadJob::new(path, index))
            .collect();
        let loader = AssetLoader::new(
            self.decoder.clone(),
            BoundingBox::square(config.thumbnail_size),
        )
        .with_max_workers(config.max_workers)
        .with_metrics(self.metrics.clone());

        let outcome = if config.parallel_loading {
            loader.load_parallel(jobs, cancel, events)
        } else {
            loader.load_sequential(jobs, cancel, events)
        };

        match outcome {
            LoadOutcome::Completed(_) => SearchOutcome::Done,
            LoadOutcome::Cancelled(_) => SearchOutcome::Cancelled,
            LoadOutcome::Failed(_) => SearchOutcome::Error,
        }
    }

    /// Looks `term` up in the cache, scanning `root` once on a miss.
    ///
    /// `Ok(None)` means cancelled; `Ok(Some(None))` means no match after the
    /// rescan.
    fn resolve_match(
        &self,
        state: &SearchState,
        root: &std::path::Path,
        term: &str,
        cancel: &CancellationToken,
    ) -> crate::error::Result<Option<Option<DirectoryEntry>>> {
        let key = root.to_string_lossy();

        if let Some(entry) = self.cache.search(&key, term) {
            return Ok(Some(Some(entry)));
        }

        let scan_started = Instant::now();
        let Some(directories) = scan_directories(root, cancel)? else {
            return Ok(None);
        };
        let scan_duration = scan_started.elapsed();
        log::debug!(
            "directory scan trace={} root={} directories={} duration_ms={}",
            state.trace_id,
            key,
            directories.len(),
            scan_duration.as_millis()
        );
        self.metrics
            .record_scan(&key, directories.len(), scan_duration);
        if cancel.is_cancelled() {
            return Ok(None);
        }

        self.cache.set(&key, directories);
        Ok(Some(self.cache.search(&key, term)))
    }
}

fn cancelled(events: &EventEmitter<'_>) -> SearchOutcome {
    events.emit(SearchEvent::Cancelled);
    SearchOutcome::Cancelled
}

fn failed(state: &SearchState, events: &EventEmitter<'_>, error: FinderError) -> SearchOutcome {
    log::warn!(
        "search failed trace={} phase={} error={}",
        state.trace_id,
        state.phase.as_str(),
        error
    );
    events.emit(SearchEvent::Error {
        message: error.to_string(),
    });
    SearchOutcome::Error
}
