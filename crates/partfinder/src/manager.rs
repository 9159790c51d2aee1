//! SearchManager - lifecycle API for one-at-a-time searches.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::UnboundedSender;

use crate::cache::DirectoryCache;
use crate::cancel::CancellationToken;
use crate::config::FinderConfig;
use crate::error::{FinderError, Result};
use crate::events::{event_channel, EventEmitter, EventSink, SearchEvent, SearchEvents};
use crate::metrics::{MetricsSink, SessionId};
use crate::search::{SearchOrchestrator, SearchRequest};
use crate::thumbnail::{ImageThumbnailer, ThumbnailDecoder};

/// How long `shutdown` and `Drop` wait for an active search to stop.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

const JOIN_POLL: Duration = Duration::from_millis(10);

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    Idle = 0,
    Running = 1,
    Cancelling = 2,
    Cancelled = 3,
    Finished = 4,
    Error = 5,
}

impl SearchStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Cancelling,
            3 => Self::Cancelled,
            4 => Self::Finished,
            5 => Self::Error,
            _ => Self::Idle,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Finished => "finished",
            Self::Error => "error",
        }
    }

    /// True while a coordination thread owns the manager.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Cancelling)
    }
}

/// Publishes the final status before forwarding the terminal event, so a
/// consumer that has seen the terminal event can start again immediately.
struct StatusSink {
    sender: UnboundedSender<SearchEvent>,
    status: Arc<AtomicU8>,
}

impl EventSink for StatusSink {
    fn emit(&self, event: SearchEvent) {
        if event.is_terminal() {
            let status = match event {
                SearchEvent::Cancelled => SearchStatus::Cancelled,
                SearchEvent::PathError { .. } | SearchEvent::Error { .. } => SearchStatus::Error,
                _ => SearchStatus::Finished,
            };
            self.status.store(status as u8, Ordering::SeqCst);
        }
        self.sender.emit(event);
    }
}

struct ActiveSearch {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs at most one search at a time on a background coordination thread.
pub struct SearchManager {
    session_id: SessionId,
    orchestrator: Arc<SearchOrchestrator>,
    config: RwLock<FinderConfig>,
    status: Arc<AtomicU8>,
    active: Mutex<Option<ActiveSearch>>,
}

impl std::fmt::Debug for SearchManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchManager")
            .field("session_id", &self.session_id)
            .field("status", &self.status())
            .field("config", &*self.config.read())
            .finish()
    }
}

impl SearchManager {
    /// Creates a manager decoding thumbnails with [`ImageThumbnailer`].
    pub fn new(
        config: FinderConfig,
        session_id: SessionId,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        Self::with_decoder(config, session_id, metrics, Arc::new(ImageThumbnailer))
    }

    /// Creates a manager with a custom decode collaborator.
    ///
    /// The cache TTL is taken from `config` here and never changes afterwards.
    pub fn with_decoder(
        config: FinderConfig,
        session_id: SessionId,
        metrics: Arc<dyn MetricsSink>,
        decoder: Arc<dyn ThumbnailDecoder>,
    ) -> Result<Self> {
        config.validate()?;
        let cache = Arc::new(DirectoryCache::new(config.cache_ttl_secs, metrics.clone()));
        log::info!(
            "search manager ready session={} cache_ttl_secs={} parallel={} max_workers={:?}",
            session_id,
            config.cache_ttl_secs,
            config.parallel_loading,
            config.max_workers
        );
        Ok(Self {
            session_id,
            orchestrator: Arc::new(SearchOrchestrator::new(cache, decoder, metrics)),
            config: RwLock::new(config),
            status: Arc::new(AtomicU8::new(SearchStatus::Idle as u8)),
            active: Mutex::new(None),
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn status(&self) -> SearchStatus {
        SearchStatus::from_u8(self.status.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.status().is_active()
    }

    /// Starts a search for `term` under `root` and returns its event stream.
    ///
    /// Returns [`FinderError::Busy`] without side effects while another search
    /// is running.
    pub fn start(&self, root: impl Into<PathBuf>, term: impl Into<String>) -> Result<SearchEvents> {
        let mut active = self.active.lock();
        if self.is_running() {
            log::debug!(
                "search rejected session={} status={}",
                self.session_id,
                self.status().as_str()
            );
            return Err(FinderError::Busy);
        }

        if let Some(previous) = active.take() {
            if previous.handle.is_finished() {
                let _ = previous.handle.join();
            }
        }

        let request = SearchRequest::new(root, term);
        let config = self.config.read().clone();
        let cancel = CancellationToken::new();
        let (sender, events) = event_channel();

        self.status.store(SearchStatus::Running as u8, Ordering::SeqCst);

        let sink = StatusSink {
            sender,
            status: self.status.clone(),
        };
        let orchestrator = self.orchestrator.clone();
        let thread_cancel = cancel.clone();
        let session_id = self.session_id.clone();
        let spawned = thread::Builder::new()
            .name("partfinder-search".to_string())
            .spawn(move || {
                let emitter = EventEmitter::new(&sink);
                let run = panic::catch_unwind(AssertUnwindSafe(|| {
                    orchestrator.run(&request, &config, &thread_cancel, &emitter)
                }));
                if let Err(payload) = run {
                    let message = panic_message(payload.as_ref());
                    log::error!("search panicked session={} error={}", session_id, message);
                    emitter.emit(SearchEvent::Error {
                        message: format!("search panicked: {message}"),
                    });
                }
                if !emitter.is_terminated() {
                    emitter.emit(SearchEvent::Error {
                        message: "search ended without a result".to_string(),
                    });
                }
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(error) => {
                self.status.store(SearchStatus::Error as u8, Ordering::SeqCst);
                return Err(FinderError::Pool(format!(
                    "failed to spawn search thread: {error}"
                )));
            }
        };

        *active = Some(ActiveSearch { cancel, handle });
        Ok(events)
    }

    /// Requests cancellation of the active search and waits up to `timeout`
    /// for its coordination thread to stop.
    ///
    /// Returns true if nothing is running anymore. False means the request is
    /// recorded but workers are still draining; the stream will still end
    /// with `Cancelled`.
    pub fn cancel(&self, timeout: Duration) -> bool {
        let active = self.active.lock();
        let Some(search) = active.as_ref() else {
            return true;
        };

        let _ = self.status.compare_exchange(
            SearchStatus::Running as u8,
            SearchStatus::Cancelling as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
        search.cancel.cancel();
        log::info!("search cancel requested session={}", self.session_id);

        let deadline = Instant::now() + timeout;
        loop {
            if search.handle.is_finished() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                log::warn!(
                    "search did not stop in time session={} timeout_ms={}",
                    self.session_id,
                    timeout.as_millis()
                );
                return false;
            }
            thread::sleep(JOIN_POLL.min(deadline - now));
        }
    }

    /// Cancels any active search, waiting at most [`SHUTDOWN_TIMEOUT`].
    pub fn shutdown(&self) {
        if !self.cancel(SHUTDOWN_TIMEOUT) {
            log::warn!(
                "search manager shut down with a search still draining session={}",
                self.session_id
            );
        }
        if let Some(search) = self.active.lock().take() {
            if search.handle.is_finished() {
                let _ = search.handle.join();
            }
        }
    }

    pub fn config(&self) -> FinderConfig {
        self.config.read().clone()
    }

    /// Replaces the configuration used by subsequent searches.
    ///
    /// A running search keeps the snapshot it started with. `cache_ttl_secs`
    /// only applies to managers created afterwards.
    pub fn update_config(&self, config: FinderConfig) -> Result<()> {
        config.validate()?;
        *self.config.write() = config;
        Ok(())
    }

    pub fn cache(&self) -> &Arc<DirectoryCache> {
        self.orchestrator.cache()
    }

    /// Drops the cached scan of `root`, or every scan when `root` is `None`.
    pub fn invalidate_cache(&self, root: Option<&Path>) {
        match root {
            Some(root) => {
                let key = std::fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
                self.cache().invalidate(Some(&key.to_string_lossy()));
            }
            None => self.cache().invalidate(None),
        }
    }
}

impl Drop for SearchManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::LoadResult;
    use crate::metrics::NoopMetrics;
    use crate::thumbnail::{BoundingBox, Thumbnail};
    use std::fs::{self, File};
    use tempfile::TempDir;

    const COLLECT_TIMEOUT: Duration = Duration::from_secs(10);

    struct SlowDecoder(Duration);

    impl ThumbnailDecoder for SlowDecoder {
        fn decode(&self, _path: &Path, bounds: BoundingBox) -> Result<Thumbnail> {
            thread::sleep(self.0);
            Ok(Thumbnail {
                width: bounds.width,
                height: bounds.height,
                pixels: Arc::from(vec![0u8; 4]),
            })
        }
    }

    struct PanickingDecoder;

    impl ThumbnailDecoder for PanickingDecoder {
        fn decode(&self, _path: &Path, _bounds: BoundingBox) -> Result<Thumbnail> {
            panic!("decoder exploded");
        }
    }

    fn manager() -> SearchManager {
        SearchManager::new(
            FinderConfig::default(),
            SessionId::generate(),
            Arc::new(NoopMetrics),
        )
        .unwrap()
    }

    fn slow_manager(delay: Duration, workers: usize) -> SearchManager {
        let config = FinderConfig {
            max_workers: Some(workers),
            ..FinderConfig::default()
        };
        SearchManager::with_decoder(
            config,
            SessionId::generate(),
            Arc::new(NoopMetrics),
            Arc::new(SlowDecoder(delay)),
        )
        .unwrap()
    }

    fn folder_with_files(count: usize) -> TempDir {
        let temp = TempDir::new().unwrap();
        let folder = temp.path().join("PUMP-9");
        fs::create_dir(&folder).unwrap();
        for i in 0..count {
            File::create(folder.join(format!("{i:03}.png"))).unwrap();
        }
        temp
    }

    fn kinds(events: &[SearchEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.kind()).collect()
    }

    #[test]
    fn end_to_end_with_real_images() {
        let temp = TempDir::new().unwrap();
        let motor = temp.path().join("MOTOR-ABC-123");
        fs::create_dir(&motor).unwrap();
        image::RgbImage::new(600, 300).save(motor.join("front.png")).unwrap();
        image::RgbImage::new(300, 600).save(motor.join("side.png")).unwrap();
        fs::write(motor.join("readme.txt"), b"not an asset").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(motor.join("missing.png"), motor.join("dangling.png")).unwrap();
        fs::create_dir(temp.path().join("PUMP-XYZ")).unwrap();

        let manager = manager();
        let mut events = manager.start(temp.path(), "abc").unwrap();
        let collected = events.collect_until_terminal(COLLECT_TIMEOUT);

        assert_eq!(kinds(&collected), vec!["found", "progress", "progress", "done"]);
        assert!(matches!(
            &collected[0],
            SearchEvent::Found { matched_name, asset_count: 2 } if matched_name == "MOTOR-ABC-123"
        ));
        for event in &collected[1..3] {
            match event {
                SearchEvent::Progress {
                    result: LoadResult::Loaded(asset),
                    ..
                } => {
                    let thumb = &asset.thumbnail;
                    assert_eq!(thumb.width.max(thumb.height), 250);
                    assert_eq!(thumb.width.min(thumb.height), 125);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert!(matches!(
            &collected[3],
            SearchEvent::Done(stats) if stats.loaded == 2 && stats.failed == 0
        ));
        assert_eq!(manager.status(), SearchStatus::Finished);
    }

    #[test]
    fn second_start_while_running_is_busy() {
        let temp = folder_with_files(20);
        let manager = slow_manager(Duration::from_millis(100), 1);

        let mut events = manager.start(temp.path(), "pump").unwrap();
        assert!(manager.is_running());
        assert!(matches!(
            manager.start(temp.path(), "pump"),
            Err(FinderError::Busy)
        ));

        assert!(manager.cancel(COLLECT_TIMEOUT));
        let collected = events.collect_until_terminal(COLLECT_TIMEOUT);
        assert!(matches!(collected.last(), Some(SearchEvent::Cancelled)));
        assert!(collected.iter().filter(|e| e.kind() == "progress").count() < 20);
        assert_eq!(manager.status(), SearchStatus::Cancelled);
    }

    #[test]
    fn can_start_again_after_terminal_event() {
        let temp = folder_with_files(2);
        let manager = slow_manager(Duration::ZERO, 2);

        let mut first = manager.start(temp.path(), "pump").unwrap();
        first.collect_until_terminal(COLLECT_TIMEOUT);

        let mut second = manager.start(temp.path(), "pump 9").unwrap();
        let collected = second.collect_until_terminal(COLLECT_TIMEOUT);
        assert_eq!(kinds(&collected), vec!["found", "progress", "progress", "done"]);
    }

    #[test]
    fn session_id_is_threaded_through() {
        let session_id = SessionId::generate();
        let manager =
            SearchManager::new(FinderConfig::default(), session_id.clone(), Arc::new(NoopMetrics))
                .unwrap();
        assert_eq!(manager.session_id(), &session_id);
    }

    #[test]
    fn cancel_without_search_is_a_no_op() {
        let manager = manager();
        assert!(manager.cancel(Duration::from_millis(10)));
        assert_eq!(manager.status(), SearchStatus::Idle);
    }

    #[test]
    fn path_error_sets_error_status() {
        let temp = TempDir::new().unwrap();
        let manager = manager();
        let mut events = manager.start(temp.path().join("missing"), "abc").unwrap();
        let collected = events.collect_until_terminal(COLLECT_TIMEOUT);
        assert_eq!(kinds(&collected), vec!["path-error"]);
        assert_eq!(manager.status(), SearchStatus::Error);
    }

    #[test]
    fn not_found_and_no_assets_finish_normally() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("EMPTY-1")).unwrap();
        let manager = manager();

        let mut events = manager.start(temp.path(), "nothing").unwrap();
        assert_eq!(kinds(&events.collect_until_terminal(COLLECT_TIMEOUT)), vec!["not-found"]);
        assert_eq!(manager.status(), SearchStatus::Finished);

        let mut events = manager.start(temp.path(), "empty").unwrap();
        assert_eq!(kinds(&events.collect_until_terminal(COLLECT_TIMEOUT)), vec!["no-assets"]);
    }

    #[test]
    fn decoder_panics_are_per_asset_failures() {
        let temp = folder_with_files(3);
        let manager = SearchManager::with_decoder(
            FinderConfig::default(),
            SessionId::generate(),
            Arc::new(NoopMetrics),
            Arc::new(PanickingDecoder),
        )
        .unwrap();

        let mut events = manager.start(temp.path(), "pump").unwrap();
        let collected = events.collect_until_terminal(COLLECT_TIMEOUT);
        assert!(matches!(
            collected.last(),
            Some(SearchEvent::Done(stats)) if stats.failed == 3 && stats.loaded == 0
        ));
    }

    #[test]
    fn update_config_validates_and_applies_to_next_search() {
        let temp = folder_with_files(1);
        let manager = slow_manager(Duration::ZERO, 1);

        let invalid = FinderConfig {
            thumbnail_size: 0,
            ..FinderConfig::default()
        };
        assert!(manager.update_config(invalid).is_err());

        let smaller = FinderConfig {
            thumbnail_size: 32,
            ..FinderConfig::default()
        };
        manager.update_config(smaller.clone()).unwrap();
        assert_eq!(manager.config(), smaller);

        let mut events = manager.start(temp.path(), "pump").unwrap();
        let collected = events.collect_until_terminal(COLLECT_TIMEOUT);
        assert!(matches!(
            &collected[1],
            SearchEvent::Progress {
                result: LoadResult::Loaded(asset),
                ..
            } if asset.thumbnail.width == 32
        ));
    }

    #[test]
    fn invalidate_cache_drops_the_root_record() {
        let temp = folder_with_files(1);
        let manager = slow_manager(Duration::ZERO, 1);
        manager
            .start(temp.path(), "pump")
            .unwrap()
            .collect_until_terminal(COLLECT_TIMEOUT);
        assert_eq!(manager.cache().len(), 1);

        manager.invalidate_cache(Some(temp.path()));
        assert!(manager.cache().is_empty());
    }

    #[test]
    fn rejects_invalid_initial_config() {
        let config = FinderConfig {
            max_workers: Some(0),
            ..FinderConfig::default()
        };
        let error =
            SearchManager::new(config, SessionId::generate(), Arc::new(NoopMetrics)).unwrap_err();
        assert!(matches!(error, FinderError::Config(_)));
    }

    #[test]
    fn drop_cancels_running_search() {
        let temp = folder_with_files(50);
        let manager = slow_manager(Duration::from_millis(50), 1);
        let mut events = manager.start(temp.path(), "pump").unwrap();

        let started = Instant::now();
        drop(manager);
        assert!(started.elapsed() < SHUTDOWN_TIMEOUT + Duration::from_secs(1));

        let collected = events.collect_until_terminal(COLLECT_TIMEOUT);
        assert!(matches!(collected.last(), Some(SearchEvent::Cancelled)));
    }
}
