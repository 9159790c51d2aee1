//! Bounded-concurrency thumbnail loading.
//!
//! [`AssetLoader::load_parallel`] submits every job to a dedicated rayon pool
//! up front and drains results in completion order, forwarding each one as a
//! progress event the moment it arrives. The token is checked on every drain
//! step; once it trips, queued jobs skip their work, results still in flight
//! are discarded and a single `Cancelled` event ends the stream.
//!
//! Speedup and throughput are estimates. They compare wall-clock time against
//! an assumed per-item sequential cost ([`SEQUENTIAL_COST_PER_ITEM`]) and are
//! never measured against a real sequential run.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::cancel::CancellationToken;
use crate::events::{EventEmitter, SearchEvent};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::thumbnail::{BoundingBox, Thumbnail, ThumbnailDecoder};

/// Assumed cost of loading one asset on a single thread.
pub const SEQUENTIAL_COST_PER_ITEM: Duration = Duration::from_millis(50);

/// Extra workers on top of available parallelism; decoding is I/O bound.
pub const WORKER_HEADROOM: usize = 4;

/// Upper bound for automatically sized pools.
pub const MAX_AUTO_WORKERS: usize = 32;

/// How long one drain step waits for a result before re-checking the token.
const DRAIN_POLL: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadJob {
    pub path: PathBuf,
    /// Position in the submitted list.
    pub index: usize,
}

impl LoadJob {
    pub fn new(path: impl Into<PathBuf>, index: usize) -> Self {
        Self {
            path: path.into(),
            index,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedAsset {
    /// File name shown to the user.
    pub name: String,
    pub thumbnail: Thumbnail,
    pub path: PathBuf,
    pub index: usize,
}

#[derive(Debug, Clone)]
pub struct FailedAsset {
    pub path: PathBuf,
    pub index: usize,
    pub reason: String,
}

/// Result of loading one job.
#[derive(Debug, Clone)]
pub enum LoadResult {
    Loaded(LoadedAsset),
    Failed(FailedAsset),
}

impl LoadResult {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Loaded(asset) => &asset.path,
            Self::Failed(failure) => &failure.path,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Self::Loaded(asset) => asset.index,
            Self::Failed(failure) => failure.index,
        }
    }
}

/// Counters and estimates for one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadStats {
    pub loaded: usize,
    pub failed: usize,
    pub total: usize,
    pub workers: usize,
    pub duration: Duration,
    /// Assumed single-thread cost per item the estimates are based on.
    pub baseline: Duration,
    /// `total * baseline / duration`; approximate.
    pub speedup_estimate: f64,
    /// Loaded assets per second of wall-clock time.
    pub throughput: f64,
}

impl LoadStats {
    pub fn new(
        loaded: usize,
        failed: usize,
        total: usize,
        workers: usize,
        duration: Duration,
    ) -> Self {
        let seconds = duration.as_secs_f64();
        let assumed_sequential = SEQUENTIAL_COST_PER_ITEM.as_secs_f64() * total as f64;
        let (speedup_estimate, throughput) = if seconds > 0.0 {
            (assumed_sequential / seconds, loaded as f64 / seconds)
        } else {
            (1.0, 0.0)
        };
        Self {
            loaded,
            failed,
            total,
            workers,
            duration,
            baseline: SEQUENTIAL_COST_PER_ITEM,
            speedup_estimate,
            throughput,
        }
    }
}

/// How a batch ended.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Completed(LoadStats),
    /// Partial counts at the moment cancellation was observed.
    Cancelled(LoadStats),
    /// The worker pool could not start.
    Failed(String),
}

/// Loads thumbnails for a list of files through a [`ThumbnailDecoder`].
pub struct AssetLoader {
    decoder: Arc<dyn ThumbnailDecoder>,
    bounds: BoundingBox,
    max_workers: Option<usize>,
    metrics: Arc<dyn MetricsSink>,
}

impl AssetLoader {
    pub fn new(decoder: Arc<dyn ThumbnailDecoder>, bounds: BoundingBox) -> Self {
        Self {
            decoder,
            bounds,
            max_workers: None,
            metrics: Arc::new(NoopMetrics),
        }
    }

    /// Overrides the automatic pool size.
    pub fn with_max_workers(mut self, max_workers: Option<usize>) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Pool size for a batch of `jobs`: configured or automatic, never more
    /// than the job count and never zero.
    pub fn worker_count(&self, jobs: usize) -> usize {
        let wanted = self.max_workers.unwrap_or_else(auto_worker_count);
        wanted.min(jobs).max(1)
    }

    /// Loads one file on the calling thread.
    pub fn load_single(&self, job: &LoadJob) -> LoadResult {
        decode_job(self.decoder.as_ref(), self.bounds, job)
    }

    /// Loads `jobs` on a bounded pool, streaming results in completion order.
    ///
    /// Emits one `Progress` per completed job, then exactly one of `Done`,
    /// `Cancelled` or `Error`.
    pub fn load_parallel(
        &self,
        jobs: Vec<LoadJob>,
        cancel: &CancellationToken,
        events: &EventEmitter<'_>,
    ) -> LoadOutcome {
        let started = Instant::now();
        let total = jobs.len();
        let workers = self.worker_count(total);

        if cancel.is_cancelled() {
            return self.finish_cancelled(0, 0, total, workers, started, events);
        }

        let pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|index| format!("asset-loader-{index}"))
            .build()
        {
            Ok(pool) => pool,
            Err(error) => {
                let message = format!("worker pool failed to start: {error}");
                log::error!("{message} workers={workers}");
                events.emit(SearchEvent::Error {
                    message: message.clone(),
                });
                return LoadOutcome::Failed(message);
            }
        };

        log::debug!("parallel load started total={total} workers={workers}");

        let (sender, receiver) = mpsc::channel::<LoadResult>();
        for job in jobs {
            let sender = sender.clone();
            let decoder = self.decoder.clone();
            let cancel = cancel.clone();
            let bounds = self.bounds;
            pool.spawn(move || {
                // Jobs still queued when cancellation lands never start.
                if cancel.is_cancelled() {
                    return;
                }
                let result = decode_job(decoder.as_ref(), bounds, &job);
                let _ = sender.send(result);
            });
        }
        drop(sender);

        let mut loaded = 0;
        let mut failed = 0;
        let mut completed = 0;
        while completed < total {
            if cancel.is_cancelled() {
                return self.finish_cancelled(loaded, failed, total, workers, started, events);
            }
            let result = match receiver.recv_timeout(DRAIN_POLL) {
                Ok(result) => result,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            if cancel.is_cancelled() {
                return self.finish_cancelled(loaded, failed, total, workers, started, events);
            }

            completed += 1;
            self.tally(&result, &mut loaded, &mut failed);
            events.emit(SearchEvent::Progress {
                result,
                position: completed,
                total,
            });
        }

        if completed < total && cancel.is_cancelled() {
            return self.finish_cancelled(loaded, failed, total, workers, started, events);
        }
        let outcome = self.finish_completed(loaded, failed, total, workers, started, events);
        if let LoadOutcome::Completed(stats) = &outcome {
            self.metrics.record_batch(stats);
        }
        outcome
    }

    /// Loads `jobs` one at a time on the calling thread.
    ///
    /// Follows the same event protocol as [`AssetLoader::load_parallel`]. The
    /// batch is not reported to [`MetricsSink::record_batch`]: its speedup
    /// estimate has no meaning on one thread.
    pub fn load_sequential(
        &self,
        jobs: Vec<LoadJob>,
        cancel: &CancellationToken,
        events: &EventEmitter<'_>,
    ) -> LoadOutcome {
        let started = Instant::now();
        let total = jobs.len();
        let mut loaded = 0;
        let mut failed = 0;

        for (completed, job) in jobs.iter().enumerate() {
            if cancel.is_cancelled() {
                return self.finish_cancelled(loaded, failed, total, 1, started, events);
            }
            let result = self.load_single(job);
            if cancel.is_cancelled() {
                return self.finish_cancelled(loaded, failed, total, 1, started, events);
            }
            self.tally(&result, &mut loaded, &mut failed);
            events.emit(SearchEvent::Progress {
                result,
                position: completed + 1,
                total,
            });
        }

        self.finish_completed(loaded, failed, total, 1, started, events)
    }

    fn tally(&self, result: &LoadResult, loaded: &mut usize, failed: &mut usize) {
        match result {
            LoadResult::Loaded(_) => *loaded += 1,
            LoadResult::Failed(failure) => {
                *failed += 1;
                log::warn!(
                    "asset load failed path={} reason={}",
                    failure.path.display(),
                    failure.reason
                );
                self.metrics.record_asset_failure(&failure.path, &failure.reason);
            }
        }
    }

    fn finish_completed(
        &self,
        loaded: usize,
        failed: usize,
        total: usize,
        workers: usize,
        started: Instant,
        events: &EventEmitter<'_>,
    ) -> LoadOutcome {
        let stats = LoadStats::new(loaded, failed, total, workers, started.elapsed());
        events.emit(SearchEvent::Done(stats.clone()));
        LoadOutcome::Completed(stats)
    }

    fn finish_cancelled(
        &self,
        loaded: usize,
        failed: usize,
        total: usize,
        workers: usize,
        started: Instant,
        events: &EventEmitter<'_>,
    ) -> LoadOutcome {
        let stats = LoadStats::new(loaded, failed, total, workers, started.elapsed());
        log::info!(
            "asset loading cancelled loaded={} failed={} total={}",
            stats.loaded,
            stats.failed,
            stats.total
        );
        events.emit(SearchEvent::Cancelled);
        LoadOutcome::Cancelled(stats)
    }
}

/// Available parallelism plus [`WORKER_HEADROOM`], capped at [`MAX_AUTO_WORKERS`].
pub fn auto_worker_count() -> usize {
    let cores = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores + WORKER_HEADROOM).min(MAX_AUTO_WORKERS)
}

fn decode_job(decoder: &dyn ThumbnailDecoder, bounds: BoundingBox, job: &LoadJob) -> LoadResult {
    let decoded = panic::catch_unwind(AssertUnwindSafe(|| decoder.decode(&job.path, bounds)));

    let failure = |reason: String| {
        LoadResult::Failed(FailedAsset {
            path: job.path.clone(),
            index: job.index,
            reason,
        })
    };

    match decoded {
        Ok(Ok(thumbnail)) => LoadResult::Loaded(LoadedAsset {
            name: job
                .path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| job.path.to_string_lossy().into_owned()),
            thumbnail,
            path: job.path.clone(),
            index: job.index,
        }),
        Ok(Err(error)) => failure(error.to_string()),
        Err(_) => failure("decoder panicked".to_string()),
    }
}
