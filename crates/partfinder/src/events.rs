//! Event protocol of one search.
//!
//! Each search emits an ordered stream of [`SearchEvent`]s ending in exactly
//! one terminal event. Producers write through an [`EventEmitter`], which drops
//! anything sent after the terminal event; consumers poll a [`SearchEvents`]
//! receiver without blocking.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::loader::{LoadResult, LoadStats};

/// Interval at which blocking helpers re-poll the receiver.
pub const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub enum SearchEvent {
    /// The root is missing, not a directory, or unreadable.
    PathError { root: PathBuf, message: String },
    /// No folder matched, even after a fresh scan.
    NotFound { term: String },
    /// A folder matched but holds no eligible assets.
    NoAssets { matched_name: String },
    Found {
        matched_name: String,
        asset_count: usize,
    },
    /// One asset finished loading, successfully or not.
    Progress {
        result: LoadResult,
        /// 1-based completion ordinal within the batch.
        position: usize,
        total: usize,
    },
    Done(LoadStats),
    Cancelled,
    Error { message: String },
}

impl SearchEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Found { .. } | Self::Progress { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::PathError { .. } => "path-error",
            Self::NotFound { .. } => "not-found",
            Self::NoAssets { .. } => "no-assets",
            Self::Found { .. } => "found",
            Self::Progress { .. } => "progress",
            Self::Done(_) => "done",
            Self::Cancelled => "cancelled",
            Self::Error { .. } => "error",
        }
    }
}

impl fmt::Display for SearchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PathError { root, message } => {
                write!(f, "path-error {}: {message}", root.display())
            }
            Self::NotFound { term } => write!(f, "not-found {term:?}"),
            Self::NoAssets { matched_name } => write!(f, "no-assets in {matched_name}"),
            Self::Found {
                matched_name,
                asset_count,
            } => write!(f, "found {matched_name} ({asset_count} assets)"),
            Self::Progress {
                result,
                position,
                total,
            } => match result {
                LoadResult::Loaded(asset) => write!(
                    f,
                    "progress {position}/{total} {} {}x{}",
                    asset.name, asset.thumbnail.width, asset.thumbnail.height
                ),
                LoadResult::Failed(failure) => write!(
                    f,
                    "progress {position}/{total} failed {}: {}",
                    failure.path.display(),
                    failure.reason
                ),
            },
            Self::Done(stats) => write!(
                f,
                "done loaded={} failed={} total={} in {:.1}ms (speedup~{:.1}x)",
                stats.loaded,
                stats.failed,
                stats.total,
                stats.duration.as_secs_f64() * 1000.0,
                stats.speedup_estimate
            ),
            Self::Cancelled => f.write_str("cancelled"),
            Self::Error { message } => write!(f, "error: {message}"),
        }
    }
}

/// Destination for search events. Must be callable from any thread.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SearchEvent);
}

impl EventSink for mpsc::UnboundedSender<SearchEvent> {
    fn emit(&self, event: SearchEvent) {
        // A dropped receiver means nobody is listening anymore.
        let _ = self.send(event);
    }
}

#[cfg(test)]
impl EventSink for parking_lot::Mutex<Vec<SearchEvent>> {
    fn emit(&self, event: SearchEvent) {
        self.lock().push(event);
    }
}

/// Forwards events to a sink until the first terminal event.
pub struct EventEmitter<'a> {
    sink: &'a dyn EventSink,
    terminated: AtomicBool,
}

impl<'a> EventEmitter<'a> {
    pub fn new(sink: &'a dyn EventSink) -> Self {
        Self {
            sink,
            terminated: AtomicBool::new(false),
        }
    }

    /// Sends `event`; returns false if the stream already terminated.
    pub fn emit(&self, event: SearchEvent) -> bool {
        if event.is_terminal() {
            if self.terminated.swap(true, Ordering::SeqCst) {
                log::debug!("dropping {} after terminal event", event.kind());
                return false;
            }
        } else if self.terminated.load(Ordering::SeqCst) {
            log::debug!("dropping {} after terminal event", event.kind());
            return false;
        }
        self.sink.emit(event);
        true
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

/// Creates a connected sender/receiver pair for one search.
pub fn event_channel() -> (mpsc::UnboundedSender<SearchEvent>, SearchEvents) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        sender,
        SearchEvents {
            receiver,
            closed: false,
        },
    )
}

/// Receiving end of one search's event stream.
#[derive(Debug)]
pub struct SearchEvents {
    receiver: mpsc::UnboundedReceiver<SearchEvent>,
    closed: bool,
}

impl SearchEvents {
    /// Returns the next queued event without blocking.
    pub fn try_next(&mut self) -> Option<SearchEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                self.closed = true;
                None
            }
        }
    }

    /// Returns every queued event without blocking.
    pub fn drain(&mut self) -> Vec<SearchEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_next() {
            events.push(event);
        }
        events
    }

    /// Polls for the next event for at most `timeout`.
    pub fn wait_next(&mut self, timeout: Duration) -> Option<SearchEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.try_next() {
                return Some(event);
            }
            if self.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            thread::sleep(EVENT_POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Waits for the next event from async code.
    pub async fn next(&mut self) -> Option<SearchEvent> {
        let event = self.receiver.recv().await;
        if event.is_none() {
            self.closed = true;
        }
        event
    }

    /// Collects events until a terminal one arrives, the stream closes, or
    /// `timeout` elapses.
    pub fn collect_until_terminal(&mut self, timeout: Duration) -> Vec<SearchEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = Vec::new();
        while let Some(event) =
            self.wait_next(deadline.saturating_duration_since(Instant::now()))
        {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }

    /// True once every sender is gone and the queue is empty.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
