//! Inventory folder lookup and thumbnail loading library.
//!
//! This crate provides:
//! - Accent, case and symbol tolerant text normalization
//! - A TTL-bounded, in-memory directory index cache
//! - Cancellable, bounded-concurrency thumbnail loading
//! - A one-search-at-a-time lifecycle manager streaming typed events

pub mod cache;
pub mod cancel;
pub mod config;
pub mod error;
pub mod events;
pub mod fswalk;
pub mod loader;
pub mod manager;
pub mod metrics;
pub mod normalize;
pub mod search;
pub mod thumbnail;

// Re-export main types
pub use cache::{CacheRecord, DirectoryCache, DirectoryEntry, DirectoryIndex};
pub use cancel::CancellationToken;
pub use config::FinderConfig;
pub use error::{FinderError, Result};
pub use events::{event_channel, EventEmitter, EventSink, SearchEvent, SearchEvents};
pub use loader::{AssetLoader, LoadJob, LoadOutcome, LoadResult, LoadStats};
pub use manager::{SearchManager, SearchStatus};
pub use metrics::{MetricsSink, MetricsSummary, NoopMetrics, SessionId, SessionMetrics};
pub use normalize::normalize;
pub use search::{SearchOrchestrator, SearchRequest};
pub use thumbnail::{BoundingBox, ImageThumbnailer, Thumbnail, ThumbnailDecoder};
