//! Download engine: verified candidates to files on disk.
//!
//! # Features
//!
//! - Ledger pre-filter with the earlier download time on each skip
//! - Bounded worker pool (1-48 tasks)
//! - Streaming `.part` writes renamed into place, with content-length check
//! - Per-item retry on transient failures
//! - `root[/owner][/title]` layout, random suffix on name collisions
//!
//! Per-item failures are counted in [`BatchStats`] and never abort the batch.

mod engine;
mod error;
mod filename;

pub use engine::{
    BatchStats, DEFAULT_CONCURRENCY, DownloadEngine, DownloadOptions, DownloadStats,
    MAX_CONCURRENCY, PART_SUFFIX, clamp_concurrency,
};
pub use error::EngineError;
pub use filename::{COLLISION_SUFFIX_LEN, destination_dir, filename_from_url};
