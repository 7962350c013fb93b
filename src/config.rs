//! Caller-supplied run configuration.
//!
//! Fan-out widths are clamped to hard ceilings whatever the caller asks for.
//! [`RunConfig::validate`] rejects unusable configurations before any
//! network or disk work starts.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::download::{DownloadOptions, MAX_CONCURRENCY};

/// Maximum album pages scanned at once.
pub const MAX_PAGE_WORKERS: usize = 10;
/// Maximum probes in flight per page.
pub const MAX_PROBE_WORKERS: usize = 16;
/// Maximum downloads in flight.
pub const MAX_DOWNLOAD_WORKERS: usize = MAX_CONCURRENCY;

/// Default page workers.
pub const DEFAULT_PAGE_WORKERS: usize = 4;
/// Default probe workers.
pub const DEFAULT_PROBE_WORKERS: usize = 8;
/// Default download workers.
pub const DEFAULT_DOWNLOAD_WORKERS: usize = 8;
/// Default minimum image size in KB.
pub const DEFAULT_MIN_SIZE_KB: u64 = 10;

/// Folder (under the destination root) holding the default history database.
pub const STATE_DIR_NAME: &str = ".tape-fetcher";
/// File name of the default history database.
pub const DATABASE_FILE_NAME: &str = "history.db";

/// Configuration errors, raised before any work starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// No gallery URL was given.
    #[error("no gallery URL given\n  Suggestion: Pass one or more URLs, comma-separated")]
    NoGalleries,

    /// A gallery URL could not be parsed.
    #[error("invalid gallery URL: {url}")]
    InvalidGalleryUrl {
        /// The rejected URL.
        url: String,
    },

    /// Downloading was requested without a destination folder.
    #[error("no destination folder given\n  Suggestion: Pass --dest <folder>")]
    MissingDestination,

    /// Neither a database path nor a destination folder was given.
    #[error("no history database location\n  Suggestion: Pass --database <file> or --dest <folder>")]
    NoDatabase,
}

/// Options for one search (and optionally download) run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Gallery entry URLs.
    pub galleries: Vec<String>,
    /// Minimum accepted image size in KB.
    pub min_size_kb: u64,
    /// Album pages scanned concurrently.
    pub page_workers: usize,
    /// Probes per page in flight.
    pub probe_workers: usize,
    /// Downloads in flight.
    pub download_workers: usize,
    /// Destination root folder.
    pub dest_root: Option<PathBuf>,
    /// Place files under an owner subfolder.
    pub owner_folders: bool,
    /// Place files under an album-title subfolder.
    pub title_folders: bool,
    /// Download regardless of the ledger.
    pub overwrite: bool,
    /// Treat each gallery URL as the album (tape) URL.
    pub direct_tape: bool,
    /// Download right after searching (combined mode).
    pub download: bool,
    /// Re-fetch a page while it shows fewer full-size images than this.
    pub expected_per_page: Option<usize>,
    /// Optional Redis URL for the shared fingerprint cache.
    pub cache_url: Option<String>,
    /// History database file; defaults to `<dest>/.tape-fetcher/history.db`.
    pub database_path: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            galleries: Vec::new(),
            min_size_kb: DEFAULT_MIN_SIZE_KB,
            page_workers: DEFAULT_PAGE_WORKERS,
            probe_workers: DEFAULT_PROBE_WORKERS,
            download_workers: DEFAULT_DOWNLOAD_WORKERS,
            dest_root: None,
            owner_folders: false,
            title_folders: false,
            overwrite: false,
            direct_tape: false,
            download: false,
            expected_per_page: None,
            cache_url: None,
            database_path: None,
        }
    }
}

impl RunConfig {
    /// Creates a config for the given galleries with defaults elsewhere.
    #[must_use]
    pub fn for_galleries(galleries: Vec<String>) -> Self {
        Self {
            galleries,
            ..Self::default()
        }
    }

    /// Returns a copy with every fan-out width clamped to its ceiling.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.page_workers = self.page_workers.clamp(1, MAX_PAGE_WORKERS);
        self.probe_workers = self.probe_workers.clamp(1, MAX_PROBE_WORKERS);
        self.download_workers = self.download_workers.clamp(1, MAX_DOWNLOAD_WORKERS);
        self
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for an empty gallery list, an unparsable
    /// gallery URL, or a missing destination when downloading.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.galleries.is_empty() {
            return Err(ConfigError::NoGalleries);
        }
        for gallery in &self.galleries {
            let parsed = Url::parse(gallery).map_err(|_| ConfigError::InvalidGalleryUrl {
                url: gallery.clone(),
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidGalleryUrl {
                    url: gallery.clone(),
                });
            }
        }
        if self.download && self.dest_root.is_none() {
            return Err(ConfigError::MissingDestination);
        }
        Ok(())
    }

    /// Minimum accepted size in bytes.
    #[must_use]
    pub fn min_size_bytes(&self) -> u64 {
        self.min_size_kb.saturating_mul(1024)
    }

    /// Where the history database lives.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoDatabase`] when neither a database path nor
    /// a destination root is set.
    pub fn database_location(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        self.dest_root
            .as_ref()
            .map(|root| root.join(STATE_DIR_NAME).join(DATABASE_FILE_NAME))
            .ok_or(ConfigError::NoDatabase)
    }

    /// Download options derived from this config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingDestination`] without a destination root.
    pub fn download_options(&self) -> Result<DownloadOptions, ConfigError> {
        let dest_root = self
            .dest_root
            .clone()
            .ok_or(ConfigError::MissingDestination)?;
        Ok(DownloadOptions {
            dest_root,
            overwrite: self.overwrite,
            concurrency: self.download_workers.clamp(1, MAX_DOWNLOAD_WORKERS),
            owner_folders: self.owner_folders,
            title_folders: self.title_folders,
        })
    }
}

/// Splits a comma-separated gallery list, trimming blanks.
#[must_use]
pub fn parse_gallery_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
