//! Download engine for verified candidates.
//!
//! The engine filters candidates against the ledger, then downloads the rest
//! with a semaphore-bounded pool of Tokio tasks. Each file is streamed into a
//! `.part` file beside its destination and renamed into place once complete,
//! after which the download is recorded in the ledger.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tape_fetcher_core::download::{DownloadEngine, DownloadOptions};
//! use tape_fetcher_core::{Database, EventSink, HttpClient, Ledger};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = Arc::new(Ledger::open(Database::new_in_memory().await?, None).await?);
//! let engine = DownloadEngine::new(HttpClient::for_downloads()?, ledger, EventSink::disabled());
//! let stats = engine
//!     .download_all(&[], &DownloadOptions::new("./downloads"))
//!     .await?;
//! println!("downloaded {} ({} skipped)", stats.downloaded, stats.skipped);
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::error::EngineError;
use super::filename::{
    destination_dir, filename_from_url, random_suffix, reserve_suffixed_path, reserve_unique_path,
};
use crate::events::{EventSink, PipelineEvent, megabytes};
use crate::extract::Candidate;
use crate::http::{FetchError, HttpClient, classify_error};
use crate::ledger::{Ledger, NewLedgerEntry};
use crate::retry::{RetryPolicy, retry_with_backoff};

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 48;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Suffix of in-flight files.
pub const PART_SUFFIX: &str = ".part";

/// Marker written and removed to prove the destination is writable.
const WRITE_PROBE_NAME: &str = ".tape-fetcher-write-probe";

/// Caller options for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Root folder for downloads.
    pub dest_root: PathBuf,
    /// Re-download and overwrite regardless of the ledger.
    pub overwrite: bool,
    /// Worker pool width; clamped to `1..=48`.
    pub concurrency: usize,
    /// Place files under an owner subfolder.
    pub owner_folders: bool,
    /// Place files under an album-title subfolder.
    pub title_folders: bool,
}

impl DownloadOptions {
    /// Options with default concurrency and no subfolders.
    #[must_use]
    pub fn new(dest_root: impl Into<PathBuf>) -> Self {
        Self {
            dest_root: dest_root.into(),
            overwrite: false,
            concurrency: DEFAULT_CONCURRENCY,
            owner_folders: false,
            title_folders: false,
        }
    }

    /// Directory a candidate lands in under these options.
    #[must_use]
    pub fn directory_for(&self, candidate: &Candidate) -> PathBuf {
        destination_dir(
            &self.dest_root,
            self.owner_folders.then_some(candidate.owner.as_str()),
            self.title_folders.then_some(candidate.title.as_str()),
        )
    }
}

/// Clamps a requested pool width to `1..=48`.
#[must_use]
pub fn clamp_concurrency(requested: usize) -> usize {
    requested.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
}

/// Final counts for a batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    /// Files written.
    pub downloaded: usize,
    /// Bytes written.
    pub bytes: u64,
    /// Candidates skipped (already in the ledger, or repeated in the batch).
    pub skipped: usize,
    /// Candidates that failed.
    pub errors: usize,
    /// Files written whose ledger record failed.
    pub ledger_errors: usize,
    /// Retry attempts made.
    pub retried: usize,
}

impl BatchStats {
    /// Bytes written, in megabytes.
    #[must_use]
    pub fn megabytes(&self) -> f64 {
        megabytes(self.bytes)
    }
}

/// Live counters shared by download tasks.
#[derive(Debug, Default)]
pub struct DownloadStats {
    downloaded: AtomicUsize,
    bytes: AtomicU64,
    skipped: AtomicUsize,
    errors: AtomicUsize,
    ledger_errors: AtomicUsize,
    retried: AtomicUsize,
}

impl DownloadStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of files written.
    #[must_use]
    pub fn downloaded(&self) -> usize {
        self.downloaded.load(Ordering::SeqCst)
    }

    /// Returns the number of skipped candidates.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Returns the number of failed candidates.
    #[must_use]
    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    /// Copies the current counts.
    #[must_use]
    pub fn snapshot(&self) -> BatchStats {
        BatchStats {
            downloaded: self.downloaded(),
            bytes: self.bytes.load(Ordering::SeqCst),
            skipped: self.skipped(),
            errors: self.errors(),
            ledger_errors: self.ledger_errors.load(Ordering::SeqCst),
            retried: self.retried.load(Ordering::SeqCst),
        }
    }

    fn record_downloaded(&self, bytes: u64) {
        self.downloaded.fetch_add(1, Ordering::SeqCst);
        self.bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    fn increment_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_errors(&self) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    fn increment_ledger_errors(&self) {
        self.ledger_errors.fetch_add(1, Ordering::SeqCst);
    }

    fn add_retried(&self, count: usize) {
        self.retried.fetch_add(count, Ordering::SeqCst);
    }
}

/// Concurrent downloader that enforces the ledger.
#[derive(Debug, Clone)]
pub struct DownloadEngine {
    client: HttpClient,
    ledger: Arc<Ledger>,
    events: EventSink,
    retry_policy: RetryPolicy,
}

impl DownloadEngine {
    /// Creates an engine with the default retry policy (3 attempts).
    #[must_use]
    pub fn new(client: HttpClient, ledger: Arc<Ledger>, events: EventSink) -> Self {
        Self {
            client,
            ledger,
            events,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Replaces the per-item retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Returns the configured retry policy.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Creates `dest_root` if needed and proves it is writable.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PermissionDenied`] if it is not.
    pub async fn verify_destination(dest_root: &Path) -> Result<(), EngineError> {
        verify_writable(dest_root).await
    }

    /// Downloads every candidate not already in the ledger.
    ///
    /// Individual failures are counted and reported as events; they never
    /// abort sibling downloads.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::PermissionDenied`] if the destination root is
    /// not writable, before any download starts.
    #[instrument(skip(self, candidates, options), fields(
        candidates = candidates.len(),
        dest_root = %options.dest_root.display(),
        overwrite = options.overwrite,
    ))]
    pub async fn download_all(
        &self,
        candidates: &[Candidate],
        options: &DownloadOptions,
    ) -> Result<BatchStats, EngineError> {
        verify_writable(&options.dest_root).await?;

        let stats = Arc::new(DownloadStats::new());
        let concurrency = clamp_concurrency(options.concurrency);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut seen = HashSet::new();
        let mut claimed = HashSet::new();
        let mut handles = Vec::new();

        info!(concurrency, "starting download batch");
        self.events
            .progress(format!("Downloading {} candidate(s)", candidates.len()));

        for candidate in candidates {
            let fingerprint = candidate.fingerprint();
            if !seen.insert(fingerprint.clone()) {
                debug!(url = %candidate.url, "repeated in batch, skipping");
                self.skip(&stats, candidate, None);
                continue;
            }
            if !options.overwrite
                && let Some(previous) = self.ledger.previous_download(&fingerprint).await
            {
                self.skip(&stats, candidate, Some(previous));
                continue;
            }

            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| EngineError::SemaphoreClosed)?;

            let worker = Worker {
                client: self.client.clone(),
                ledger: Arc::clone(&self.ledger),
                events: self.events.clone(),
                retry_policy: self.retry_policy.clone(),
                stats: Arc::clone(&stats),
            };
            let candidate = candidate.clone();
            let dir = options.directory_for(&candidate);
            let overwrite = options.overwrite;
            // Two sources sharing a file name never overwrite each other.
            let placement = if overwrite {
                let target = dir.join(filename_from_url(&candidate.url));
                if claimed.insert(target.clone()) {
                    Placement::Replace(target)
                } else {
                    debug!(url = %candidate.url, path = %target.display(), "name taken in batch");
                    Placement::Suffixed
                }
            } else {
                Placement::Unique
            };

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                worker.run(candidate, dir, placement, overwrite).await;
            }));
        }

        debug!(task_count = handles.len(), "waiting for downloads to complete");
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "download task panicked");
                stats.increment_errors();
            }
        }

        let result = stats.snapshot();
        info!(
            downloaded = result.downloaded,
            skipped = result.skipped,
            errors = result.errors,
            ledger_errors = result.ledger_errors,
            retried = result.retried,
            bytes = result.bytes,
            "download batch complete"
        );
        self.events.progress(format!(
            "Downloaded {} file(s), {:.2} MB; skipped {}, errors {}",
            result.downloaded,
            result.megabytes(),
            result.skipped,
            result.errors
        ));
        Ok(result)
    }

    fn skip(&self, stats: &DownloadStats, candidate: &Candidate, previous: Option<String>) {
        stats.increment_skipped();
        self.events.emit(PipelineEvent::Skipped {
            url: candidate.url.clone(),
            previous_download: previous,
        });
    }
}

/// Where a worker writes its file.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Placement {
    /// Replace whatever sits at this path.
    Replace(PathBuf),
    /// Claim a fresh name in the directory.
    Unique,
    /// Claim a fresh suffixed name; the bare name belongs to another worker.
    Suffixed,
}

/// Everything one download task needs.
struct Worker {
    client: HttpClient,
    ledger: Arc<Ledger>,
    events: EventSink,
    retry_policy: RetryPolicy,
    stats: Arc<DownloadStats>,
}

impl Worker {
    #[instrument(skip(self, candidate, dir, placement), fields(url = %candidate.url))]
    async fn run(
        self,
        candidate: Candidate,
        dir: PathBuf,
        placement: Placement,
        overwrite: bool,
    ) {
        if !overwrite
            && let Some(previous) = self
                .ledger
                .previous_download(&candidate.fingerprint())
                .await
        {
            self.stats.increment_skipped();
            self.events.emit(PipelineEvent::Skipped {
                url: candidate.url,
                previous_download: Some(previous),
            });
            return;
        }

        let (path, bytes) = match self.fetch(&candidate, &dir, placement).await {
            Ok(written) => written,
            Err(error) => {
                warn!(error = %error, "download failed");
                self.stats.increment_errors();
                self.events.emit(PipelineEvent::DownloadFailed {
                    url: candidate.url,
                    message: error.to_string(),
                });
                return;
            }
        };

        self.stats.record_downloaded(bytes);
        self.events.emit(PipelineEvent::Downloaded {
            url: candidate.url.clone(),
            path: path.display().to_string(),
            bytes,
        });

        let entry = NewLedgerEntry::new(candidate.url.as_str(), candidate.owner.as_str(), &path);
        if let Err(error) = self.ledger.record_download(&entry).await {
            warn!(error = %error, "file written but ledger record failed");
            self.stats.increment_ledger_errors();
            self.events.emit(PipelineEvent::DownloadFailed {
                url: candidate.url,
                message: format!("downloaded to {} but not recorded: {error}", path.display()),
            });
        }
    }

    /// Writes the candidate under `dir`, returning the final path and size.
    async fn fetch(
        &self,
        candidate: &Candidate,
        dir: &Path,
        placement: Placement,
    ) -> Result<(PathBuf, u64), FetchError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| FetchError::io(dir, e))?;

        let (target, reserved) = match placement {
            Placement::Replace(target) => (target, false),
            Placement::Unique => (claim_path(dir, &candidate.url, true).await?, true),
            Placement::Suffixed => (claim_path(dir, &candidate.url, false).await?, true),
        };
        let part = part_path(&target);

        let mut attempts = 0u32;
        let result = retry_with_backoff(
            &self.retry_policy,
            "download",
            |attempt| {
                attempts = attempt;
                self.client.download_to_path(&candidate.url, &part)
            },
            classify_error,
        )
        .await;
        self.stats
            .add_retried(attempts.saturating_sub(1) as usize);

        let body = match result {
            Ok(body) => body,
            Err(failure) => {
                if reserved {
                    let _ = tokio::fs::remove_file(&target).await;
                }
                return Err(failure.error);
            }
        };

        if let Err(e) = tokio::fs::rename(&part, &target).await {
            let _ = tokio::fs::remove_file(&part).await;
            if reserved {
                let _ = tokio::fs::remove_file(&target).await;
            }
            return Err(FetchError::io(&target, e));
        }

        debug!(path = %target.display(), bytes = body.bytes, "file written");
        Ok((target, body.bytes))
    }
}

/// Reserves a free path in `dir` for the file named by `url`.
async fn claim_path(dir: &Path, url: &str, bare_first: bool) -> Result<PathBuf, FetchError> {
    let filename = filename_from_url(url);
    let reserved = if bare_first {
        reserve_unique_path(dir, &filename).await
    } else {
        reserve_suffixed_path(dir, &filename).await
    };
    reserved.map_err(|e| FetchError::io(dir.join(&filename), e))
}

/// In-flight path beside `target`, unique per call.
fn part_path(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(format!(".{}{PART_SUFFIX}", random_suffix()));
    target.with_file_name(name)
}

/// Creates `root` if needed and proves it is writable.
async fn verify_writable(root: &Path) -> Result<(), EngineError> {
    tokio::fs::create_dir_all(root)
        .await
        .map_err(|e| EngineError::permission_denied(root, e))?;

    let probe = root.join(WRITE_PROBE_NAME);
    tokio::fs::write(&probe, b"")
        .await
        .map_err(|e| EngineError::permission_denied(root, e))?;
    tokio::fs::remove_file(&probe)
        .await
        .map_err(|e| EngineError::permission_denied(root, e))?;
    Ok(())
}
