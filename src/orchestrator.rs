//! Run orchestration: discovery, extraction, and optional download per gallery.
//!
//! Galleries are processed one after another; pages within a gallery fan out
//! on a bounded pool. A failing gallery is reported and skipped. Only one run
//! may be active per orchestrator; a second concurrent call is rejected with
//! [`OrchestratorError::RunInProgress`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use crate::config::{ConfigError, RunConfig};
use crate::discovery::{AlbumRef, AlbumResolver};
use crate::download::{BatchStats, DownloadEngine, DownloadOptions, EngineError};
use crate::events::{EventSink, GallerySummary, PipelineEvent, RunTotals, megabytes};
use crate::extract::{Candidate, ExtractOptions, PageExtractor, PageReport};
use crate::http::{FetchError, HttpClient};
use crate::ledger::{Ledger, LedgerError};
use crate::retry::RetryPolicy;
use crate::site::Site;

/// Errors that stop a run before or during its work.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Another run is active on this orchestrator.
    #[error("a run is already in progress")]
    RunInProgress,

    /// The ledger could not be reconciled.
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// The download batch could not start.
    #[error("download error: {0}")]
    Engine(#[from] EngineError),

    /// An HTTP client could not be constructed.
    #[error("failed to set up HTTP client: {0}")]
    Client(#[source] FetchError),
}

/// Retry policies for the three network layers.
#[derive(Debug, Clone)]
pub struct RetryPolicies {
    /// Album page fetches.
    pub page: RetryPolicy,
    /// Image probes.
    pub probe: RetryPolicy,
    /// Image downloads.
    pub download: RetryPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            page: RetryPolicy::page_fetch(),
            probe: RetryPolicy::probe(),
            download: RetryPolicy::default(),
        }
    }
}

/// What a search run produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SearchOutcome {
    /// Verified candidates across all galleries.
    pub candidates: Vec<Candidate>,
    /// Per-gallery totals, in request order.
    pub galleries: Vec<GallerySummary>,
    /// Cross-gallery totals.
    pub totals: RunTotals,
    /// Download counts in combined mode.
    pub download: Option<BatchStats>,
}

/// Sequences the pipeline for one caller.
#[derive(Debug)]
pub struct Orchestrator {
    client: HttpClient,
    download_client: HttpClient,
    site: Site,
    ledger: Arc<Ledger>,
    events: EventSink,
    retry: RetryPolicies,
    running: AtomicBool,
    cancel: Arc<AtomicBool>,
}

/// Clears the running flag when a run ends.
struct RunGuard<'a> {
    running: &'a AtomicBool,
}

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a AtomicBool) -> Result<Self, OrchestratorError> {
        running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| OrchestratorError::RunInProgress)?;
        Ok(Self { running })
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

impl Orchestrator {
    /// Creates an orchestrator for the production site.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Client`] if the download client cannot
    /// be built.
    pub fn new(ledger: Arc<Ledger>, events: EventSink) -> Result<Self, OrchestratorError> {
        let download_client = HttpClient::for_downloads().map_err(OrchestratorError::Client)?;
        Ok(Self {
            client: HttpClient::new(),
            download_client,
            site: Site::default(),
            ledger,
            events,
            retry: RetryPolicies::default(),
            running: AtomicBool::new(false),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Points the orchestrator at another origin.
    #[must_use]
    pub fn with_site(mut self, site: Site) -> Self {
        self.site = site;
        self
    }

    /// Replaces the retry policies.
    #[must_use]
    pub fn with_retry_policies(mut self, retry: RetryPolicies) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the shared ledger.
    #[must_use]
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Returns true while a run is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Asks the active run to stop after the current page.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Searches every configured gallery, downloading as it goes when
    /// `config.download` is set.
    ///
    /// In combined mode owner and title subfolders are always used.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] for an invalid config, a concurrent run,
    /// a ledger failure during reconciliation, or a destination that is not
    /// writable when the run starts. Gallery and page failures are reported
    /// as events instead; a download batch that cannot start mid-run is
    /// counted in the totals and stops downloading for the rest of the run.
    #[instrument(skip(self, config), fields(galleries = config.galleries.len(), download = config.download))]
    pub async fn search(&self, config: &RunConfig) -> Result<SearchOutcome, OrchestratorError> {
        config.validate()?;
        let config = config.clone().clamped();
        let download_options = if config.download {
            let mut options = config.download_options()?;
            options.owner_folders = true;
            options.title_folders = true;
            Some(options)
        } else {
            None
        };

        let _guard = RunGuard::acquire(&self.running)?;
        self.cancel.store(false, Ordering::SeqCst);
        if let Some(options) = &download_options {
            DownloadEngine::verify_destination(&options.dest_root).await?;
        }
        self.ledger.reconcile().await?;

        let resolver = AlbumResolver::new(self.client.clone(), self.site.clone())
            .with_retry_policy(self.retry.page.clone());
        let extractor = PageExtractor::new(
            self.client.clone(),
            self.site.clone(),
            ExtractOptions {
                min_size_bytes: config.min_size_bytes(),
                probe_workers: config.probe_workers,
                probe_policy: self.retry.probe.clone(),
                page_policy: self.retry.page.clone(),
                expected_per_page: config.expected_per_page,
            },
        );
        let engine = self.engine();

        let mut outcome = SearchOutcome {
            totals: RunTotals {
                galleries: config.galleries.len(),
                ..RunTotals::default()
            },
            download: download_options.as_ref().map(|_| BatchStats::default()),
            ..SearchOutcome::default()
        };
        let mut total_bytes = 0u64;
        let mut downloads_halted = false;

        for (index, gallery) in config.galleries.iter().enumerate() {
            if self.cancelled() {
                outcome.totals.cancelled = true;
                break;
            }
            self.events.progress(format!(
                "Gallery {} of {}: {gallery}",
                index + 1,
                config.galleries.len()
            ));

            let album = match resolver.resolve_album(gallery, config.direct_tape).await {
                Ok(album) => album,
                Err(error) => {
                    warn!(gallery = %gallery, error = %error, "gallery failed");
                    outcome.totals.gallery_errors += 1;
                    self.events.emit(PipelineEvent::GalleryError {
                        gallery: gallery.clone(),
                        message: error.to_string(),
                    });
                    continue;
                }
            };
            self.events.emit(PipelineEvent::AlbumOwner {
                gallery: gallery.clone(),
                owner: album.owner.clone(),
            });
            self.events.emit(PipelineEvent::AlbumTitle {
                gallery: gallery.clone(),
                title: album.title.clone(),
            });

            let (report, page_errors) = self
                .scan_album(&extractor, &album, config.page_workers)
                .await;

            let bytes = report.verified_bytes();
            let summary = GallerySummary {
                gallery: gallery.clone(),
                valid: report.verified.len(),
                total_seen: report.total_seen,
                discarded: report.discarded,
                page_errors,
                total_megabytes: megabytes(bytes),
            };
            total_bytes += bytes;
            outcome.totals.valid += summary.valid;
            outcome.totals.discarded += summary.discarded;
            outcome.totals.page_errors += summary.page_errors;

            self.events.emit(PipelineEvent::CandidateBatch {
                gallery: gallery.clone(),
                candidates: report.verified.clone(),
                total_seen: report.total_seen,
                discarded: report.discarded,
            });
            self.events
                .emit(PipelineEvent::GallerySummary(summary.clone()));
            outcome.galleries.push(summary);

            if let Some(options) = &download_options
                && !downloads_halted
                && !self.cancelled()
            {
                let stats = match engine.download_all(&report.verified, options).await {
                    Ok(stats) => stats,
                    Err(error) => {
                        warn!(gallery = %gallery, error = %error, "download batch failed");
                        downloads_halted = true;
                        self.events.emit(PipelineEvent::GalleryError {
                            gallery: gallery.clone(),
                            message: format!("downloads stopped: {error}"),
                        });
                        BatchStats {
                            errors: report.verified.len(),
                            ..BatchStats::default()
                        }
                    }
                };
                if let Some(total) = outcome.download.as_mut() {
                    accumulate(total, &stats);
                }
            }

            outcome.candidates.extend(report.verified);
        }

        outcome.totals.total_megabytes = megabytes(total_bytes);
        if let Some(stats) = &outcome.download {
            outcome.totals.downloaded = stats.downloaded;
            outcome.totals.skipped = stats.skipped;
            outcome.totals.download_errors = stats.errors;
            outcome.totals.ledger_errors = stats.ledger_errors;
        }

        info!(
            galleries = outcome.totals.galleries,
            gallery_errors = outcome.totals.gallery_errors,
            valid = outcome.totals.valid,
            discarded = outcome.totals.discarded,
            page_errors = outcome.totals.page_errors,
            cancelled = outcome.totals.cancelled,
            "run complete"
        );
        self.events
            .emit(PipelineEvent::RunSummary(outcome.totals.clone()));
        Ok(outcome)
    }

    /// Downloads a previously returned candidate list.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] for a concurrent run, a ledger failure
    /// during reconciliation, or an unwritable destination.
    #[instrument(skip(self, candidates, options), fields(candidates = candidates.len()))]
    pub async fn download(
        &self,
        candidates: &[Candidate],
        options: &DownloadOptions,
    ) -> Result<BatchStats, OrchestratorError> {
        let _guard = RunGuard::acquire(&self.running)?;
        self.cancel.store(false, Ordering::SeqCst);
        self.ledger.reconcile().await?;

        let stats = self.engine().download_all(candidates, options).await?;
        self.events.emit(PipelineEvent::RunSummary(RunTotals {
            downloaded: stats.downloaded,
            skipped: stats.skipped,
            download_errors: stats.errors,
            ledger_errors: stats.ledger_errors,
            total_megabytes: stats.megabytes(),
            ..RunTotals::default()
        }));
        Ok(stats)
    }

    fn engine(&self) -> DownloadEngine {
        DownloadEngine::new(
            self.download_client.clone(),
            Arc::clone(&self.ledger),
            self.events.clone(),
        )
        .with_retry_policy(self.retry.download.clone())
    }

    /// Extracts every page of `album`, returning the merged report and the
    /// number of pages that failed.
    async fn scan_album(
        &self,
        extractor: &PageExtractor,
        album: &AlbumRef,
        page_workers: usize,
    ) -> (PageReport, usize) {
        let total_pages = album.page_urls.len();
        let semaphore = Arc::new(Semaphore::new(page_workers.max(1)));
        let mut handles = Vec::with_capacity(total_pages);

        for page_url in &album.page_urls {
            let semaphore = Arc::clone(&semaphore);
            let extractor = extractor.clone();
            let cancel = Arc::clone(&self.cancel);
            let page_url = page_url.clone();
            let owner = album.owner.clone();
            let title = album.title.clone();

            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return None;
                };
                if cancel.load(Ordering::SeqCst) {
                    return None;
                }
                Some(extractor.extract_page(&page_url, &owner, &title).await)
            }));
        }

        let mut report = PageReport::default();
        let mut page_errors = 0;
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.await {
                Ok(Some(Ok(page))) => report.absorb(page),
                Ok(Some(Err(error))) => {
                    warn!(error = %error, "page failed");
                    page_errors += 1;
                    self.events.progress(format!("Page failed: {error}"));
                }
                Ok(None) => {}
                Err(error) => {
                    warn!(error = %error, "page task panicked");
                    page_errors += 1;
                }
            }
            self.events.emit(PipelineEvent::PageScanned {
                page: index + 1,
                total_pages,
                verified: report.verified.len(),
                discarded: report.discarded,
            });
        }

        (report, page_errors)
    }
}

fn accumulate(total: &mut BatchStats, batch: &BatchStats) {
    total.downloaded += batch.downloaded;
    total.bytes += batch.bytes;
    total.skipped += batch.skipped;
    total.errors += batch.errors;
    total.ledger_errors += batch.ledger_errors;
    total.retried += batch.retried;
}
