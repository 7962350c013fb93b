//! Candidate extraction and verification for one album page.
//!
//! A page's image sources are collected, classified by extension, and every
//! eligible source is probed for its real size and content type. Probes run
//! on a bounded worker pool; a probe that keeps failing discards its source
//! without failing the page.
//!
//! # Counting
//!
//! - every collected source (after dropping the site placeholder) counts
//!   toward `total_seen`
//! - thumbnails (`.jpg`, `.jpeg`, `.png`) and unknown extensions count as
//!   `discarded` without a probe
//! - eligible sources (`.webp`, `.gif`) end up either `verified` or
//!   `discarded`

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::fingerprint::Fingerprint;
use crate::http::{FetchError, HttpClient, classify_error};
use crate::retry::{FailureType, RetryDecision, RetryPolicy, retry_with_backoff};
use crate::site::Site;

#[allow(clippy::expect_used)]
static IMAGE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img, source").expect("image selector is valid"));

/// Default minimum image size (10 KB).
pub const DEFAULT_MIN_SIZE_BYTES: u64 = 10 * 1024;

/// Default probe pool width per page.
pub const DEFAULT_PROBE_WORKERS: usize = 8;

/// A verified, downloadable image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    /// Absolute image URL.
    pub url: String,
    /// Size reported by the probe.
    pub size_bytes: u64,
    /// Album owner handle.
    pub owner: String,
    /// Sanitized album title.
    pub title: String,
}

impl Candidate {
    /// Dedup key for this candidate.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of_url(&self.url)
    }
}

/// How a source is treated, based on its file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Full-size media worth probing.
    Full,
    /// Preview image; discarded.
    Thumbnail,
    /// Anything else; discarded.
    Invalid,
}

/// Classifies a source URL by the extension of its path.
#[must_use]
pub fn classify_source(url: &Url) -> SourceKind {
    let extension = url
        .path()
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("webp" | "gif") => SourceKind::Full,
        Some("jpg" | "jpeg" | "png") => SourceKind::Thumbnail,
        _ => SourceKind::Invalid,
    }
}

/// Collects the effective source of every `<img>` and `<source>` element.
///
/// The first `srcset` candidate wins over `src`. Sources are resolved against
/// the site origin, the placeholder is dropped, and repeats of the same URL
/// on one page are kept once.
#[must_use]
pub fn collect_sources(html: &str, site: &Site) -> Vec<Url> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut sources = Vec::new();

    for element in document.select(&IMAGE_SELECTOR) {
        let element = element.value();
        let raw = element
            .attr("srcset")
            .and_then(first_srcset_url)
            .or_else(|| element.attr("src").map(str::trim))
            .filter(|s| !s.is_empty());

        let Some(url) = raw.and_then(|raw| site.resolve(raw)) else {
            continue;
        };
        if site.is_placeholder(&url) {
            continue;
        }
        if seen.insert(url.to_string()) {
            sources.push(url);
        }
    }

    sources
}

fn first_srcset_url(srcset: &str) -> Option<&str> {
    srcset
        .split(',')
        .next()
        .and_then(|first| first.split_whitespace().next())
}

/// Options for page extraction.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Minimum accepted size; equal sizes pass.
    pub min_size_bytes: u64,
    /// Probe pool width.
    pub probe_workers: usize,
    /// Retry policy for each probe.
    pub probe_policy: RetryPolicy,
    /// Retry policy for the page fetch.
    pub page_policy: RetryPolicy,
    /// Re-fetch the page while it shows fewer full-size sources than this.
    pub expected_per_page: Option<usize>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            min_size_bytes: DEFAULT_MIN_SIZE_BYTES,
            probe_workers: DEFAULT_PROBE_WORKERS,
            probe_policy: RetryPolicy::probe(),
            page_policy: RetryPolicy::page_fetch(),
            expected_per_page: None,
        }
    }
}

/// Result of extracting one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageReport {
    /// Candidates that passed verification, in completion order.
    pub verified: Vec<Candidate>,
    /// Sources seen on the page.
    pub total_seen: usize,
    /// Sources discarded by classification or verification.
    pub discarded: usize,
}

impl PageReport {
    /// Folds another report into this one.
    pub fn absorb(&mut self, other: PageReport) {
        self.verified.extend(other.verified);
        self.total_seen += other.total_seen;
        self.discarded += other.discarded;
    }

    /// Sum of verified candidate sizes.
    #[must_use]
    pub fn verified_bytes(&self) -> u64 {
        self.verified.iter().map(|c| c.size_bytes).sum()
    }
}

/// Errors that fail a single page.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The page could not be fetched within the retry budget.
    #[error("failed to fetch page {url} after {attempts} attempt(s): {source}")]
    Fetch {
        /// The page URL.
        url: String,
        /// Attempts made.
        attempts: u32,
        /// The last error.
        #[source]
        source: FetchError,
    },
}

/// Outcome of verifying one source.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ProbeOutcome {
    Verified(u64),
    Rejected(String),
}

/// Extracts and verifies candidates from album pages.
#[derive(Debug, Clone)]
pub struct PageExtractor {
    client: HttpClient,
    site: Site,
    options: ExtractOptions,
}

impl PageExtractor {
    /// Creates an extractor.
    #[must_use]
    pub fn new(client: HttpClient, site: Site, options: ExtractOptions) -> Self {
        Self {
            client,
            site,
            options,
        }
    }

    /// Returns the extraction options.
    #[must_use]
    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    /// Fetches `page_url`, classifies its sources, and probes the eligible ones.
    ///
    /// `owner` and `title` are stamped onto every verified candidate.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Fetch`] if the page itself cannot be fetched.
    /// Probe failures never fail the page.
    #[instrument(skip(self, owner, title), fields(page_url = %page_url))]
    pub async fn extract_page(
        &self,
        page_url: &str,
        owner: &str,
        title: &str,
    ) -> Result<PageReport, ExtractError> {
        let sources = self.fetch_sources(page_url).await?;

        let mut report = PageReport {
            total_seen: sources.len(),
            ..PageReport::default()
        };

        let mut eligible = Vec::new();
        for url in sources {
            match classify_source(&url) {
                SourceKind::Full => eligible.push(url),
                SourceKind::Thumbnail | SourceKind::Invalid => report.discarded += 1,
            }
        }
        debug!(
            total_seen = report.total_seen,
            eligible = eligible.len(),
            "sources classified"
        );

        let semaphore = Arc::new(Semaphore::new(self.options.probe_workers.max(1)));
        let mut handles = Vec::with_capacity(eligible.len());

        for url in eligible {
            let semaphore = Arc::clone(&semaphore);
            let client = self.client.clone();
            let policy = self.options.probe_policy.clone();
            let min_size = self.options.min_size_bytes;

            handles.push(tokio::spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => verify_source(&client, url.as_str(), &policy, min_size).await,
                    Err(_) => ProbeOutcome::Rejected("probe pool closed".to_string()),
                };
                (url, outcome)
            }));
        }

        for handle in handles {
            match handle.await {
                Ok((url, ProbeOutcome::Verified(size_bytes))) => {
                    report.verified.push(Candidate {
                        url: url.to_string(),
                        size_bytes,
                        owner: owner.to_string(),
                        title: title.to_string(),
                    });
                }
                Ok((url, ProbeOutcome::Rejected(reason))) => {
                    debug!(url = %url, reason = %reason, "candidate discarded");
                    report.discarded += 1;
                }
                Err(e) => {
                    warn!(error = %e, "probe task panicked");
                    report.discarded += 1;
                }
            }
        }

        info!(
            verified = report.verified.len(),
            total_seen = report.total_seen,
            discarded = report.discarded,
            "page extracted"
        );
        Ok(report)
    }

    async fn fetch_sources(&self, page_url: &str) -> Result<Vec<Url>, ExtractError> {
        let html = self.fetch_page(page_url).await?;
        let mut best = collect_sources(&html, &self.site);

        let Some(expected) = self.options.expected_per_page else {
            return Ok(best);
        };

        let mut attempt = 1;
        while full_count(&best) < expected {
            let RetryDecision::Retry { delay, attempt: next } = self
                .options
                .page_policy
                .should_retry(FailureType::Transient, attempt)
            else {
                break;
            };
            attempt = next;
            debug!(
                found = full_count(&best),
                expected,
                attempt,
                "page shorter than expected, re-fetching"
            );
            tokio::time::sleep(delay).await;

            match self.client.fetch_text(page_url).await {
                Ok(html) => {
                    let sources = collect_sources(&html, &self.site);
                    if full_count(&sources) > full_count(&best) {
                        best = sources;
                    }
                }
                Err(error) => debug!(error = %error, "re-fetch failed, keeping earlier result"),
            }
        }

        Ok(best)
    }

    async fn fetch_page(&self, page_url: &str) -> Result<String, ExtractError> {
        retry_with_backoff(
            &self.options.page_policy,
            "page fetch",
            |_| self.client.fetch_text(page_url),
            classify_error,
        )
        .await
        .map_err(|failure| ExtractError::Fetch {
            url: page_url.to_string(),
            attempts: failure.attempts,
            source: failure.error,
        })
    }
}

fn full_count(sources: &[Url]) -> usize {
    sources
        .iter()
        .filter(|url| classify_source(url) == SourceKind::Full)
        .count()
}

async fn verify_source(
    client: &HttpClient,
    url: &str,
    policy: &RetryPolicy,
    min_size: u64,
) -> ProbeOutcome {
    let probe = match retry_with_backoff(policy, "probe", |_| client.probe(url), classify_error)
        .await
    {
        Ok(probe) => probe,
        Err(failure) => return ProbeOutcome::Rejected(failure.to_string()),
    };

    if probe.status != 200 {
        return ProbeOutcome::Rejected(format!("status {}", probe.status));
    }
    if !probe.is_image() {
        return ProbeOutcome::Rejected(format!("content type {:?}", probe.content_type));
    }
    let size = probe.content_length.unwrap_or(0);
    if size < min_size {
        return ProbeOutcome::Rejected(format!("{size} bytes below {min_size}"));
    }
    ProbeOutcome::Verified(size)
}
