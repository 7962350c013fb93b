//! Link discovery: from a gallery entry URL to a fully enumerated album.
//!
//! The entry page links to the album ("tape") page; the tape page carries the
//! album title and links to every pagination sub-page. Page fetches are
//! retried on transient failures; a missing tape link fails only the gallery
//! being resolved.

use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};
use url::Url;

use crate::http::{FetchError, HttpClient, classify_error};
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::site::{Site, album_title_slug, owner_from_url};

#[allow(clippy::expect_used)]
static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("anchor selector is valid"));

#[allow(clippy::expect_used)]
static TITLE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("title selector is valid"));

/// A resolved album: where it came from, who owns it, and every page in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumRef {
    /// The URL the caller supplied.
    pub entry_url: String,
    /// Canonical album URL.
    pub tape_url: String,
    /// Owner handle (first path segment of the tape URL).
    pub owner: String,
    /// Filesystem-safe album title.
    pub title: String,
    /// Album pages in discovery order; the tape URL is always first.
    pub page_urls: Vec<String>,
}

/// Errors that fail the resolution of a single gallery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The entry URL could not be parsed.
    #[error("invalid gallery URL: {url}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
    },

    /// A page could not be fetched within the retry budget.
    #[error("failed to fetch {url} after {attempts} attempt(s): {source}")]
    Fetch {
        /// The page URL.
        url: String,
        /// Attempts made.
        attempts: u32,
        /// The last error.
        #[source]
        source: FetchError,
    },

    /// The entry page had no link matching the album pattern.
    #[error("no album link found on {url}")]
    TapeLinkNotFound {
        /// The entry page URL.
        url: String,
    },

    /// The tape URL has no owner path segment.
    #[error("cannot determine owner from {url}")]
    MissingOwner {
        /// The tape URL.
        url: String,
    },
}

/// Resolves gallery entry URLs into [`AlbumRef`]s.
#[derive(Debug, Clone)]
pub struct AlbumResolver {
    client: HttpClient,
    site: Site,
    retry_policy: RetryPolicy,
}

impl AlbumResolver {
    /// Creates a resolver with the page-fetch retry policy (3 attempts, 3-5s apart).
    #[must_use]
    pub fn new(client: HttpClient, site: Site) -> Self {
        Self {
            client,
            site,
            retry_policy: RetryPolicy::page_fetch(),
        }
    }

    /// Replaces the retry policy used for page fetches.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Resolves `entry_url` into an album.
    ///
    /// With `direct_tape` set, `entry_url` is used as the tape URL and the
    /// entry-page lookup is skipped.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] when the URL is invalid, a page cannot be
    /// fetched, or the entry page has no album link.
    #[instrument(skip(self), fields(entry_url = %entry_url, direct_tape))]
    pub async fn resolve_album(
        &self,
        entry_url: &str,
        direct_tape: bool,
    ) -> Result<AlbumRef, DiscoveryError> {
        let entry = Url::parse(entry_url.trim()).map_err(|_| DiscoveryError::InvalidUrl {
            url: entry_url.to_string(),
        })?;

        let tape_url = if direct_tape {
            entry
        } else {
            let html = self.fetch_page(entry.as_str()).await?;
            find_tape_link(&html, &self.site).ok_or_else(|| DiscoveryError::TapeLinkNotFound {
                url: entry.to_string(),
            })?
        };
        debug!(tape_url = %tape_url, "tape URL resolved");

        let owner = owner_from_url(&tape_url).ok_or_else(|| DiscoveryError::MissingOwner {
            url: tape_url.to_string(),
        })?;

        let html = self.fetch_page(tape_url.as_str()).await?;
        let (raw_title, page_urls) = parse_tape_page(&html, &self.site, &tape_url);
        let title = album_title_slug(&raw_title);

        info!(
            owner = %owner,
            title = %title,
            pages = page_urls.len(),
            "album resolved"
        );

        Ok(AlbumRef {
            entry_url: entry_url.to_string(),
            tape_url: tape_url.to_string(),
            owner,
            title,
            page_urls,
        })
    }

    async fn fetch_page(&self, url: &str) -> Result<String, DiscoveryError> {
        retry_with_backoff(
            &self.retry_policy,
            "album page fetch",
            |_| self.client.fetch_text(url),
            classify_error,
        )
        .await
        .map_err(|failure| DiscoveryError::Fetch {
            url: url.to_string(),
            attempts: failure.attempts,
            source: failure.error,
        })
    }
}

/// Returns the first anchor on the page that points at an album.
#[must_use]
pub fn find_tape_link(html: &str, site: &Site) -> Option<Url> {
    let document = Html::parse_document(html);
    document
        .select(&ANCHOR_SELECTOR)
        .filter_map(|a| a.value().attr("href"))
        .find_map(|href| site.tape_link(href))
}

/// Extracts the raw `<title>` text and the ordered, deduplicated page list.
///
/// `tape_url` is always the first page.
#[must_use]
pub fn parse_tape_page(html: &str, site: &Site, tape_url: &Url) -> (String, Vec<String>) {
    let document = Html::parse_document(html);

    let raw_title = document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|t| t.text().collect::<String>())
        .unwrap_or_default();

    let mut seen = HashSet::new();
    let mut pages = Vec::new();
    let tape = tape_url.to_string();
    seen.insert(tape.clone());
    pages.push(tape);

    for href in document
        .select(&ANCHOR_SELECTOR)
        .filter_map(|a| a.value().attr("href"))
    {
        if let Some(page) = site.page_link(href) {
            let page = page.to_string();
            if seen.insert(page.clone()) {
                pages.push(page);
            }
        }
    }

    (raw_title, pages)
}
