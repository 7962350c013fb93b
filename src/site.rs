//! Fixed URL and markup conventions of the gallery site.
//!
//! Album ("tape") links look like `/<owner>/tape-<n>-<n>-<n>.html`, optionally
//! followed by `?pwd=<password>`. Pagination links within an album use the
//! same `tape-*.html` shape. Relative and protocol-relative hrefs are resolved
//! against the site origin, which is injectable so tests can point the whole
//! pipeline at a mock server.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;
use url::Url;

/// Production origin of the gallery site.
pub const DEFAULT_ORIGIN: &str = "https://imgsrc.ru";

/// Spacer image the site embeds on every page; never a real candidate.
pub const PLACEHOLDER_PATH: &str = "/images/1.gif";

/// Separator between the album title and the site suffix in `<title>`.
pub const TITLE_SEPARATOR: char = '@';

#[allow(clippy::expect_used)]
static TAPE_PATH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/[^/?#]+/tape-\d+-\d+-\d+\.html(\?pwd=[^&#]*)?$")
        .expect("tape regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static PAGE_PATH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/[^/?#]+/tape-[A-Za-z0-9_-]+\.html(\?pwd=[^&#]*)?$")
        .expect("page regex is valid") // Static pattern, safe to panic
});

/// The gallery site: its origin plus the link conventions applied to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    origin: Url,
}

impl Default for Site {
    #[allow(clippy::expect_used)]
    fn default() -> Self {
        Self::new(DEFAULT_ORIGIN).expect("default origin is a valid URL") // Static URL, safe to panic
    }
}

impl Site {
    /// Creates a site rooted at `origin`.
    ///
    /// # Errors
    ///
    /// Returns the parse error if `origin` is not an absolute URL.
    pub fn new(origin: &str) -> Result<Self, url::ParseError> {
        let mut origin = Url::parse(origin)?;
        origin.set_path("/");
        origin.set_query(None);
        origin.set_fragment(None);
        Ok(Self { origin })
    }

    /// Returns the site origin.
    #[must_use]
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Resolves an href (absolute, protocol-relative, root-relative, or
    /// relative) against the origin. Non-HTTP schemes yield `None`.
    #[must_use]
    pub fn resolve(&self, href: &str) -> Option<Url> {
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') {
            return None;
        }
        let mut url = self.origin.join(href).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        url.set_fragment(None);
        Some(url)
    }

    /// Returns true when `url` points at this site's host and port.
    #[must_use]
    pub fn is_on_site(&self, url: &Url) -> bool {
        url.host_str() == self.origin.host_str()
            && url.port_or_known_default() == self.origin.port_or_known_default()
    }

    /// Resolves `href` and returns it if it is an album (tape) link.
    #[must_use]
    pub fn tape_link(&self, href: &str) -> Option<Url> {
        self.resolve(href)
            .filter(|url| self.is_on_site(url) && TAPE_PATH_PATTERN.is_match(&path_and_query(url)))
    }

    /// Resolves `href` and returns it if it is an album pagination link.
    #[must_use]
    pub fn page_link(&self, href: &str) -> Option<Url> {
        self.resolve(href)
            .filter(|url| self.is_on_site(url) && PAGE_PATH_PATTERN.is_match(&path_and_query(url)))
    }

    /// Returns true for the site's placeholder spacer image.
    #[must_use]
    pub fn is_placeholder(&self, url: &Url) -> bool {
        self.is_on_site(url) && url.path() == PLACEHOLDER_PATH
    }
}

fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{query}", url.path()),
        None => url.path().to_string(),
    }
}

/// Extracts the owner handle (first path segment) from an album URL.
#[must_use]
pub fn owner_from_url(url: &Url) -> Option<String> {
    url.path_segments()?
        .next()
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            urlencoding::decode(segment)
                .map(std::borrow::Cow::into_owned)
                .unwrap_or_else(|_| segment.to_string())
        })
}

/// Turns a page `<title>` into a filesystem-safe album folder name.
///
/// Takes the text before [`TITLE_SEPARATOR`], strips diacritics and
/// punctuation, and joins words with `_`. Falls back to `album_<unix time>`
/// when nothing survives.
#[must_use]
pub fn album_title_slug(raw_title: &str) -> String {
    let head = raw_title.split(TITLE_SEPARATOR).next().unwrap_or_default();
    let slug = slugify(head);
    if slug.is_empty() {
        fallback_album_name()
    } else {
        slug
    }
}

/// Strips diacritics and punctuation, collapsing whitespace runs to `_`.
#[must_use]
pub fn slugify(text: &str) -> String {
    let cleaned: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter_map(|c| {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                Some(c)
            } else if c.is_whitespace() {
                Some(' ')
            } else {
                None
            }
        })
        .collect();

    cleaned
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .trim_matches('_')
        .to_string()
}

fn fallback_album_name() -> String {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("album_{timestamp}")
}
