//! Shared User-Agent strings for site and image requests.
//!
//! The gallery site serves reduced markup (and sometimes nothing) to clients
//! that do not look like a browser, so every request carries a browser-like
//! User-Agent with the tool name appended as a product token.

/// Browser User-Agent prefix sent with every request.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Default User-Agent: browser prefix plus `tape-fetcher/<version>`.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("{BROWSER_USER_AGENT} tape-fetcher/{version}")
}
