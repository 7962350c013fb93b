//! Timeout constants for the HTTP clients.

/// Connect timeout for album pages and probes (10 seconds).
pub const PAGE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Read timeout for album pages and probes (30 seconds).
pub const PAGE_READ_TIMEOUT_SECS: u64 = 30;

/// Connect timeout for image downloads (30 seconds).
pub const DOWNLOAD_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Read timeout for image downloads (5 minutes for large animations).
pub const DOWNLOAD_READ_TIMEOUT_SECS: u64 = 300;
