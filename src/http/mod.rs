//! HTTP access to the gallery site.
//!
//! # Features
//!
//! - Text fetches for album pages
//! - Header-only probes for image size and type
//! - Streaming image downloads with content-length verification
//! - Structured error types with retry classification
//!
//! # Example
//!
//! ```no_run
//! use tape_fetcher_core::http::HttpClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new();
//! let probe = client.probe("https://imgsrc.ru/images/a.webp").await?;
//! println!("{:?} bytes", probe.content_length);
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod error;

pub use client::{DownloadedBody, HttpClient, ProbeResponse, is_image_content_type};
pub use constants::{
    DOWNLOAD_CONNECT_TIMEOUT_SECS, DOWNLOAD_READ_TIMEOUT_SECS, PAGE_CONNECT_TIMEOUT_SECS,
    PAGE_READ_TIMEOUT_SECS,
};
pub use error::{FetchError, classify_error};
