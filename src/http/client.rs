//! HTTP client wrapper for album pages, image probes, and image bodies.
//!
//! This module provides the `HttpClient` struct which owns a pooled reqwest
//! client configured with the site's expectations (browser User-Agent,
//! timeouts, gzip) and maps transport failures onto [`FetchError`].

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};
use url::Url;

use super::constants::{
    DOWNLOAD_CONNECT_TIMEOUT_SECS, DOWNLOAD_READ_TIMEOUT_SECS, PAGE_CONNECT_TIMEOUT_SECS,
    PAGE_READ_TIMEOUT_SECS,
};
use super::error::FetchError;
use crate::user_agent;

/// HTTP client for the gallery site.
///
/// Created once per run and cloned into workers; clones share the
/// connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

/// Headers observed by a probe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    /// HTTP status code.
    pub status: u16,
    /// Declared content type, if any.
    pub content_type: Option<String>,
    /// Declared content length, if any.
    pub content_length: Option<u64>,
}

impl ProbeResponse {
    /// Returns true when the declared content type is an image type.
    #[must_use]
    pub fn is_image(&self) -> bool {
        self.content_type.as_deref().is_some_and(is_image_content_type)
    }
}

/// Result of writing a response body to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedBody {
    /// Bytes written to disk.
    pub bytes: u64,
    /// Declared content length, if any.
    pub content_length: Option<u64>,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a client with page/probe timeouts (10s connect, 30s read).
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new() -> Self {
        Self::with_timeouts(PAGE_CONNECT_TIMEOUT_SECS, PAGE_READ_TIMEOUT_SECS)
            .expect("failed to build HTTP client with static configuration")
    }

    /// Creates a client with download timeouts (30s connect, 5min read).
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::ClientBuild`] if the client cannot be built.
    pub fn for_downloads() -> Result<Self, FetchError> {
        Self::with_timeouts(DOWNLOAD_CONNECT_TIMEOUT_SECS, DOWNLOAD_READ_TIMEOUT_SECS)
    }

    /// Creates a client with explicit timeout values.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::ClientBuild`] if the client cannot be built.
    pub fn with_timeouts(
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()
            .map_err(FetchError::ClientBuild)?;
        Ok(Self { client })
    }

    /// Fetches a page and returns its body as text.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on invalid URL, transport failure, or a
    /// non-success status.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let response = self.send_get(url).await?;
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::network(url, e))?;
        debug!(bytes = body.len(), "page fetched");
        Ok(body)
    }

    /// Probes an image URL for its status, content type, and size.
    ///
    /// Issues a GET and inspects only the response headers; the body stream
    /// is dropped unread.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError`] on invalid URL, transport failure, or a
    /// non-success status.
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn probe(&self, url: &str) -> Result<ProbeResponse, FetchError> {
        let response = self.send_get(url).await?;
        let probe = ProbeResponse {
            status: response.status().as_u16(),
            content_type: header_string(&response, CONTENT_TYPE.as_str()),
            content_length: declared_content_length(&response),
        };
        debug!(
            status = probe.status,
            content_type = ?probe.content_type,
            content_length = ?probe.content_length,
            "probe complete"
        );
        Ok(probe)
    }

    /// Downloads an image body to `path`, creating or truncating the file.
    ///
    /// The file is removed again if streaming fails or the byte count does
    /// not match the declared content length.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::NotAnImage`] for non-image content types,
    /// [`FetchError::Integrity`] for short/long bodies, and the usual
    /// transport/status/IO errors otherwise.
    #[instrument(level = "debug", skip(self, path), fields(url = %url, path = %path.display()))]
    pub async fn download_to_path(
        &self,
        url: &str,
        path: &Path,
    ) -> Result<DownloadedBody, FetchError> {
        let response = self.send_get(url).await?;

        let content_type = header_string(&response, CONTENT_TYPE.as_str()).unwrap_or_default();
        if !is_image_content_type(&content_type) {
            return Err(FetchError::not_an_image(url, content_type));
        }

        let content_length = declared_content_length(&response);

        let mut file = File::create(path)
            .await
            .map_err(|e| FetchError::io(path, e))?;

        let streamed = stream_to_file(&mut file, response, url, path).await;
        let bytes = match streamed {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!("cleaning up partial file after error");
                let _ = tokio::fs::remove_file(path).await;
                return Err(e);
            }
        };

        if let Err(e) = verify_length(path, content_length, bytes) {
            let _ = tokio::fs::remove_file(path).await;
            return Err(e);
        }

        Ok(DownloadedBody {
            bytes,
            content_length,
        })
    }

    async fn send_get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        Url::parse(url).map_err(|_| FetchError::invalid_url(url))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::network(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::http_status(url, status.as_u16()));
        }

        Ok(response)
    }
}

/// Returns true when `content_type` names an image media type.
#[must_use]
pub fn is_image_content_type(content_type: &str) -> bool {
    content_type
        .trim()
        .to_ascii_lowercase()
        .starts_with("image/")
}

fn header_string(response: &reqwest::Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(std::string::ToString::to_string)
}

fn declared_content_length(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .or_else(|| response.content_length())
}

/// Checks a written byte count against the declared content length.
fn verify_length(path: &Path, declared: Option<u64>, written: u64) -> Result<(), FetchError> {
    match declared {
        Some(expected) if expected != written => {
            Err(FetchError::integrity(path, expected, written))
        }
        _ => Ok(()),
    }
}

/// Streams response body to file, returning bytes written.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, FetchError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| FetchError::network(url, e))?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| FetchError::io(file_path, e))?;

        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| FetchError::io(file_path, e))?;

    Ok(bytes_written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;
    use wiremock::matchers::{header_regex, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn can_bind_localhost() -> bool {
        std::net::TcpListener::bind("127.0.0.1:0").is_ok()
    }

    #[test]
    fn test_is_image_content_type() {
        assert!(is_image_content_type("image/webp"));
        assert!(is_image_content_type("IMAGE/GIF; charset=binary"));
        assert!(!is_image_content_type("text/html"));
        assert!(!is_image_content_type(""));
    }

    #[test]
    fn test_verify_length() {
        let path = Path::new("/tmp/a.webp");
        assert!(verify_length(path, None, 10).is_ok());
        assert!(verify_length(path, Some(10), 10).is_ok());
        assert!(matches!(
            verify_length(path, Some(20_000), 9_000),
            Err(FetchError::Integrity {
                expected_bytes: 20_000,
                actual_bytes: 9_000,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_fetch_text_returns_body() {
        if !can_bind_localhost() {
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>ok</html>"))
            .mount(&server)
            .await;

        let client = HttpClient::new();
        let body = client
            .fetch_text(&format!("{}/page.html", server.uri()))
            .await
            .unwrap();
        assert_eq!(body, "<html>ok</html>");
    }

    #[tokio::test]
    async fn test_fetch_text_maps_status_errors() {
        if !can_bind_localhost() {
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = HttpClient::new();
        let result = client.fetch_text(&format!("{}/page.html", server.uri())).await;
        assert!(matches!(
            result,
            Err(FetchError::HttpStatus { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_text_invalid_url() {
        let client = HttpClient::new();
        let result = client.fetch_text("not a url").await;
        assert!(matches!(result, Err(FetchError::InvalidUrl { .. })));
    }

    #[tokio::test]
    async fn test_requests_send_browser_user_agent() {
        if !can_bind_localhost() {
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header_regex("user-agent", "^Mozilla/5.0"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = HttpClient::new();
        let body = client.fetch_text(&format!("{}/", server.uri())).await.unwrap();
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_probe_reports_size_and_type() {
        if !can_bind_localhost() {
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.webp"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(vec![7u8; 2048], "image/webp"),
            )
            .mount(&server)
            .await;

        let client = HttpClient::new();
        let probe = client
            .probe(&format!("{}/a.webp", server.uri()))
            .await
            .unwrap();
        assert_eq!(probe.status, 200);
        assert_eq!(probe.content_length, Some(2048));
        assert!(probe.is_image());
    }

    #[tokio::test]
    async fn test_download_to_path_writes_body() {
        if !can_bind_localhost() {
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.gif"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(b"GIF89a".to_vec(), "image/gif"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a.gif");
        let client = HttpClient::new();
        let body = client
            .download_to_path(&format!("{}/a.gif", server.uri()), &target)
            .await
            .unwrap();

        assert_eq!(body.bytes, 6);
        assert_eq!(std::fs::read(&target).unwrap(), b"GIF89a");
    }

    #[tokio::test]
    async fn test_download_to_path_rejects_html() {
        if !can_bind_localhost() {
            return;
        }
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw(b"<html/>".to_vec(), "text/html"),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("a.webp");
        let client = HttpClient::new();
        let result = client
            .download_to_path(&format!("{}/a.webp", server.uri()), &target)
            .await;

        assert!(matches!(result, Err(FetchError::NotAnImage { .. })));
        assert!(!target.exists(), "no file should be created for non-images");
    }
}
