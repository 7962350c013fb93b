//! Shared helpers for integration tests.
#![allow(dead_code)]

pub mod socket_guard;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tape_fetcher_core::{Database, Ledger, RetryPolicies, RetryPolicy};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::ResponseTemplate;

/// Retry policy with no delay, for fast failure-path tests.
pub fn instant_policy(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::ZERO, Duration::ZERO, 1.0).with_jitter(Duration::ZERO)
}

/// Instant policies for every network layer.
pub fn instant_policies() -> RetryPolicies {
    RetryPolicies {
        page: instant_policy(3),
        probe: instant_policy(3),
        download: instant_policy(3),
    }
}

/// Ledger over a fresh in-memory database.
pub async fn memory_ledger() -> Arc<Ledger> {
    let db = Database::new_in_memory().await.unwrap();
    Arc::new(Ledger::open(db, None).await.unwrap())
}

/// An album page with the given title, pagination links and image sources.
pub fn album_page_html(title: &str, page_links: &[String], images: &[String]) -> String {
    let mut html = format!("<html><head><title>{title} @ iMGSRC.RU</title></head><body>\n");
    html.push_str("<img src=\"/images/1.gif\">\n");
    for (index, link) in page_links.iter().enumerate() {
        html.push_str(&format!("<a href=\"{link}\">{}</a>\n", index + 1));
    }
    for image in images {
        html.push_str(&format!("<img src=\"{image}\">\n"));
    }
    html.push_str("</body></html>");
    html
}

/// `count` full-size `.webp` sources under `/img/<owner>/`, prefixed by `tag`.
pub fn webp_sources(owner: &str, tag: &str, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("/img/{owner}/{tag}_{i}.webp"))
        .collect()
}

/// `count` thumbnail `.jpg` sources under `/thumb/<owner>/`.
pub fn jpg_sources(owner: &str, tag: &str, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("/thumb/{owner}/{tag}_{i}.jpg"))
        .collect()
}

/// A 200 image response of `size` bytes.
pub fn image_response(size: usize) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(vec![7u8; size], "image/webp")
}

/// Serves every request an image whose body stops after `sent` of the
/// `declared` bytes. Returns the base URL and a connection counter.
pub async fn spawn_truncating_server(declared: usize, sent: usize) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut request = [0u8; 4096];
                let _ = socket.read(&mut request).await;
                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: image/webp\r\n\
                     Content-Length: {declared}\r\nConnection: close\r\n\r\n"
                );
                let _ = socket.write_all(head.as_bytes()).await;
                let _ = socket.write_all(&vec![7u8; sent]).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    (format!("http://{addr}"), hits)
}
