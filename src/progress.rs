//! Progress UI driven by pipeline events.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tape_fetcher_core::PipelineEvent;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

/// Drains `events` until every sender is dropped.
///
/// With `use_spinner` a spinner shows the latest status line; otherwise each
/// event is only logged.
pub(crate) fn spawn_progress_ui(
    use_spinner: bool,
    mut events: UnboundedReceiver<PipelineEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let spinner = use_spinner.then(|| {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::with_template("{spinner} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            spinner.enable_steady_tick(Duration::from_millis(100));
            spinner
        });

        while let Some(event) = events.recv().await {
            log_event(&event);
            if let Some(spinner) = &spinner
                && let Some(line) = status_line(&event)
            {
                spinner.set_message(line);
            }
        }

        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }
    })
}

/// One-line status text for the spinner, if the event warrants one.
pub(crate) fn status_line(event: &PipelineEvent) -> Option<String> {
    match event {
        PipelineEvent::Progress { message } => Some(message.clone()),
        PipelineEvent::AlbumTitle { title, .. } => Some(format!("Album: {title}")),
        PipelineEvent::PageScanned {
            page,
            total_pages,
            verified,
            discarded,
        } => Some(format!(
            "[{page}/{total_pages}] pages scanned, {verified} valid, {discarded} discarded"
        )),
        PipelineEvent::Downloaded { path, .. } => Some(format!("Saved {path}")),
        _ => None,
    }
}

fn log_event(event: &PipelineEvent) {
    match event {
        PipelineEvent::Progress { message } => debug!(%message, "progress"),
        PipelineEvent::GalleryError { gallery, message } => {
            warn!(%gallery, %message, "gallery skipped");
        }
        PipelineEvent::AlbumOwner { gallery, owner } => info!(%gallery, %owner, "album owner"),
        PipelineEvent::AlbumTitle { gallery, title } => info!(%gallery, %title, "album title"),
        PipelineEvent::PageScanned { .. } | PipelineEvent::CandidateBatch { .. } => {}
        PipelineEvent::Downloaded { url, path, bytes } => {
            debug!(%url, %path, bytes, "downloaded");
        }
        PipelineEvent::Skipped {
            url,
            previous_download,
        } => debug!(%url, previous_download = ?previous_download, "skipped"),
        PipelineEvent::DownloadFailed { url, message } => {
            warn!(%url, %message, "download failed");
        }
        PipelineEvent::GallerySummary(summary) => info!(
            gallery = %summary.gallery,
            valid = summary.valid,
            total_seen = summary.total_seen,
            discarded = summary.discarded,
            page_errors = summary.page_errors,
            megabytes = summary.total_megabytes,
            "gallery scanned"
        ),
        PipelineEvent::RunSummary(totals) => debug!(?totals, "run summary"),
    }
}
