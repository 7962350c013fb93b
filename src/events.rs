//! Typed progress events for the external caller.
//!
//! Every long-running component takes an [`EventSink`]. Emitting never
//! blocks and never fails: with no listener attached, events are dropped.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::extract::Candidate;

/// Events emitted while a run is in progress.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Free-text status line.
    Progress {
        /// Message for display.
        message: String,
    },
    /// A gallery failed; the run continues with the next one.
    GalleryError {
        /// The gallery entry URL.
        gallery: String,
        /// Error description.
        message: String,
    },
    /// The album title was resolved.
    AlbumTitle {
        /// The gallery entry URL.
        gallery: String,
        /// Sanitized title.
        title: String,
    },
    /// The album owner was resolved.
    AlbumOwner {
        /// The gallery entry URL.
        gallery: String,
        /// Owner handle.
        owner: String,
    },
    /// One album page finished scanning.
    PageScanned {
        /// 1-based number of pages finished so far.
        page: usize,
        /// Total pages in the album.
        total_pages: usize,
        /// Running count of verified candidates in the album.
        verified: usize,
        /// Running count of discarded sources in the album.
        discarded: usize,
    },
    /// Verified candidates for one gallery.
    CandidateBatch {
        /// The gallery entry URL.
        gallery: String,
        /// Verified candidates.
        candidates: Vec<Candidate>,
        /// Image sources seen.
        total_seen: usize,
        /// Sources discarded.
        discarded: usize,
    },
    /// A file was written.
    Downloaded {
        /// Source URL.
        url: String,
        /// Destination path.
        path: String,
        /// Bytes written.
        bytes: u64,
    },
    /// A candidate was skipped.
    Skipped {
        /// Source URL.
        url: String,
        /// Timestamp of the earlier download, when known.
        previous_download: Option<String>,
    },
    /// A candidate failed to download, or its ledger write failed.
    DownloadFailed {
        /// Source URL.
        url: String,
        /// Error description.
        message: String,
    },
    /// Totals for one gallery.
    GallerySummary(GallerySummary),
    /// Totals for the whole run.
    RunSummary(RunTotals),
}

/// Per-gallery search totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GallerySummary {
    /// The gallery entry URL.
    pub gallery: String,
    /// Verified candidates found.
    pub valid: usize,
    /// Image sources seen.
    pub total_seen: usize,
    /// Sources discarded.
    pub discarded: usize,
    /// Pages that could not be fetched.
    pub page_errors: usize,
    /// Sum of verified candidate sizes, in megabytes.
    pub total_megabytes: f64,
}

/// Cross-gallery totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunTotals {
    /// Galleries requested.
    pub galleries: usize,
    /// Galleries that failed.
    pub gallery_errors: usize,
    /// Verified candidates found.
    pub valid: usize,
    /// Sources discarded.
    pub discarded: usize,
    /// Pages that could not be fetched, across all galleries.
    pub page_errors: usize,
    /// Sum of verified candidate sizes, in megabytes.
    pub total_megabytes: f64,
    /// Files downloaded (combined mode only).
    pub downloaded: usize,
    /// Candidates skipped (combined mode only).
    pub skipped: usize,
    /// Download errors (combined mode only).
    pub download_errors: usize,
    /// Files written whose ledger record failed (combined mode only).
    pub ledger_errors: usize,
    /// Set when the run stopped early on request.
    pub cancelled: bool,
}

/// Non-blocking event emitter.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<mpsc::UnboundedSender<PipelineEvent>>,
}

impl EventSink {
    /// Creates a sink and the receiver the caller drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// Creates a sink that drops every event.
    #[must_use]
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    /// Sends an event; a closed or missing receiver is ignored.
    pub fn emit(&self, event: PipelineEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }

    /// Shorthand for a [`PipelineEvent::Progress`] line.
    pub fn progress(&self, message: impl Into<String>) {
        self.emit(PipelineEvent::Progress {
            message: message.into(),
        });
    }
}

/// Converts a byte count to megabytes.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
