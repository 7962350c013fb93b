//! Ledger row types.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::fingerprint::Fingerprint;

/// Liveness of a ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerStatus {
    /// The file is believed to exist at its destination path.
    Active,
    /// Reconciliation found the file missing.
    Deleted,
}

impl LedgerStatus {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LedgerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "deleted" => Ok(Self::Deleted),
            _ => Err(format!("invalid ledger status: {s}")),
        }
    }
}

/// A persisted download record.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct LedgerEntry {
    /// Row identifier.
    pub id: i64,
    /// Hex fingerprint of `source_url`.
    pub fingerprint: String,
    /// File name on disk.
    pub filename: String,
    /// Album owner handle.
    pub owner: String,
    /// Source URL (unique).
    pub source_url: String,
    /// `SQLite` datetime of the (latest) download.
    pub downloaded_at: String,
    /// Full path the file was written to.
    pub destination_path: String,
    /// `active` or `deleted`.
    pub status: String,
}

impl LedgerEntry {
    /// Parses the status column.
    #[must_use]
    pub fn status(&self) -> Option<LedgerStatus> {
        self.status.parse().ok()
    }

    /// Returns the row's fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::from_hex(&self.fingerprint)
    }

    /// Returns the `owner - folder` label used to group history.
    ///
    /// The folder is the name of the directory containing the file.
    #[must_use]
    pub fn gallery_label(&self) -> String {
        let folder = Path::new(&self.destination_path)
            .parent()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{} - {}", self.owner, folder)
    }
}

/// Data for recording a successful download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLedgerEntry {
    /// Fingerprint of `source_url`.
    pub fingerprint: Fingerprint,
    /// File name on disk.
    pub filename: String,
    /// Album owner handle.
    pub owner: String,
    /// Source URL.
    pub source_url: String,
    /// Where the file was written.
    pub destination_path: PathBuf,
}

impl NewLedgerEntry {
    /// Builds an entry, deriving the fingerprint from `source_url`.
    #[must_use]
    pub fn new(
        source_url: impl Into<String>,
        owner: impl Into<String>,
        destination_path: impl Into<PathBuf>,
    ) -> Self {
        let source_url = source_url.into();
        let destination_path = destination_path.into();
        let filename = destination_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            fingerprint: Fingerprint::of_url(&source_url),
            filename,
            owner: owner.into(),
            source_url,
            destination_path,
        }
    }
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Active rows examined.
    pub checked: usize,
    /// Rows transitioned to `deleted`.
    pub marked_deleted: usize,
}
