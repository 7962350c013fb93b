//! Fingerprint ledger: the record of what has already been downloaded.
//!
//! # Overview
//!
//! The ledger combines three layers:
//! - [`LedgerStore`] - the authoritative `downloads` table
//! - an optional [`FingerprintCache`] shared across processes
//! - an in-memory map of active fingerprints, loaded at open and refreshed
//!   after each reconciliation
//!
//! Writes go durable store first, then cache, then memory, under a single
//! writer lock. Reads never touch the durable store.
//!
//! # Example
//!
//! ```ignore
//! use tape_fetcher_core::{Database, Fingerprint, Ledger, NewLedgerEntry};
//!
//! let ledger = Ledger::open(Database::new_in_memory().await?, None).await?;
//! let url = "https://imgsrc.ru/jdoe/1.webp";
//! ledger.record_download(&NewLedgerEntry::new(url, "jdoe", "/data/1.webp")).await?;
//! assert!(ledger.is_downloaded(&Fingerprint::of_url(url)).await);
//! ```

mod cache;
mod entry;
mod error;
mod store;

pub use cache::{CACHE_NAMESPACE, FingerprintCache, MemoryCache, RedisCache, connect_cache};
pub use entry::{LedgerEntry, LedgerStatus, NewLedgerEntry, ReconcileReport};
pub use error::{CacheError, LedgerDbErrorKind, LedgerError};
pub use store::LedgerStore;

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::db::Database;
use crate::fingerprint::Fingerprint;

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Process-wide download ledger.
///
/// Constructed once per run and shared behind an `Arc`.
#[derive(Debug)]
pub struct Ledger {
    store: LedgerStore,
    cache: Option<Arc<dyn FingerprintCache>>,
    active: DashMap<Fingerprint, String>,
    writer: Mutex<()>,
}

impl Ledger {
    /// Opens the ledger and loads the active fingerprint set.
    ///
    /// The cache, if given, is pinged once; an unreachable cache is dropped
    /// with a single warning.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the active rows cannot be loaded.
    #[instrument(skip(db, cache), fields(has_cache = cache.is_some()))]
    pub async fn open(db: Database, cache: Option<Arc<dyn FingerprintCache>>) -> Result<Self> {
        let cache = match cache {
            Some(cache) => match cache.ping().await {
                Ok(()) => Some(cache),
                Err(error) => {
                    warn!(error = %error, "fingerprint cache unreachable, using database only");
                    None
                }
            },
            None => None,
        };

        let ledger = Self {
            store: LedgerStore::new(db),
            cache,
            active: DashMap::new(),
            writer: Mutex::new(()),
        };
        ledger.reload_active().await?;
        info!(active = ledger.active.len(), "ledger opened");
        Ok(ledger)
    }

    /// Returns true when a shared cache is attached.
    #[must_use]
    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    /// Number of fingerprints in the in-memory active set.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Returns true if the fingerprint has an active download.
    ///
    /// Checks memory first, then the shared cache. Cache errors count as a miss.
    pub async fn is_downloaded(&self, fingerprint: &Fingerprint) -> bool {
        self.previous_download(fingerprint).await.is_some()
    }

    /// Returns the download timestamp recorded for a fingerprint, if any.
    pub async fn previous_download(&self, fingerprint: &Fingerprint) -> Option<String> {
        if let Some(ts) = self.active.get(fingerprint) {
            return Some(ts.value().clone());
        }
        let cache = self.cache.as_ref()?;
        match cache.lookup(fingerprint).await {
            Ok(hit) => hit,
            Err(error) => {
                debug!(fingerprint = %fingerprint, error = %error, "cache lookup failed");
                None
            }
        }
    }

    /// Records a successful download, returning its stored timestamp.
    ///
    /// Upserts the durable row keyed by source URL, then mirrors the
    /// fingerprint into the cache (best-effort) and the in-memory set.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the durable write fails; the
    /// cache and memory are left untouched in that case.
    #[instrument(skip(self, entry), fields(url = %entry.source_url, fingerprint = %entry.fingerprint))]
    pub async fn record_download(&self, entry: &NewLedgerEntry) -> Result<String> {
        let _guard = self.writer.lock().await;

        let downloaded_at = self.store.upsert(entry).await?;

        if let Some(cache) = &self.cache
            && let Err(error) = cache.insert(&entry.fingerprint, &downloaded_at).await
        {
            warn!(error = %error, "cache insert failed");
        }

        self.active.insert(entry.fingerprint.clone(), downloaded_at.clone());
        debug!("download recorded");
        Ok(downloaded_at)
    }

    /// Marks rows whose files are gone as deleted and refreshes the active set.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if reading or updating rows fails.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let _guard = self.writer.lock().await;

        let rows = self.store.list_by_status(LedgerStatus::Active).await?;
        let mut report = ReconcileReport {
            checked: rows.len(),
            marked_deleted: 0,
        };

        for row in rows {
            let exists = match tokio::fs::try_exists(&row.destination_path).await {
                Ok(exists) => exists,
                Err(error) => {
                    debug!(path = %row.destination_path, error = %error, "cannot stat file, keeping row");
                    true
                }
            };
            if exists {
                continue;
            }

            self.store.mark_deleted(row.id).await?;
            let fingerprint = row.fingerprint();
            if let Some(cache) = &self.cache
                && let Err(error) = cache.remove(&fingerprint).await
            {
                warn!(fingerprint = %fingerprint, error = %error, "cache remove failed");
            }
            self.active.remove(&fingerprint);
            report.marked_deleted += 1;
            debug!(path = %row.destination_path, "file missing, marked deleted");
        }

        self.reload_active().await?;
        info!(
            checked = report.checked,
            marked_deleted = report.marked_deleted,
            "ledger reconciled"
        );
        Ok(report)
    }

    /// Wipes every row and the cache namespace, returning the rows removed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<u64> {
        let _guard = self.writer.lock().await;

        let removed = self.store.clear().await?;
        if let Some(cache) = &self.cache
            && let Err(error) = cache.clear().await
        {
            warn!(error = %error, "cache clear failed");
        }
        self.active.clear();
        info!(removed, "ledger cleared");
        Ok(removed)
    }

    /// Returns every row, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the query fails.
    pub async fn entries(&self) -> Result<Vec<LedgerEntry>> {
        self.store.list_all().await
    }

    /// Returns the distinct `owner - folder` labels of active rows, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the query fails.
    pub async fn galleries(&self) -> Result<Vec<String>> {
        let rows = self.store.list_by_status(LedgerStatus::Active).await?;
        let labels: BTreeSet<String> = rows.iter().map(LedgerEntry::gallery_label).collect();
        Ok(labels.into_iter().collect())
    }

    async fn reload_active(&self) -> Result<()> {
        let rows = self.store.list_by_status(LedgerStatus::Active).await?;
        self.active.clear();
        for row in rows {
            self.active.insert(row.fingerprint(), row.downloaded_at);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    async fn ledger_with(cache: Option<Arc<dyn FingerprintCache>>) -> Ledger {
        Ledger::open(Database::new_in_memory().await.unwrap(), cache)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_record_then_is_downloaded() {
        let ledger = ledger_with(None).await;
        let url = "https://imgsrc.ru/jdoe/a.webp";
        let fp = Fingerprint::of_url(url);

        assert!(!ledger.is_downloaded(&fp).await);
        ledger
            .record_download(&NewLedgerEntry::new(url, "jdoe", "/tmp/a.webp"))
            .await
            .unwrap();
        assert!(ledger.is_downloaded(&fp).await);
        assert!(ledger.previous_download(&fp).await.is_some());
        assert_eq!(ledger.active_count(), 1);
    }

    #[tokio::test]
    async fn test_open_loads_existing_active_rows() {
        let db = Database::new_in_memory().await.unwrap();
        let url = "https://imgsrc.ru/jdoe/a.webp";
        {
            let ledger = Ledger::open(db.clone(), None).await.unwrap();
            ledger
                .record_download(&NewLedgerEntry::new(url, "jdoe", "/tmp/a.webp"))
                .await
                .unwrap();
        }
        let reopened = Ledger::open(db, None).await.unwrap();
        assert!(reopened.is_downloaded(&Fingerprint::of_url(url)).await);
    }

    #[tokio::test]
    async fn test_record_mirrors_into_cache() {
        let cache = Arc::new(MemoryCache::new());
        let ledger = ledger_with(Some(cache.clone())).await;
        assert!(ledger.has_cache());

        let url = "https://imgsrc.ru/jdoe/a.webp";
        ledger
            .record_download(&NewLedgerEntry::new(url, "jdoe", "/tmp/a.webp"))
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_cache_degrades_to_database_only() {
        let cache = Arc::new(MemoryCache::new());
        cache.set_available(false);
        let ledger = ledger_with(Some(cache)).await;
        assert!(!ledger.has_cache());

        let url = "https://imgsrc.ru/jdoe/a.webp";
        ledger
            .record_download(&NewLedgerEntry::new(url, "jdoe", "/tmp/a.webp"))
            .await
            .unwrap();
        assert!(ledger.is_downloaded(&Fingerprint::of_url(url)).await);
    }

    #[tokio::test]
    async fn test_cache_failure_after_open_does_not_fail_record() {
        let cache = Arc::new(MemoryCache::new());
        let ledger = ledger_with(Some(cache.clone())).await;
        cache.set_available(false);

        let url = "https://imgsrc.ru/jdoe/a.webp";
        ledger
            .record_download(&NewLedgerEntry::new(url, "jdoe", "/tmp/a.webp"))
            .await
            .unwrap();
        assert!(ledger.is_downloaded(&Fingerprint::of_url(url)).await);
        assert!(
            !ledger
                .is_downloaded(&Fingerprint::of_url("https://imgsrc.ru/other.webp"))
                .await
        );
    }

    #[tokio::test]
    async fn test_reconcile_marks_missing_files_deleted() {
        let dir = TempDir::new().unwrap();
        let kept = dir.path().join("kept.webp");
        let gone = dir.path().join("gone.webp");
        std::fs::write(&kept, b"x").unwrap();
        std::fs::write(&gone, b"x").unwrap();

        let cache = Arc::new(MemoryCache::new());
        let ledger = ledger_with(Some(cache.clone())).await;
        let kept_url = "https://imgsrc.ru/jdoe/kept.webp";
        let gone_url = "https://imgsrc.ru/jdoe/gone.webp";
        ledger
            .record_download(&NewLedgerEntry::new(kept_url, "jdoe", &kept))
            .await
            .unwrap();
        ledger
            .record_download(&NewLedgerEntry::new(gone_url, "jdoe", &gone))
            .await
            .unwrap();

        std::fs::remove_file(&gone).unwrap();
        let report = ledger.reconcile().await.unwrap();

        assert_eq!(report.checked, 2);
        assert_eq!(report.marked_deleted, 1);
        assert!(ledger.is_downloaded(&Fingerprint::of_url(kept_url)).await);
        assert!(!ledger.is_downloaded(&Fingerprint::of_url(gone_url)).await);
        assert_eq!(cache.len(), 1);

        let statuses: Vec<_> = ledger
            .entries()
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.source_url, e.status))
            .collect();
        assert!(statuses.contains(&(gone_url.to_string(), "deleted".to_string())));
    }

    #[tokio::test]
    async fn test_clear_wipes_rows_cache_and_memory() {
        let cache = Arc::new(MemoryCache::new());
        let ledger = ledger_with(Some(cache.clone())).await;
        let url = "https://imgsrc.ru/jdoe/a.webp";
        ledger
            .record_download(&NewLedgerEntry::new(url, "jdoe", "/tmp/a.webp"))
            .await
            .unwrap();

        assert_eq!(ledger.clear().await.unwrap(), 1);
        assert!(!ledger.is_downloaded(&Fingerprint::of_url(url)).await);
        assert!(cache.is_empty());
        assert!(ledger.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_galleries_groups_by_owner_and_folder() {
        let ledger = ledger_with(None).await;
        for (url, path) in [
            ("https://imgsrc.ru/a/1.webp", "/d/jdoe/Summer/1.webp"),
            ("https://imgsrc.ru/a/2.webp", "/d/jdoe/Summer/2.webp"),
            ("https://imgsrc.ru/a/3.webp", "/d/jdoe/Winter/3.webp"),
        ] {
            ledger
                .record_download(&NewLedgerEntry::new(url, "jdoe", path))
                .await
                .unwrap();
        }
        assert_eq!(
            ledger.galleries().await.unwrap(),
            vec!["jdoe - Summer".to_string(), "jdoe - Winter".to_string()]
        );
    }

    #[tokio::test]
    async fn test_concurrent_records_are_serialized() {
        let ledger = Arc::new(ledger_with(None).await);
        let mut handles = Vec::new();
        for i in 0..16 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                let url = format!("https://imgsrc.ru/jdoe/{}.webp", i % 4);
                ledger
                    .record_download(&NewLedgerEntry::new(url, "jdoe", format!("/tmp/{i}.webp")))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(ledger.entries().await.unwrap().len(), 4);
        assert_eq!(ledger.active_count(), 4);
    }
}
