//! Durable ledger table access.
//!
//! All SQL touching the `downloads` table lives here. Callers that mutate
//! (upsert, mark deleted, clear) are serialized by [`super::Ledger`].

use tracing::instrument;

use super::entry::{LedgerEntry, LedgerStatus, NewLedgerEntry};
use super::error::LedgerError;
use crate::db::Database;

type Result<T> = std::result::Result<T, LedgerError>;

/// The `downloads` table.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    db: Database,
}

impl LedgerStore {
    /// Wraps an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts or replaces the row for `entry.source_url`, marking it active.
    ///
    /// Returns the stored download timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the statement fails.
    #[instrument(skip(self, entry), fields(url = %entry.source_url, fingerprint = %entry.fingerprint))]
    pub async fn upsert(&self, entry: &NewLedgerEntry) -> Result<String> {
        let destination = entry.destination_path.to_string_lossy();
        let downloaded_at: String = sqlx::query_scalar(
            r"INSERT INTO downloads (
                fingerprint, filename, owner, source_url, downloaded_at, destination_path, status
              )
              VALUES (?, ?, ?, ?, datetime('now'), ?, ?)
              ON CONFLICT(source_url) DO UPDATE SET
                fingerprint = excluded.fingerprint,
                filename = excluded.filename,
                owner = excluded.owner,
                downloaded_at = excluded.downloaded_at,
                destination_path = excluded.destination_path,
                status = excluded.status
              RETURNING downloaded_at",
        )
        .bind(entry.fingerprint.as_str())
        .bind(&entry.filename)
        .bind(&entry.owner)
        .bind(&entry.source_url)
        .bind(destination.as_ref())
        .bind(LedgerStatus::Active.as_str())
        .fetch_one(self.db.pool())
        .await?;

        Ok(downloaded_at)
    }

    /// Returns all rows with the given status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the query fails.
    pub async fn list_by_status(&self, status: LedgerStatus) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<_, LedgerEntry>(
            r"SELECT id, fingerprint, filename, owner, source_url, downloaded_at,
                     destination_path, status
              FROM downloads
              WHERE status = ?
              ORDER BY downloaded_at ASC, id ASC",
        )
        .bind(status.as_str())
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Returns every row, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the query fails.
    pub async fn list_all(&self) -> Result<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<_, LedgerEntry>(
            r"SELECT id, fingerprint, filename, owner, source_url, downloaded_at,
                     destination_path, status
              FROM downloads
              ORDER BY downloaded_at DESC, id DESC",
        )
        .fetch_all(self.db.pool())
        .await?;
        Ok(rows)
    }

    /// Looks up the row for a source URL.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the query fails.
    #[cfg(test)]
    pub async fn find_by_url(&self, source_url: &str) -> Result<Option<LedgerEntry>> {
        let row = sqlx::query_as::<_, LedgerEntry>(
            r"SELECT id, fingerprint, filename, owner, source_url, downloaded_at,
                     destination_path, status
              FROM downloads
              WHERE source_url = ?",
        )
        .bind(source_url)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row)
    }

    /// Transitions one row to `deleted`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the update fails.
    pub async fn mark_deleted(&self, id: i64) -> Result<()> {
        sqlx::query("UPDATE downloads SET status = ? WHERE id = ?")
            .bind(LedgerStatus::Deleted.as_str())
            .bind(id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Deletes every row, returning how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Database`] if the delete fails.
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM downloads")
            .execute(self.db.pool())
            .await?;
        Ok(result.rows_affected())
    }
}
