//! Durable storage for the submission queue.
//!
//! The store only persists; retry scheduling and status transitions belong to the
//! queue worker in `scribo-worker`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scribo_core::models::{QueueEntry, QueueStatus, Submission};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QueueStoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Queue entry not found: {0}")]
    NotFound(Uuid),

    #[error("Corrupt queue row: {0}")]
    Corrupt(String),

    #[error("Queue store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a new entry together with its submission payload. Returns `false`
    /// without modifying anything if an entry with the same id already exists.
    async fn insert_if_absent(
        &self,
        entry: &QueueEntry,
        submission: &Submission,
    ) -> Result<bool, QueueStoreError>;

    async fn get(&self, submission_id: Uuid) -> Result<Option<QueueEntry>, QueueStoreError>;

    async fn load_submission(
        &self,
        submission_id: Uuid,
    ) -> Result<Option<Submission>, QueueStoreError>;

    /// Overwrite the bookkeeping fields of an existing entry.
    async fn update(&self, entry: &QueueEntry) -> Result<(), QueueStoreError>;

    /// Entries that have not reached a terminal status.
    async fn list_pending(&self) -> Result<Vec<QueueEntry>, QueueStoreError>;

    /// Delete terminal entries completed at or before `cutoff`; returns how many went.
    async fn purge_terminal(&self, cutoff: DateTime<Utc>) -> Result<u64, QueueStoreError>;
}

#[derive(Clone, Default)]
pub struct MemoryQueueStore {
    entries: Arc<Mutex<HashMap<Uuid, (QueueEntry, Submission)>>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> QueueStoreError {
    QueueStoreError::Unavailable("queue store lock poisoned".to_string())
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn insert_if_absent(
        &self,
        entry: &QueueEntry,
        submission: &Submission,
    ) -> Result<bool, QueueStoreError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        if entries.contains_key(&entry.submission_id) {
            return Ok(false);
        }
        entries.insert(entry.submission_id, (entry.clone(), submission.clone()));
        Ok(true)
    }

    async fn get(&self, submission_id: Uuid) -> Result<Option<QueueEntry>, QueueStoreError> {
        Ok(self
            .entries
            .lock()
            .map_err(poisoned)?
            .get(&submission_id)
            .map(|(entry, _)| entry.clone()))
    }

    async fn load_submission(
        &self,
        submission_id: Uuid,
    ) -> Result<Option<Submission>, QueueStoreError> {
        Ok(self
            .entries
            .lock()
            .map_err(poisoned)?
            .get(&submission_id)
            .map(|(_, submission)| submission.clone()))
    }

    async fn update(&self, entry: &QueueEntry) -> Result<(), QueueStoreError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        match entries.get_mut(&entry.submission_id) {
            Some((stored, _)) => {
                *stored = entry.clone();
                Ok(())
            }
            None => Err(QueueStoreError::NotFound(entry.submission_id)),
        }
    }

    async fn list_pending(&self) -> Result<Vec<QueueEntry>, QueueStoreError> {
        let entries = self.entries.lock().map_err(poisoned)?;
        let mut pending: Vec<QueueEntry> = entries
            .values()
            .filter(|(entry, _)| !entry.is_terminal())
            .map(|(entry, _)| entry.clone())
            .collect();
        pending.sort_by_key(|entry| entry.created_at);
        Ok(pending)
    }

    async fn purge_terminal(&self, cutoff: DateTime<Utc>) -> Result<u64, QueueStoreError> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        let before = entries.len();
        entries.retain(|_, (entry, _)| {
            !(entry.is_terminal() && entry.completed_at.is_some_and(|at| at <= cutoff))
        });
        Ok((before - entries.len()) as u64)
    }
}

/// PostgreSQL-backed queue store over the `submission_queue` table
#[derive(Clone)]
pub struct PgQueueStore {
    pool: PgPool,
}

impl PgQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn entry_from_row(row: &PgRow) -> Result<QueueEntry, QueueStoreError> {
    let status: String = row.try_get("status")?;
    let attempts: i32 = row.try_get("attempts")?;

    Ok(QueueEntry {
        submission_id: row.try_get("submission_id")?,
        attempts: attempts.max(0) as u32,
        last_error: row.try_get("last_error")?,
        status: status
            .parse::<QueueStatus>()
            .map_err(|e| QueueStoreError::Corrupt(e.to_string()))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        next_attempt_at: row.try_get("next_attempt_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

const ENTRY_COLUMNS: &str = "submission_id, attempts, last_error, status, created_at, \
     updated_at, next_attempt_at, completed_at";

#[async_trait]
impl QueueStore for PgQueueStore {
    #[tracing::instrument(skip(self, entry, submission), fields(submission_id = %entry.submission_id))]
    async fn insert_if_absent(
        &self,
        entry: &QueueEntry,
        submission: &Submission,
    ) -> Result<bool, QueueStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO submission_queue (
                submission_id, payload, attempts, last_error, status,
                created_at, updated_at, next_attempt_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (submission_id) DO NOTHING
            "#,
        )
        .bind(entry.submission_id)
        .bind(Json(submission))
        .bind(entry.attempts as i32)
        .bind(&entry.last_error)
        .bind(entry.status.to_string())
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .bind(entry.next_attempt_at)
        .bind(entry.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, submission_id: Uuid) -> Result<Option<QueueEntry>, QueueStoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM submission_queue WHERE submission_id = $1"
        ))
        .bind(submission_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(entry_from_row).transpose()
    }

    async fn load_submission(
        &self,
        submission_id: Uuid,
    ) -> Result<Option<Submission>, QueueStoreError> {
        let row = sqlx::query("SELECT payload FROM submission_queue WHERE submission_id = $1")
            .bind(submission_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let payload: Json<Submission> = row.try_get("payload")?;
                Ok(Some(payload.0))
            }
            None => Ok(None),
        }
    }

    async fn update(&self, entry: &QueueEntry) -> Result<(), QueueStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE submission_queue
            SET attempts = $2, last_error = $3, status = $4, updated_at = $5,
                next_attempt_at = $6, completed_at = $7
            WHERE submission_id = $1
            "#,
        )
        .bind(entry.submission_id)
        .bind(entry.attempts as i32)
        .bind(&entry.last_error)
        .bind(entry.status.to_string())
        .bind(entry.updated_at)
        .bind(entry.next_attempt_at)
        .bind(entry.completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueStoreError::NotFound(entry.submission_id));
        }
        Ok(())
    }

    async fn list_pending(&self) -> Result<Vec<QueueEntry>, QueueStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTRY_COLUMNS} FROM submission_queue \
             WHERE status IN ('queued', 'processing') ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn purge_terminal(&self, cutoff: DateTime<Utc>) -> Result<u64, QueueStoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM submission_queue
            WHERE status IN ('completed', 'failed', 'partial')
              AND completed_at IS NOT NULL
              AND completed_at <= $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribo_core::models::SubmissionFile;
    use std::collections::BTreeMap;

    fn submission() -> Submission {
        Submission::new(
            "user-7",
            vec![SubmissionFile::new("a.pdf", "application/pdf", b"%PDF".to_vec())],
            BTreeMap::new(),
        )
    }

    #[tokio::test]
    async fn insert_if_absent_keeps_first_entry() {
        let store = MemoryQueueStore::new();
        let submission = submission();
        let entry = QueueEntry::new(submission.id);

        assert!(store.insert_if_absent(&entry, &submission).await.unwrap());

        let mut other = entry.clone();
        other.attempts = 3;
        assert!(!store.insert_if_absent(&other, &submission).await.unwrap());

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(submission.id).await.unwrap().unwrap().attempts, 0);
        assert_eq!(
            store.load_submission(submission.id).await.unwrap(),
            Some(submission)
        );
    }

    #[tokio::test]
    async fn update_unknown_entry_is_not_found() {
        let store = MemoryQueueStore::new();
        let entry = QueueEntry::new(Uuid::new_v4());
        assert!(matches!(
            store.update(&entry).await,
            Err(QueueStoreError::NotFound(id)) if id == entry.submission_id
        ));
    }

    #[tokio::test]
    async fn pending_and_purge_respect_terminal_status() {
        let store = MemoryQueueStore::new();
        let now = Utc::now();

        let done = submission();
        let mut done_entry = QueueEntry::new(done.id);
        store.insert_if_absent(&done_entry, &done).await.unwrap();
        done_entry.status = QueueStatus::Completed;
        done_entry.completed_at = Some(now - chrono::Duration::seconds(120));
        store.update(&done_entry).await.unwrap();

        let waiting = submission();
        store
            .insert_if_absent(&QueueEntry::new(waiting.id), &waiting)
            .await
            .unwrap();

        let pending = store.list_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].submission_id, waiting.id);

        assert_eq!(
            store
                .purge_terminal(now - chrono::Duration::seconds(600))
                .await
                .unwrap(),
            0
        );
        assert_eq!(
            store
                .purge_terminal(now - chrono::Duration::seconds(60))
                .await
                .unwrap(),
            1
        );
        assert!(store.get(done.id).await.unwrap().is_none());
        assert!(store.get(waiting.id).await.unwrap().is_some());
    }
}
