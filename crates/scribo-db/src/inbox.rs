//! Admin inbox: the destination of delivered submissions and in-app notifications.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scribo_core::models::{AdminNotification, DeliveryVia, InboxRecord, StoredFile};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum InboxError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt inbox row: {0}")]
    Corrupt(String),

    #[error("Inbox unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait AdminInbox: Send + Sync {
    /// Record a delivered submission. Returns `false` when a record with the same
    /// submission id already exists; the existing record is left untouched.
    async fn insert_submission(&self, record: &InboxRecord) -> Result<bool, InboxError>;

    async fn insert_notification(&self, notification: &AdminNotification)
        -> Result<(), InboxError>;

    async fn get_submission(&self, submission_id: Uuid) -> Result<Option<InboxRecord>, InboxError>;

    /// Most recent notifications first.
    async fn list_notifications(&self, limit: usize) -> Result<Vec<AdminNotification>, InboxError>;
}

/// Process-local inbox
#[derive(Clone, Default)]
pub struct MemoryInbox {
    submissions: Arc<Mutex<HashMap<Uuid, InboxRecord>>>,
    notifications: Arc<Mutex<Vec<AdminNotification>>>,
}

impl MemoryInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn notification_count(&self) -> usize {
        self.notifications.lock().map(|n| n.len()).unwrap_or(0)
    }
}

fn poisoned<T>(_: T) -> InboxError {
    InboxError::Unavailable("inbox lock poisoned".to_string())
}

#[async_trait]
impl AdminInbox for MemoryInbox {
    async fn insert_submission(&self, record: &InboxRecord) -> Result<bool, InboxError> {
        let mut submissions = self.submissions.lock().map_err(poisoned)?;
        if submissions.contains_key(&record.submission_id) {
            return Ok(false);
        }
        submissions.insert(record.submission_id, record.clone());
        Ok(true)
    }

    async fn insert_notification(
        &self,
        notification: &AdminNotification,
    ) -> Result<(), InboxError> {
        self.notifications
            .lock()
            .map_err(poisoned)?
            .push(notification.clone());
        Ok(())
    }

    async fn get_submission(&self, submission_id: Uuid) -> Result<Option<InboxRecord>, InboxError> {
        Ok(self
            .submissions
            .lock()
            .map_err(poisoned)?
            .get(&submission_id)
            .cloned())
    }

    async fn list_notifications(&self, limit: usize) -> Result<Vec<AdminNotification>, InboxError> {
        let notifications = self.notifications.lock().map_err(poisoned)?;
        Ok(notifications.iter().rev().take(limit).cloned().collect())
    }
}

/// PostgreSQL-backed inbox over the `submission_inbox` and `admin_notifications` tables
#[derive(Clone)]
pub struct PgInbox {
    pool: PgPool,
}

impl PgInbox {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &PgRow) -> Result<InboxRecord, InboxError> {
    let via: String = row.try_get("via")?;
    let metadata: Json<BTreeMap<String, String>> = row.try_get("metadata")?;
    let files: Json<Vec<StoredFile>> = row.try_get("files")?;

    Ok(InboxRecord {
        submission_id: row.try_get("submission_id")?,
        owner_id: row.try_get("owner_id")?,
        metadata: metadata.0,
        files: files.0,
        via: via
            .parse::<DeliveryVia>()
            .map_err(|e| InboxError::Corrupt(e.to_string()))?,
        submitted_at: row.try_get::<DateTime<Utc>, _>("submitted_at")?,
        received_at: row.try_get::<DateTime<Utc>, _>("received_at")?,
    })
}

fn notification_from_row(row: &PgRow) -> Result<AdminNotification, InboxError> {
    let priority: String = row.try_get("priority")?;
    let metadata: Json<BTreeMap<String, String>> = row.try_get("metadata")?;

    Ok(AdminNotification {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        priority: priority
            .parse()
            .map_err(|e: anyhow::Error| InboxError::Corrupt(e.to_string()))?,
        metadata: metadata.0,
        read: row.try_get("read")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl AdminInbox for PgInbox {
    #[tracing::instrument(skip(self, record), fields(submission_id = %record.submission_id))]
    async fn insert_submission(&self, record: &InboxRecord) -> Result<bool, InboxError> {
        let result = sqlx::query(
            r#"
            INSERT INTO submission_inbox (
                submission_id, owner_id, metadata, files, via, submitted_at, received_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (submission_id) DO NOTHING
            "#,
        )
        .bind(record.submission_id)
        .bind(&record.owner_id)
        .bind(Json(&record.metadata))
        .bind(Json(&record.files))
        .bind(record.via.to_string())
        .bind(record.submitted_at)
        .bind(record.received_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_notification(
        &self,
        notification: &AdminNotification,
    ) -> Result<(), InboxError> {
        sqlx::query(
            r#"
            INSERT INTO admin_notifications (id, title, body, priority, metadata, read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(notification.id)
        .bind(&notification.title)
        .bind(&notification.body)
        .bind(notification.priority.to_string())
        .bind(Json(&notification.metadata))
        .bind(notification.read)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_submission(&self, submission_id: Uuid) -> Result<Option<InboxRecord>, InboxError> {
        let row = sqlx::query(
            r#"
            SELECT submission_id, owner_id, metadata, files, via, submitted_at, received_at
            FROM submission_inbox
            WHERE submission_id = $1
            "#,
        )
        .bind(submission_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn list_notifications(&self, limit: usize) -> Result<Vec<AdminNotification>, InboxError> {
        let rows = sqlx::query(
            r#"
            SELECT id, title, body, priority, metadata, read, created_at
            FROM admin_notifications
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(notification_from_row).collect()
    }
}
