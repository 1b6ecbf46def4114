//! Direct submission channel
//!
//! One best-effort attempt: write every file to object storage under its deterministic
//! key, then record the submission in the admin inbox. No retries here; the queue
//! re-runs this same delivery when it has to.

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use scribo_core::models::{
    DeliveryVia, InboxRecord, NotificationChannelKind, StoredFile, Submission,
};
use scribo_db::AdminInbox;
use scribo_storage::{submission_file_key, ObjectStorage};
use scribo_worker::{DeliveryError, DeliveryReceipt, SubmissionDelivery};

#[derive(Clone)]
pub struct DirectChannel {
    storage: Arc<dyn ObjectStorage>,
    inbox: Arc<dyn AdminInbox>,
    notification_channels: Vec<NotificationChannelKind>,
}

impl DirectChannel {
    pub fn new(
        storage: Arc<dyn ObjectStorage>,
        inbox: Arc<dyn AdminInbox>,
        notification_channels: Vec<NotificationChannelKind>,
    ) -> Self {
        Self {
            storage,
            inbox,
            notification_channels,
        }
    }

    /// Single delivery attempt on behalf of the orchestrator.
    pub async fn send(&self, submission: &Submission) -> Result<DeliveryReceipt, DeliveryError> {
        self.deliver(submission, DeliveryVia::Direct).await
    }

    async fn store_files(&self, submission: &Submission) -> Result<Vec<StoredFile>, DeliveryError> {
        let mut stored = Vec::with_capacity(submission.files.len());
        for (index, file) in submission.files.iter().enumerate() {
            let key = submission_file_key(&submission.owner_id, submission.id, index, &file.filename)
                .map_err(|e| DeliveryError::Invalid(e.to_string()))?;
            let url = self
                .storage
                .put(&key, file.data.clone(), &file.content_type)
                .await
                .map_err(|e| DeliveryError::Storage(e.to_string()))?;

            stored.push(StoredFile {
                filename: file.filename.clone(),
                content_type: file.content_type.clone(),
                size_bytes: file.size() as u64,
                storage_key: key,
                storage_url: url,
                sha256: hex::encode(Sha256::digest(&file.data)),
            });
        }
        Ok(stored)
    }
}

#[async_trait]
impl SubmissionDelivery for DirectChannel {
    #[tracing::instrument(skip(self, submission), fields(submission_id = %submission.id, via = %via))]
    async fn deliver(
        &self,
        submission: &Submission,
        via: DeliveryVia,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        if submission.files.is_empty() {
            return Err(DeliveryError::Invalid("submission has no files".to_string()));
        }

        let start = std::time::Instant::now();
        let files = self.store_files(submission).await?;

        let record = InboxRecord {
            submission_id: submission.id,
            owner_id: submission.owner_id.clone(),
            metadata: submission.metadata.clone(),
            files,
            via,
            submitted_at: submission.created_at,
            received_at: Utc::now(),
        };
        let inserted = self
            .inbox
            .insert_submission(&record)
            .await
            .map_err(|e| DeliveryError::Inbox(e.to_string()))?;

        tracing::info!(
            file_count = record.files.len(),
            total_bytes = submission.total_bytes(),
            duplicate = !inserted,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Submission delivered to admin inbox"
        );

        Ok(DeliveryReceipt {
            success: true,
            submission_id: submission.id,
            notification_channels: self.notification_channels.clone(),
            duplicate: !inserted,
        })
    }
}
