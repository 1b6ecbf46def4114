//! Collaborators the queue worker calls into
//!
//! The services crate implements these traits: the direct channel is the delivery
//! primitive and the notification service is the notifier. The worker only sees the
//! traits, so the same retry loop runs against mocks in tests.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use scribo_core::models::{DeliveryVia, NotificationChannelKind, Submission};
use scribo_core::SubmissionError;

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub success: bool,
    pub submission_id: Uuid,
    /// Admin channels that should be told about this submission.
    pub notification_channels: Vec<NotificationChannelKind>,
    /// The inbox already held this submission; nothing new was recorded.
    pub duplicate: bool,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Storage write failed: {0}")]
    Storage(String),

    #[error("Inbox write failed: {0}")]
    Inbox(String),

    #[error("Invalid submission: {0}")]
    Invalid(String),

    #[error("Delivery unavailable: {0}")]
    Unavailable(String),
}

impl DeliveryError {
    /// `Invalid` fails the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DeliveryError::Invalid(_))
    }
}

/// Single-attempt delivery of a submission to the admin inbox.
#[async_trait]
pub trait SubmissionDelivery: Send + Sync {
    async fn deliver(
        &self,
        submission: &Submission,
        via: DeliveryVia,
    ) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Sends the "new submission" alert once a submission is delivered.
#[async_trait]
pub trait SubmissionNotifier: Send + Sync {
    /// Fails with [`SubmissionError::Notification`] when any requested channel failed.
    async fn notify_submission(
        &self,
        submission: &Submission,
        channels: &[NotificationChannelKind],
    ) -> Result<(), SubmissionError>;
}
