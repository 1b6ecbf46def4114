//! Notification fan-out
//!
//! One request goes to every requested channel concurrently. Channels fail
//! independently and every channel gets its own entry in the report.

mod email;
mod in_app;

pub use email::EmailChannel;
pub use in_app::InAppChannel;

use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use scribo_core::models::{
    NotificationChannelKind, NotificationRequest, PriorityPolicy, Submission,
};
use scribo_core::SubmissionError;
use scribo_worker::SubmissionNotifier;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotificationError {
    #[error("No backend registered for channel {0}")]
    Unregistered(NotificationChannelKind),

    #[error("In-app notification failed: {0}")]
    InApp(String),

    #[error("Email notification failed: {0}")]
    Email(String),

    #[error("No admin recipients configured")]
    NoRecipients,
}

/// A notification backend.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> NotificationChannelKind;

    async fn deliver(&self, request: &NotificationRequest) -> Result<(), NotificationError>;
}

/// Result of one channel within a fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDelivery {
    pub channel: NotificationChannelKind,
    pub result: Result<(), NotificationError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationReport {
    pub deliveries: Vec<ChannelDelivery>,
}

impl NotificationReport {
    pub fn all_succeeded(&self) -> bool {
        self.deliveries.iter().all(|d| d.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ChannelDelivery> {
        self.deliveries.iter().filter(|d| d.result.is_err())
    }

    /// `channel: error` pairs joined with `; `.
    pub fn failure_summary(&self) -> String {
        self.failures()
            .filter_map(|d| {
                d.result
                    .as_ref()
                    .err()
                    .map(|e| format!("{}: {}", d.channel, e))
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Clone, Default)]
pub struct NotificationService {
    channels: HashMap<NotificationChannelKind, Arc<dyn NotificationChannel>>,
    policy: PriorityPolicy,
}

impl NotificationService {
    pub fn new(policy: PriorityPolicy) -> Self {
        Self {
            channels: HashMap::new(),
            policy,
        }
    }

    /// Register a backend, replacing any previous one for the same channel kind.
    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.insert(channel.kind(), channel);
        self
    }

    pub fn policy(&self) -> &PriorityPolicy {
        &self.policy
    }

    /// Deliver `request` to each of its channels concurrently.
    #[tracing::instrument(skip(self, request), fields(title = %request.title, priority = %request.priority))]
    pub async fn notify(&self, request: &NotificationRequest) -> NotificationReport {
        let deliveries = join_all(request.channels.iter().map(|&kind| async move {
            let result = match self.channels.get(&kind) {
                Some(channel) => channel.deliver(request).await,
                None => Err(NotificationError::Unregistered(kind)),
            };
            if let Err(ref e) = result {
                tracing::warn!(channel = %kind, error = %e, "Notification channel failed");
            }
            ChannelDelivery {
                channel: kind,
                result,
            }
        }))
        .await;

        let report = NotificationReport { deliveries };
        tracing::debug!(
            channels = report.deliveries.len(),
            all_succeeded = report.all_succeeded(),
            "Notification fan-out finished"
        );
        report
    }
}

#[async_trait]
impl SubmissionNotifier for NotificationService {
    async fn notify_submission(
        &self,
        submission: &Submission,
        channels: &[NotificationChannelKind],
    ) -> Result<(), SubmissionError> {
        let request = NotificationRequest::for_submission(submission, channels, &self.policy);
        let report = self.notify(&request).await;
        if report.all_succeeded() {
            Ok(())
        } else {
            Err(SubmissionError::Notification(report.failure_summary()))
        }
    }
}
