//! Scribo Services Layer
//!
//! Business services of the submission pipeline: the notification fan-out, the direct
//! delivery channel and the orchestrator that ties them to the durable queue. The API
//! crate depends on this facade; thin HTTP handling stays in `scribo-api`.

pub mod notification;
pub mod submission;

pub use notification::{
    ChannelDelivery, EmailChannel, InAppChannel, NotificationChannel, NotificationError,
    NotificationReport, NotificationService,
};
pub use submission::{
    DirectChannel, OrchestratorConfig, QueueClient, SubmissionObserver, SubmissionOrchestrator,
};
pub use scribo_worker::{
    DeliveryError, DeliveryReceipt, QueueConfig, QueueError, SubmissionDelivery,
    SubmissionNotifier, SubmissionQueue,
};
