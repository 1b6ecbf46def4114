pub mod inbox;
pub mod notification;
pub mod queue;
pub mod submission;

pub use inbox::{AdminNotification, DeliveryVia, InboxRecord, StoredFile};
pub use notification::{
    NotificationChannelKind, NotificationPriority, NotificationRequest, PriorityPolicy,
};
pub use queue::{QueueEntry, QueueStatus};
pub use submission::{Identity, Submission, SubmissionFile, SubmissionOutcome, SubmissionStatus};
