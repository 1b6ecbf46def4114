//! Durable submission queue
//!
//! Accepts submissions that could not be delivered directly and keeps retrying them
//! with exponential backoff until they are delivered or the attempt budget runs out.

pub mod context;
pub mod queue;

pub use context::{DeliveryError, DeliveryReceipt, SubmissionDelivery, SubmissionNotifier};
pub use queue::{compute_backoff, QueueConfig, QueueError, SubmissionQueue};
