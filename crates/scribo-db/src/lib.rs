//! Persistence for the submission pipeline
//!
//! Two stores, each a trait with an in-memory and a PostgreSQL implementation:
//!
//! - [`AdminInbox`]: where delivered submissions and in-app notifications land.
//! - [`QueueStore`]: durable bookkeeping for the retrying submission queue.

pub mod inbox;
pub mod queue_store;

pub use inbox::{AdminInbox, InboxError, MemoryInbox, PgInbox};
pub use queue_store::{MemoryQueueStore, PgQueueStore, QueueStore, QueueStoreError};
