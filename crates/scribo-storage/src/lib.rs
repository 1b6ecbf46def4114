//! Scribo Storage Library
//!
//! Object storage abstraction for submitted documents, with S3, local filesystem and
//! in-memory backends.
//!
//! # Storage key format
//!
//! Every backend stores submission files under the same deterministic layout:
//!
//! - `submissions/{owner_digest}/{submission_id}/{index:02}-{filename}`
//!
//! Re-delivering a submission therefore overwrites its objects instead of duplicating
//! them. Keys must not contain `..` or a leading `/`; key generation lives in the
//! `keys` module so all backends stay consistent.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod memory;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
pub use keys::{owner_segment, submission_file_key};
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use memory::MemoryStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use scribo_core::StorageBackend;
pub use traits::{ObjectStorage, StorageError, StorageResult};
