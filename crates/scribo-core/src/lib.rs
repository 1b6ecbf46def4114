//! Scribo Core Library
//!
//! This crate provides the domain models, error types, configuration, and validation
//! shared by every Scribo component: the submission orchestrator, the durable queue,
//! the delivery backends and the HTTP surface.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod storage_types;
pub mod submission_error;
pub mod validation;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use storage_types::StorageBackend;
pub use submission_error::{SubmissionError, ValidationError};
