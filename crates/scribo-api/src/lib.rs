//! Scribo API Library
//!
//! HTTP surface of the submission pipeline: multipart submission, queue status lookup
//! and health, plus application setup.

pub mod error;
pub mod handlers;
pub mod setup;
pub mod state;

pub use error::{ErrorResponse, HttpAppError};
pub use state::AppState;
