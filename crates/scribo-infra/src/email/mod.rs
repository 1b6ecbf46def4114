//! Outbound email for administrator alerts.

#[cfg(feature = "email-smtp")]
mod smtp;

#[cfg(feature = "email-smtp")]
pub use smtp::SmtpEmailSender;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("Invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(String),

    #[error("SMTP transport error: {0}")]
    Transport(String),

    #[error("Email transport not configured: {0}")]
    NotConfigured(String),
}

/// Email API used by the notification fan-out.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Send one HTML message to a single recipient.
    async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), EmailError>;
}
