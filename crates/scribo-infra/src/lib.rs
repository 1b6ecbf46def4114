//! Scribo Infrastructure Library
//!
//! Shared infrastructure used by the Scribo service binary:
//! - Telemetry initialization (tracing subscriber, pretty or JSON output)
//! - Outbound email (SMTP)

#[cfg(feature = "observability-basic")]
pub mod telemetry;

pub mod email;

// Re-export commonly used types
#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, shutdown_telemetry};

pub use email::{EmailError, EmailSender};
#[cfg(feature = "email-smtp")]
pub use email::SmtpEmailSender;
