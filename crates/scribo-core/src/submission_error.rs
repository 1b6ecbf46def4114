//! Submission pipeline error taxonomy.
//!
//! Only [`SubmissionError::Validation`] and [`SubmissionError::QueueExhaustion`] are
//! final failures a caller is expected to act on. Transient delivery and notification
//! failures are absorbed by the orchestrator and turned into state transitions.

/// Caller misuse, rejected before any side effect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("You must be signed in to submit documents")]
    NotSignedIn,

    #[error("At least one file is required")]
    EmptyFileSet,

    #[error("A submission is already in progress")]
    SubmissionInProgress,

    #[error("Too many files: {count} submitted, at most {max} allowed")]
    TooManyFiles { count: usize, max: usize },

    #[error("File '{filename}' is {size} bytes, larger than the {max} byte limit")]
    FileTooLarge {
        filename: String,
        size: usize,
        max: usize,
    },

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Direct delivery failed: {0}")]
    TransientDelivery(String),

    #[error("Delivery failed after {attempts} attempts: {last_error}")]
    QueueExhaustion { attempts: u32, last_error: String },

    #[error("Notification delivery failed: {0}")]
    Notification(String),

    #[error("Submission was cancelled")]
    Cancelled,

    #[error("Submission error: {0}")]
    Internal(String),
}

impl SubmissionError {
    /// Whether this error ends a submission from the caller's point of view.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubmissionError::Validation(_)
                | SubmissionError::QueueExhaustion { .. }
                | SubmissionError::Internal(_)
                | SubmissionError::Cancelled
        )
    }

    /// Whether resubmitting the same files may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SubmissionError::Validation(_))
    }

    /// Notice shown to the end user alongside the retry affordance.
    pub fn user_message(&self) -> String {
        match self {
            SubmissionError::Validation(inner) => inner.to_string(),
            SubmissionError::QueueExhaustion { .. } => {
                "We could not deliver your documents. Please try again.".to_string()
            }
            SubmissionError::Cancelled => "Submission cancelled.".to_string(),
            _ => "Something went wrong while submitting your documents. Please try again."
                .to_string(),
        }
    }
}
