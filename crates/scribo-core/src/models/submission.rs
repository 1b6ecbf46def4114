use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use uuid::Uuid;

use crate::submission_error::SubmissionError;

/// Identity handed over by the upstream identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub owner_id: String,
    pub signed_in: bool,
}

impl Identity {
    pub fn signed_in(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            signed_in: true,
        }
    }

    pub fn anonymous() -> Self {
        Self {
            owner_id: String::new(),
            signed_in: false,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.signed_in && !self.owner_id.trim().is_empty()
    }
}

/// One uploaded file. The payload is reference counted so the direct attempt and the
/// queue fallback share the same bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionFile {
    pub filename: String,
    pub content_type: String,
    #[serde(with = "base64_bytes")]
    pub data: Bytes,
}

impl SubmissionFile {
    pub fn new(
        filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            data: data.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// A user's batch upload. `id` is assigned once in [`Submission::new`] and travels
/// unchanged through the direct channel and the durable queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub owner_id: String,
    pub files: Vec<SubmissionFile>,
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(
        owner_id: impl Into<String>,
        files: Vec<SubmissionFile>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            files,
            metadata,
            created_at: Utc::now(),
        }
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn total_bytes(&self) -> usize {
        self.files.iter().map(SubmissionFile::size).sum()
    }
}

/// Client-observable submission state.
///
/// `idle → uploading → submitting → {notifying} → {success | partial | error}`;
/// any state may return to `idle` through cancel or reset.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    #[default]
    Idle,
    Uploading,
    Submitting,
    Notifying,
    Success,
    Error,
    Partial,
}

impl SubmissionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubmissionStatus::Success | SubmissionStatus::Error | SubmissionStatus::Partial
        )
    }

    /// States from which `cancel` is accepted.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SubmissionStatus::Uploading | SubmissionStatus::Submitting | SubmissionStatus::Notifying
        )
    }

    pub fn can_transition_to(self, next: SubmissionStatus) -> bool {
        use SubmissionStatus::*;
        match (self, next) {
            (_, Idle) => true,
            (Idle, Uploading) => true,
            (Uploading, Submitting) => true,
            // Re-entered once the submission is handed to the queue.
            (Submitting, Submitting) => true,
            (Submitting, Notifying) => true,
            (Submitting, Success | Partial | Error) => true,
            (Notifying, Success | Partial | Error) => true,
            _ => false,
        }
    }
}

impl Display for SubmissionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            SubmissionStatus::Idle => write!(f, "idle"),
            SubmissionStatus::Uploading => write!(f, "uploading"),
            SubmissionStatus::Submitting => write!(f, "submitting"),
            SubmissionStatus::Notifying => write!(f, "notifying"),
            SubmissionStatus::Success => write!(f, "success"),
            SubmissionStatus::Error => write!(f, "error"),
            SubmissionStatus::Partial => write!(f, "partial"),
        }
    }
}

/// Result of one `submit` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionOutcome {
    pub success: bool,
    pub submission_id: Option<Uuid>,
    pub queued: bool,
    pub status: SubmissionStatus,
    pub error: Option<SubmissionError>,
}

impl SubmissionOutcome {
    pub fn delivered(submission_id: Uuid) -> Self {
        Self {
            success: true,
            submission_id: Some(submission_id),
            queued: false,
            status: SubmissionStatus::Success,
            error: None,
        }
    }

    /// Outcome resolved through the durable queue. `partial` still counts as success.
    pub fn via_queue(submission_id: Uuid, status: SubmissionStatus) -> Self {
        Self {
            success: matches!(status, SubmissionStatus::Success | SubmissionStatus::Partial),
            submission_id: Some(submission_id),
            queued: true,
            status,
            error: None,
        }
    }

    pub fn failed(error: SubmissionError, submission_id: Option<Uuid>, queued: bool) -> Self {
        Self {
            success: false,
            submission_id,
            queued,
            status: SubmissionStatus::Error,
            error: Some(error),
        }
    }

    pub fn cancelled(submission_id: Option<Uuid>, queued: bool) -> Self {
        Self {
            success: false,
            submission_id,
            queued,
            status: SubmissionStatus::Idle,
            error: Some(SubmissionError::Cancelled),
        }
    }

    pub fn is_partial(&self) -> bool {
        self.status == SubmissionStatus::Partial
    }

    /// Toast-style notice for the end user.
    pub fn user_message(&self) -> String {
        match (&self.error, self.status) {
            (Some(err), _) => err.user_message(),
            (None, SubmissionStatus::Partial) => {
                "Your documents were received. Our team may take a little longer to see them."
                    .to_string()
            }
            _ => "Your documents were submitted successfully.".to_string(),
        }
    }
}

/// Serde adapter storing file payloads as base64 strings.
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
