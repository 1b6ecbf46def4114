use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Partial,
}

impl QueueStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            QueueStatus::Completed | QueueStatus::Failed | QueueStatus::Partial
        )
    }
}

impl Display for QueueStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            QueueStatus::Queued => write!(f, "queued"),
            QueueStatus::Processing => write!(f, "processing"),
            QueueStatus::Completed => write!(f, "completed"),
            QueueStatus::Failed => write!(f, "failed"),
            QueueStatus::Partial => write!(f, "partial"),
        }
    }
}

impl FromStr for QueueStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(QueueStatus::Queued),
            "processing" => Ok(QueueStatus::Processing),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            "partial" => Ok(QueueStatus::Partial),
            _ => Err(anyhow::anyhow!("Invalid queue status: {}", s)),
        }
    }
}

/// Durable queue bookkeeping for one submission. The submission id doubles as the
/// queue id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub submission_id: Uuid,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub status: QueueStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueueEntry {
    pub fn new(submission_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            submission_id,
            attempts: 0,
            last_error: None,
            status: QueueStatus::Queued,
            created_at: now,
            updated_at: now,
            next_attempt_at: Some(now),
            completed_at: None,
        }
    }

    pub fn queue_id(&self) -> Uuid {
        self.submission_id
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether a terminal entry has outlived its retention window.
    pub fn is_expired(&self, retention: chrono::Duration, now: DateTime<Utc>) -> bool {
        match self.completed_at {
            Some(completed_at) if self.is_terminal() => completed_at + retention <= now,
            _ => false,
        }
    }
}
