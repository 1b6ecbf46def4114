use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use crate::constants::PRIORITY_METADATA_KEY;
use crate::models::submission::Submission;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    #[default]
    Low,
    Medium,
    High,
}

impl Display for NotificationPriority {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            NotificationPriority::Low => write!(f, "low"),
            NotificationPriority::Medium => write!(f, "medium"),
            NotificationPriority::High => write!(f, "high"),
        }
    }
}

impl FromStr for NotificationPriority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(NotificationPriority::Low),
            "medium" => Ok(NotificationPriority::Medium),
            "high" => Ok(NotificationPriority::High),
            _ => Err(anyhow::anyhow!("Invalid notification priority: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannelKind {
    InApp,
    Email,
}

impl Display for NotificationChannelKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            NotificationChannelKind::InApp => write!(f, "in_app"),
            NotificationChannelKind::Email => write!(f, "email"),
        }
    }
}

impl FromStr for NotificationChannelKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "in_app" | "in-app" | "inapp" => Ok(NotificationChannelKind::InApp),
            "email" => Ok(NotificationChannelKind::Email),
            _ => Err(anyhow::anyhow!("Invalid notification channel: {}", s)),
        }
    }
}

/// File-count based priority heuristic. A `priority` metadata hint wins over the
/// derived value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityPolicy {
    /// More files than this ⇒ `high`.
    pub high_threshold: usize,
    /// At least this many files ⇒ `medium`.
    pub medium_threshold: usize,
}

impl Default for PriorityPolicy {
    fn default() -> Self {
        Self {
            high_threshold: 5,
            medium_threshold: 2,
        }
    }
}

impl PriorityPolicy {
    pub fn priority_for(&self, submission: &Submission) -> NotificationPriority {
        if let Some(hint) = submission
            .metadata
            .get(PRIORITY_METADATA_KEY)
            .and_then(|v| v.parse::<NotificationPriority>().ok())
        {
            return hint;
        }

        let count = submission.file_count();
        if count > self.high_threshold {
            NotificationPriority::High
        } else if count >= self.medium_threshold {
            NotificationPriority::Medium
        } else {
            NotificationPriority::Low
        }
    }
}

/// Fire-and-forget alert for administrators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub title: String,
    pub body: String,
    pub priority: NotificationPriority,
    pub channels: Vec<NotificationChannelKind>,
    pub metadata: BTreeMap<String, String>,
}

impl NotificationRequest {
    /// The "new submission" alert sent once a submission's files are delivered.
    pub fn for_submission(
        submission: &Submission,
        channels: &[NotificationChannelKind],
        policy: &PriorityPolicy,
    ) -> Self {
        let count = submission.file_count();
        let noun = if count == 1 { "file" } else { "files" };

        let mut body = format!(
            "User {} submitted {} {} ({} bytes).",
            submission.owner_id,
            count,
            noun,
            submission.total_bytes()
        );
        if let Some(order_id) = submission.metadata.get("order_id") {
            body.push_str(&format!(" Order: {}.", order_id));
        }
        if let Some(notes) = submission.metadata.get("notes") {
            body.push_str(&format!(" Notes: {}", notes));
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("submission_id".to_string(), submission.id.to_string());
        metadata.insert("file_count".to_string(), count.to_string());
        metadata.insert("owner_id".to_string(), submission.owner_id.clone());

        let mut channels = channels.to_vec();
        channels.sort();
        channels.dedup();

        Self {
            title: format!("New document submission ({} {})", count, noun),
            body,
            priority: policy.priority_for(submission),
            channels,
            metadata,
        }
    }
}
