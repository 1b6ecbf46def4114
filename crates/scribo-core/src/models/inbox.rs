use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::notification::{NotificationPriority, NotificationRequest};

/// Which delivery tier produced an inbox record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryVia {
    Direct,
    Queue,
}

impl Display for DeliveryVia {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DeliveryVia::Direct => write!(f, "direct"),
            DeliveryVia::Queue => write!(f, "queue"),
        }
    }
}

impl FromStr for DeliveryVia {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(DeliveryVia::Direct),
            "queue" => Ok(DeliveryVia::Queue),
            _ => Err(anyhow::anyhow!("Invalid delivery tier: {}", s)),
        }
    }
}

/// A file persisted to object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredFile {
    pub filename: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub storage_key: String,
    pub storage_url: String,
    /// Hex-encoded SHA-256 of the payload.
    pub sha256: String,
}

/// The record administrators see in their inbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboxRecord {
    pub submission_id: Uuid,
    pub owner_id: String,
    pub metadata: BTreeMap<String, String>,
    pub files: Vec<StoredFile>,
    pub via: DeliveryVia,
    pub submitted_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

/// In-app notification persisted for the admin dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminNotification {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub priority: NotificationPriority,
    pub metadata: BTreeMap<String, String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&NotificationRequest> for AdminNotification {
    fn from(request: &NotificationRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: request.title.clone(),
            body: request.body.clone(),
            priority: request.priority,
            metadata: request.metadata.clone(),
            read: false,
            created_at: Utc::now(),
        }
    }
}
