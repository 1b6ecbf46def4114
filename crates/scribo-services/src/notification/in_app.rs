use async_trait::async_trait;
use std::sync::Arc;

use scribo_core::models::{AdminNotification, NotificationChannelKind, NotificationRequest};
use scribo_db::AdminInbox;

use super::{NotificationChannel, NotificationError};

/// Persists the notification to the admin dashboard feed.
#[derive(Clone)]
pub struct InAppChannel {
    inbox: Arc<dyn AdminInbox>,
}

impl InAppChannel {
    pub fn new(inbox: Arc<dyn AdminInbox>) -> Self {
        Self { inbox }
    }
}

#[async_trait]
impl NotificationChannel for InAppChannel {
    fn kind(&self) -> NotificationChannelKind {
        NotificationChannelKind::InApp
    }

    async fn deliver(&self, request: &NotificationRequest) -> Result<(), NotificationError> {
        let notification = AdminNotification::from(request);
        self.inbox
            .insert_notification(&notification)
            .await
            .map_err(|e| NotificationError::InApp(e.to_string()))?;
        tracing::debug!(notification_id = %notification.id, "In-app notification stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scribo_core::models::NotificationPriority;
    use scribo_db::MemoryInbox;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn stores_unread_notification_with_priority() {
        let inbox = Arc::new(MemoryInbox::new());
        let channel = InAppChannel::new(inbox.clone());

        let request = NotificationRequest {
            title: "New document submission (6 files)".to_string(),
            body: "User u submitted 6 files.".to_string(),
            priority: NotificationPriority::High,
            channels: vec![NotificationChannelKind::InApp],
            metadata: BTreeMap::from([("file_count".to_string(), "6".to_string())]),
        };
        channel.deliver(&request).await.unwrap();

        let stored = inbox.list_notifications(10).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].priority, NotificationPriority::High);
        assert!(!stored[0].read);
        assert_eq!(stored[0].metadata.get("file_count").map(String::as_str), Some("6"));
    }
}
