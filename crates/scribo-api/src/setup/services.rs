//! Service initialization

use crate::state::AppState;
use anyhow::{Context, Result};
use scribo_core::models::NotificationChannelKind;
use scribo_core::Config;
use scribo_db::{AdminInbox, MemoryInbox, MemoryQueueStore, PgInbox, PgQueueStore, QueueStore};
use scribo_infra::SmtpEmailSender;
use scribo_services::{
    DirectChannel, EmailChannel, InAppChannel, NotificationService, OrchestratorConfig,
    QueueConfig, SubmissionNotifier, SubmissionQueue,
};
use scribo_storage::create_storage;
use sqlx::PgPool;
use std::sync::Arc;

/// Wire storage, inbox, notification fan-out, direct channel and durable queue.
///
/// Entries left unfinished by a previous process are resumed before this returns.
pub async fn initialize_services(config: &Config, pool: Option<PgPool>) -> Result<Arc<AppState>> {
    let storage = create_storage(config)
        .await
        .context("Failed to initialize object storage")?;
    tracing::info!(backend = %storage.backend_type(), "Object storage initialized");

    let (inbox, queue_store): (Arc<dyn AdminInbox>, Arc<dyn QueueStore>) = match &pool {
        Some(pool) => (
            Arc::new(PgInbox::new(pool.clone())),
            Arc::new(PgQueueStore::new(pool.clone())),
        ),
        None => (Arc::new(MemoryInbox::new()), Arc::new(MemoryQueueStore::new())),
    };

    let notifier = Arc::new(notification_service(config, inbox.clone())?);

    let direct = Arc::new(DirectChannel::new(
        storage.clone(),
        inbox.clone(),
        config.notification_channels().to_vec(),
    ));

    let queue_notifier: Arc<dyn SubmissionNotifier> = notifier.clone();
    let queue = SubmissionQueue::new(
        queue_store,
        direct.clone(),
        Some(queue_notifier),
        QueueConfig::from(config),
    );
    let resumed = queue
        .resume_pending()
        .await
        .context("Failed to resume pending submissions")?;
    if resumed > 0 {
        tracing::info!(resumed = resumed, "Resumed unfinished queued submissions");
    }

    Ok(Arc::new(AppState {
        config: config.clone(),
        db_pool: pool,
        storage,
        inbox,
        direct,
        notifier,
        queue,
        orchestrator: OrchestratorConfig::from(config),
        flows: Arc::default(),
    }))
}

fn notification_service(config: &Config, inbox: Arc<dyn AdminInbox>) -> Result<NotificationService> {
    let mut service = NotificationService::new(config.priority_policy());

    for kind in config.notification_channels() {
        service = match kind {
            NotificationChannelKind::InApp => {
                service.with_channel(Arc::new(InAppChannel::new(inbox.clone())))
            }
            NotificationChannelKind::Email => {
                let sender = SmtpEmailSender::from_config(config)
                    .context("Failed to initialize SMTP sender")?;
                service.with_channel(Arc::new(EmailChannel::new(
                    Arc::new(sender),
                    config.admin_emails().to_vec(),
                )))
            }
        };
    }

    tracing::info!(
        channels = ?config.notification_channels(),
        admin_emails = config.admin_emails().len(),
        "Notification channels configured"
    );
    Ok(service)
}
