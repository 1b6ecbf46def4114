//! Submission queue: per-entry retry workers, backoff, retention reaper.
//!
//! Every enqueued submission gets its own worker task. Workers for different entries run
//! concurrently but only `max_workers` delivery attempts are in progress at once, and an
//! entry is never driven by two workers (see the in-flight set).
//!
//! Shutdown: [`SubmissionQueue::shutdown`] cancels sleeping workers and the reaper; an
//! attempt that is already running finishes (bounded by `attempt_timeout`). Entries left
//! non-terminal are picked up again by [`SubmissionQueue::resume_pending`].

use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use scribo_core::models::{DeliveryVia, QueueEntry, QueueStatus, Submission};
use scribo_core::Config;
use scribo_db::{QueueStore, QueueStoreError};

use crate::context::{SubmissionDelivery, SubmissionNotifier};

/// Delay before the retry that follows attempt number `attempt` (1-based):
/// `base * 2^(attempt-1)`, capped at `max`.
pub fn compute_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    base.checked_mul(1u32 << exponent).unwrap_or(max).min(max)
}

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_workers: usize,
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub attempt_timeout: Duration,
    /// How long terminal entries stay queryable.
    pub retention: Duration,
    /// Interval between reaper runs. Zero disables the reaper.
    pub reap_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_attempts: 5,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(30),
            retention: Duration::from_secs(600),
            reap_interval: Duration::from_secs(60),
        }
    }
}

impl From<&Config> for QueueConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_workers: config.queue_max_workers(),
            max_attempts: config.queue_max_attempts(),
            base_backoff: config.queue_base_backoff(),
            max_backoff: config.queue_max_backoff(),
            attempt_timeout: config.queue_attempt_timeout(),
            retention: config.queue_retention(),
            reap_interval: config.queue_reap_interval(),
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue store error: {0}")]
    Store(#[from] QueueStoreError),

    #[error("Queue is shutting down")]
    ShuttingDown,
}

struct QueueInner {
    store: Arc<dyn QueueStore>,
    delivery: Arc<dyn SubmissionDelivery>,
    notifier: Option<Arc<dyn SubmissionNotifier>>,
    config: QueueConfig,
    semaphore: Arc<Semaphore>,
    in_flight: Mutex<HashSet<Uuid>>,
    shutdown: CancellationToken,
}

/// Releases an entry's in-flight slot when its worker ends, however it ends.
struct InFlightGuard {
    inner: Arc<QueueInner>,
    submission_id: Uuid,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.inner.in_flight.lock() {
            in_flight.remove(&self.submission_id);
        }
    }
}

#[derive(Clone)]
pub struct SubmissionQueue {
    inner: Arc<QueueInner>,
}

impl SubmissionQueue {
    /// Create the queue and start its reaper. Must be called inside a Tokio runtime.
    pub fn new(
        store: Arc<dyn QueueStore>,
        delivery: Arc<dyn SubmissionDelivery>,
        notifier: Option<Arc<dyn SubmissionNotifier>>,
        config: QueueConfig,
    ) -> Self {
        tracing::info!(
            max_workers = config.max_workers,
            max_attempts = config.max_attempts,
            base_backoff_ms = config.base_backoff.as_millis() as u64,
            max_backoff_ms = config.max_backoff.as_millis() as u64,
            "Submission queue started"
        );

        let inner = Arc::new(QueueInner {
            store,
            delivery,
            notifier,
            semaphore: Arc::new(Semaphore::new(config.max_workers.max(1))),
            config,
            in_flight: Mutex::new(HashSet::new()),
            shutdown: CancellationToken::new(),
        });

        if !inner.config.reap_interval.is_zero() {
            tokio::spawn(Self::reaper(inner.clone()));
        }

        Self { inner }
    }

    /// Accept a submission for retried delivery and return its queue id.
    ///
    /// Idempotent: an id that already has an entry yields the same queue id, without a
    /// second entry or a second worker.
    #[tracing::instrument(skip(self, submission), fields(submission_id = %submission.id))]
    pub async fn enqueue(&self, submission: Submission) -> Result<Uuid, QueueError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(QueueError::ShuttingDown);
        }

        let queue_id = submission.id;
        let entry = QueueEntry::new(queue_id);
        let inserted = self
            .inner
            .store
            .insert_if_absent(&entry, &submission)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to persist queue entry");
                e
            })?;

        if !inserted {
            tracing::debug!("Submission already queued, returning existing queue id");
            return Ok(queue_id);
        }

        Self::spawn_worker(&self.inner, queue_id);
        tracing::info!(
            file_count = submission.file_count(),
            "Submission accepted by queue"
        );
        Ok(queue_id)
    }

    pub async fn get_status(&self, queue_id: Uuid) -> Result<Option<QueueEntry>, QueueError> {
        Ok(self.inner.store.get(queue_id).await?)
    }

    /// Restart workers for entries a previous process left unfinished.
    pub async fn resume_pending(&self) -> Result<usize, QueueError> {
        let pending = self.inner.store.list_pending().await?;
        let mut resumed = 0;
        for entry in pending {
            if Self::spawn_worker(&self.inner, entry.submission_id) {
                resumed += 1;
            }
        }
        tracing::info!(resumed = resumed, "Resumed pending queue entries");
        Ok(resumed)
    }

    /// Number of entries with a live worker.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Stop the reaper and every worker at its next suspension point.
    pub fn shutdown(&self) {
        tracing::info!("Initiating submission queue shutdown");
        self.inner.shutdown.cancel();
    }

    fn spawn_worker(inner: &Arc<QueueInner>, submission_id: Uuid) -> bool {
        if inner.shutdown.is_cancelled() {
            return false;
        }
        match inner.in_flight.lock() {
            Ok(mut in_flight) => {
                if !in_flight.insert(submission_id) {
                    tracing::debug!(submission_id = %submission_id, "Worker already running");
                    return false;
                }
            }
            Err(_) => {
                tracing::error!(submission_id = %submission_id, "In-flight set poisoned");
                return false;
            }
        }

        let guard = InFlightGuard {
            inner: inner.clone(),
            submission_id,
        };
        tokio::spawn(async move {
            let inner = guard.inner.clone();
            Self::process_with_retry(inner, submission_id).await;
            drop(guard);
        });
        true
    }

    async fn persist(inner: &QueueInner, entry: &QueueEntry) -> bool {
        match inner.store.update(entry).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    submission_id = %entry.submission_id,
                    error = %e,
                    "Failed to persist queue entry, worker stopping"
                );
                false
            }
        }
    }

    /// Sleep for `duration` unless the queue shuts down first. Returns false on shutdown.
    async fn sleep_or_shutdown(inner: &QueueInner, duration: Duration) -> bool {
        if duration.is_zero() {
            return !inner.shutdown.is_cancelled();
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = inner.shutdown.cancelled() => false,
        }
    }

    #[tracing::instrument(skip(inner))]
    async fn process_with_retry(inner: Arc<QueueInner>, submission_id: Uuid) {
        let submission = match inner.store.load_submission(submission_id).await {
            Ok(Some(submission)) => submission,
            Ok(None) => {
                tracing::warn!("Queue entry vanished before processing");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load queued submission");
                return;
            }
        };
        let mut entry = match inner.store.get(submission_id).await {
            Ok(Some(entry)) if !entry.is_terminal() => entry,
            Ok(_) => return,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load queue entry");
                return;
            }
        };

        // A resumed entry may still be inside its backoff window.
        if let Some(wait) = entry
            .next_attempt_at
            .and_then(|at| (at - Utc::now()).to_std().ok())
        {
            if !Self::sleep_or_shutdown(&inner, wait).await {
                return;
            }
        }

        loop {
            let permit = tokio::select! {
                permit = inner.semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
                _ = inner.shutdown.cancelled() => return,
            };

            entry.attempts += 1;
            entry.status = QueueStatus::Processing;
            entry.next_attempt_at = None;
            entry.updated_at = Utc::now();
            if !Self::persist(&inner, &entry).await {
                return;
            }

            let result = tokio::time::timeout(
                inner.config.attempt_timeout,
                inner.delivery.deliver(&submission, DeliveryVia::Queue),
            )
            .await;

            let (failure, retryable) = match result {
                Ok(Ok(receipt)) if receipt.success => {
                    let status = match (&inner.notifier, receipt.notification_channels.is_empty()) {
                        (Some(notifier), false) => match notifier
                            .notify_submission(&submission, &receipt.notification_channels)
                            .await
                        {
                            Ok(()) => QueueStatus::Completed,
                            Err(e) => {
                                tracing::warn!(error = %e, "Delivered but notification failed");
                                entry.last_error = Some(e.to_string());
                                QueueStatus::Partial
                            }
                        },
                        _ => QueueStatus::Completed,
                    };
                    drop(permit);

                    let now = Utc::now();
                    entry.status = status;
                    entry.updated_at = now;
                    entry.completed_at = Some(now);
                    Self::persist(&inner, &entry).await;
                    tracing::info!(
                        attempts = entry.attempts,
                        status = %status,
                        "Queued submission delivered"
                    );
                    return;
                }
                Ok(Ok(_)) => ("delivery reported an unsuccessful receipt".to_string(), true),
                Ok(Err(e)) => (e.to_string(), e.is_retryable()),
                Err(_) => (
                    format!(
                        "delivery attempt timed out after {}s",
                        inner.config.attempt_timeout.as_secs()
                    ),
                    true,
                ),
            };
            drop(permit);

            tracing::warn!(
                attempts = entry.attempts,
                max_attempts = inner.config.max_attempts,
                retryable = retryable,
                error = %failure,
                "Queued delivery attempt failed"
            );
            entry.last_error = Some(failure);
            let now = Utc::now();
            entry.updated_at = now;

            if !retryable || entry.attempts >= inner.config.max_attempts {
                entry.status = QueueStatus::Failed;
                entry.completed_at = Some(now);
                Self::persist(&inner, &entry).await;
                tracing::error!(
                    attempts = entry.attempts,
                    retryable = retryable,
                    "Queued submission failed"
                );
                return;
            }

            let backoff = compute_backoff(
                entry.attempts,
                inner.config.base_backoff,
                inner.config.max_backoff,
            );
            entry.status = QueueStatus::Queued;
            entry.next_attempt_at = chrono::Duration::from_std(backoff)
                .ok()
                .map(|delay| now + delay);
            if !Self::persist(&inner, &entry).await {
                return;
            }
            tracing::info!(
                next_attempt = entry.attempts + 1,
                backoff_ms = backoff.as_millis() as u64,
                "Scheduling queued delivery retry"
            );

            if !Self::sleep_or_shutdown(&inner, backoff).await {
                return;
            }
        }
    }

    async fn reaper(inner: Arc<QueueInner>) {
        let mut interval = tokio::time::interval(inner.config.reap_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let retention =
            chrono::Duration::from_std(inner.config.retention).unwrap_or(chrono::Duration::zero());

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match inner.store.purge_terminal(Utc::now() - retention).await {
                        Ok(0) => {}
                        Ok(purged) => tracing::debug!(purged = purged, "Purged expired queue entries"),
                        Err(e) => tracing::error!(error = %e, "Queue reaper failed"),
                    }
                }
                _ = inner.shutdown.cancelled() => break,
            }
        }
        tracing::debug!("Queue reaper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base_then_caps() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(30);
        assert_eq!(compute_backoff(1, base, max), Duration::from_secs(1));
        assert_eq!(compute_backoff(2, base, max), Duration::from_secs(2));
        assert_eq!(compute_backoff(3, base, max), Duration::from_secs(4));
        assert_eq!(compute_backoff(4, base, max), Duration::from_secs(8));
        assert_eq!(compute_backoff(5, base, max), Duration::from_secs(16));
        assert_eq!(compute_backoff(6, base, max), max);
        assert_eq!(compute_backoff(200, base, max), max);
    }

    #[test]
    fn backoff_treats_attempt_zero_as_first() {
        let base = Duration::from_millis(250);
        assert_eq!(compute_backoff(0, base, Duration::from_secs(30)), base);
    }

    #[test]
    fn default_budget_is_fifteen_seconds_of_backoff() {
        let config = QueueConfig::default();
        let total: Duration = (1..config.max_attempts)
            .map(|attempt| compute_backoff(attempt, config.base_backoff, config.max_backoff))
            .sum();
        assert_eq!(total, Duration::from_secs(15));
    }
}
