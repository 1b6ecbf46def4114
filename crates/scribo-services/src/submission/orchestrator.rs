//! Submission orchestrator
//!
//! Drives one submission at a time through
//! `idle → uploading → submitting → {notifying} → {success | partial | error}`:
//!
//! 1. Try the direct channel once, bounded by `direct_timeout`.
//! 2. On any direct failure, enqueue the same submission (same id) in the durable queue
//!    and poll its status until it settles or the poll budget runs out.
//! 3. Notify administrators after a direct delivery; the queue notifies for its own
//!    deliveries and reports the result as `completed` or `partial`.
//!
//! Each `submit` call is a *flow* with its own generation number and cancellation
//! token. `cancel` and `reset` bump the generation, so callbacks from an abandoned flow
//! are dropped instead of reaching observers.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use scribo_core::models::{
    DeliveryVia, Identity, QueueEntry, QueueStatus, Submission, SubmissionFile,
    SubmissionOutcome, SubmissionStatus,
};
use scribo_core::validation::{validate_submission, SubmissionLimits};
use scribo_core::{Config, SubmissionError, ValidationError};
use scribo_worker::{QueueError, SubmissionDelivery, SubmissionNotifier, SubmissionQueue};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub direct_timeout: Duration,
    pub poll_interval: Duration,
    /// Consecutive failed status lookups tolerated before giving up.
    pub max_poll_errors: u32,
    pub max_poll_duration: Duration,
    pub limits: SubmissionLimits,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            direct_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
            max_poll_errors: 5,
            max_poll_duration: Duration::from_secs(300),
            limits: SubmissionLimits::default(),
        }
    }
}

impl From<&Config> for OrchestratorConfig {
    fn from(config: &Config) -> Self {
        Self {
            direct_timeout: config.direct_timeout(),
            poll_interval: config.poll_interval(),
            max_poll_errors: config.max_poll_errors(),
            max_poll_duration: config.max_poll_duration(),
            limits: config.submission_limits(),
        }
    }
}

/// Receives state changes of an orchestrator.
///
/// Callbacks run synchronously on the submitting task while the orchestrator serializes
/// emissions, so they must not call `cancel` or `reset` on the same orchestrator.
pub trait SubmissionObserver: Send + Sync {
    fn on_status_change(&self, _status: SubmissionStatus) {}

    /// Called once when a flow ends in `success` or `partial`.
    fn on_success(&self, _outcome: &SubmissionOutcome) {}

    /// Called once when a flow ends in `error`.
    fn on_error(&self, _error: &SubmissionError) {}
}

/// The orchestrator's view of the durable queue.
#[async_trait]
pub trait QueueClient: Send + Sync {
    async fn enqueue(&self, submission: Submission) -> Result<Uuid, QueueError>;

    async fn status(&self, queue_id: Uuid) -> Result<Option<QueueEntry>, QueueError>;
}

#[async_trait]
impl QueueClient for SubmissionQueue {
    async fn enqueue(&self, submission: Submission) -> Result<Uuid, QueueError> {
        SubmissionQueue::enqueue(self, submission).await
    }

    async fn status(&self, queue_id: Uuid) -> Result<Option<QueueEntry>, QueueError> {
        self.get_status(queue_id).await
    }
}

#[derive(Default)]
struct FlowState {
    status: SubmissionStatus,
    generation: u64,
    cancel: Option<CancellationToken>,
}

/// Marker for a flow that was cancelled or reset underneath itself.
struct Superseded;

type FlowResult = Result<SubmissionOutcome, Superseded>;

pub struct SubmissionOrchestrator {
    direct: Arc<dyn SubmissionDelivery>,
    queue: Arc<dyn QueueClient>,
    notifier: Arc<dyn SubmissionNotifier>,
    observers: Vec<Arc<dyn SubmissionObserver>>,
    config: OrchestratorConfig,
    state: Mutex<FlowState>,
    // Held while observers are called, so cancel/reset never interleave with an emission.
    emit: Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SubmissionOrchestrator {
    pub fn new(
        direct: Arc<dyn SubmissionDelivery>,
        queue: Arc<dyn QueueClient>,
        notifier: Arc<dyn SubmissionNotifier>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            direct,
            queue,
            notifier,
            observers: Vec::new(),
            config,
            state: Mutex::new(FlowState::default()),
            emit: Mutex::new(()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SubmissionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn status(&self) -> SubmissionStatus {
        lock(&self.state).status
    }

    /// Deliver `files` on behalf of `identity`.
    ///
    /// Precondition failures return immediately with a validation error and no state
    /// change. Every other outcome is reported both in the return value and to
    /// observers.
    #[tracing::instrument(skip(self, identity, files, metadata), fields(owner_id = %identity.owner_id, file_count = files.len()))]
    pub async fn submit(
        &self,
        identity: &Identity,
        files: Vec<SubmissionFile>,
        metadata: BTreeMap<String, String>,
    ) -> SubmissionOutcome {
        if let Err(e) = validate_submission(identity, &files, &self.config.limits) {
            tracing::debug!(error = %e, "Submission rejected");
            return SubmissionOutcome::failed(e.into(), None, false);
        }

        let (generation, token) = match self.begin_flow() {
            Ok(flow) => flow,
            Err(e) => {
                tracing::debug!(error = %e, "Submission rejected");
                return SubmissionOutcome::failed(e.into(), None, false);
            }
        };

        let submission = Submission::new(identity.owner_id.clone(), files, metadata);
        let submission_id = submission.id;
        let mut queued = false;

        match self
            .run_flow(generation, &token, submission, &mut queued)
            .await
        {
            Ok(outcome) => outcome,
            Err(Superseded) => {
                tracing::info!(submission_id = %submission_id, queued = queued, "Submission flow cancelled");
                SubmissionOutcome::cancelled(Some(submission_id), queued)
            }
        }
    }

    /// Abandon the active flow: status returns to `idle` at once and the flow's later
    /// callbacks are suppressed. An already enqueued submission keeps being delivered.
    /// Returns `false` when there was nothing to cancel.
    pub fn cancel(&self) -> bool {
        let _emit = lock(&self.emit);
        let mut state = lock(&self.state);
        if !state.status.is_active() {
            return false;
        }
        Self::supersede(&mut state);
        drop(state);

        tracing::info!("Submission cancelled");
        self.notify_status(SubmissionStatus::Idle);
        true
    }

    /// Return to `idle` from any state, cancelling an active flow.
    pub fn reset(&self) {
        let _emit = lock(&self.emit);
        let mut state = lock(&self.state);
        if state.status == SubmissionStatus::Idle {
            return;
        }
        Self::supersede(&mut state);
        drop(state);

        self.notify_status(SubmissionStatus::Idle);
    }

    fn supersede(state: &mut FlowState) {
        state.generation += 1;
        if let Some(token) = state.cancel.take() {
            token.cancel();
        }
        state.status = SubmissionStatus::Idle;
    }

    fn begin_flow(&self) -> Result<(u64, CancellationToken), ValidationError> {
        let _emit = lock(&self.emit);
        let mut state = lock(&self.state);
        if state.status.is_active() {
            return Err(ValidationError::SubmissionInProgress);
        }

        let was_settled = state.status != SubmissionStatus::Idle;
        state.generation += 1;
        let token = CancellationToken::new();
        state.cancel = Some(token.clone());
        state.status = SubmissionStatus::Uploading;
        let generation = state.generation;
        drop(state);

        if was_settled {
            self.notify_status(SubmissionStatus::Idle);
        }
        self.notify_status(SubmissionStatus::Uploading);
        Ok((generation, token))
    }

    fn notify_status(&self, status: SubmissionStatus) {
        for observer in &self.observers {
            observer.on_status_change(status);
        }
    }

    /// Apply a non-terminal transition for `generation`.
    fn transition(&self, generation: u64, next: SubmissionStatus) -> Result<(), Superseded> {
        let _emit = lock(&self.emit);
        let mut state = lock(&self.state);
        if state.generation != generation {
            return Err(Superseded);
        }
        if !state.status.can_transition_to(next) {
            tracing::warn!(from = %state.status, to = %next, "Invalid status transition dropped");
            return Ok(());
        }
        state.status = next;
        drop(state);

        self.notify_status(next);
        Ok(())
    }

    /// Settle the flow in `outcome.status` and fire the terminal callback.
    fn finish(&self, generation: u64, outcome: SubmissionOutcome) -> FlowResult {
        let _emit = lock(&self.emit);
        let mut state = lock(&self.state);
        if state.generation != generation {
            return Err(Superseded);
        }
        if !state.status.can_transition_to(outcome.status) {
            tracing::warn!(from = %state.status, to = %outcome.status, "Invalid status transition dropped");
            return Ok(outcome);
        }
        state.status = outcome.status;
        state.cancel = None;
        drop(state);

        self.notify_status(outcome.status);
        match outcome.error {
            Some(ref error) => {
                for observer in &self.observers {
                    observer.on_error(error);
                }
            }
            None => {
                for observer in &self.observers {
                    observer.on_success(&outcome);
                }
            }
        }
        Ok(outcome)
    }

    async fn run_flow(
        &self,
        generation: u64,
        token: &CancellationToken,
        submission: Submission,
        queued: &mut bool,
    ) -> FlowResult {
        self.transition(generation, SubmissionStatus::Submitting)?;
        let submission_id = submission.id;

        let direct = tokio::select! {
            result = tokio::time::timeout(
                self.config.direct_timeout,
                self.direct.deliver(&submission, DeliveryVia::Direct),
            ) => result,
            _ = token.cancelled() => return Err(Superseded),
        };

        let failure = match direct {
            Ok(Ok(receipt)) if receipt.success => {
                if !receipt.notification_channels.is_empty() {
                    self.transition(generation, SubmissionStatus::Notifying)?;
                    let notified = tokio::select! {
                        result = self.notifier.notify_submission(&submission, &receipt.notification_channels) => result,
                        _ = token.cancelled() => return Err(Superseded),
                    };
                    if let Err(e) = notified {
                        tracing::warn!(error = %e, "Admin notification failed after direct delivery");
                    }
                }
                tracing::info!(submission_id = %submission_id, "Submission delivered directly");
                return self.finish(generation, SubmissionOutcome::delivered(submission_id));
            }
            Ok(Ok(_)) => SubmissionError::TransientDelivery(
                "direct channel returned an unsuccessful receipt".to_string(),
            ),
            Ok(Err(e)) => SubmissionError::TransientDelivery(e.to_string()),
            Err(_) => SubmissionError::TransientDelivery(format!(
                "direct delivery timed out after {}s",
                self.config.direct_timeout.as_secs()
            )),
        };
        tracing::warn!(
            submission_id = %submission_id,
            error = %failure,
            "Direct delivery failed, falling back to queue"
        );

        let enqueued = tokio::select! {
            result = self.queue.enqueue(submission) => result,
            _ = token.cancelled() => return Err(Superseded),
        };
        let queue_id = match enqueued {
            Ok(queue_id) => queue_id,
            Err(e) => {
                tracing::error!(submission_id = %submission_id, error = %e, "Failed to enqueue submission");
                return self.finish(
                    generation,
                    SubmissionOutcome::failed(
                        SubmissionError::Internal(format!("could not queue submission: {e}")),
                        Some(submission_id),
                        false,
                    ),
                );
            }
        };
        *queued = true;
        self.transition(generation, SubmissionStatus::Submitting)?;

        self.poll_queue(generation, token, queue_id).await
    }

    async fn poll_queue(
        &self,
        generation: u64,
        token: &CancellationToken,
        queue_id: Uuid,
    ) -> FlowResult {
        let deadline = tokio::time::Instant::now() + self.config.max_poll_duration;
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut consecutive_errors = 0u32;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = token.cancelled() => return Err(Superseded),
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(queue_id = %queue_id, "Stopped waiting for queued submission");
                    return self.finish(
                        generation,
                        SubmissionOutcome::failed(
                            SubmissionError::Internal(format!(
                                "no final status after {}s; delivery continues in the background",
                                self.config.max_poll_duration.as_secs()
                            )),
                            Some(queue_id),
                            true,
                        ),
                    );
                }
            }

            let lookup = tokio::select! {
                result = self.queue.status(queue_id) => result,
                _ = token.cancelled() => return Err(Superseded),
            };

            let entry = match lookup {
                Ok(Some(entry)) => {
                    consecutive_errors = 0;
                    entry
                }
                missing => {
                    consecutive_errors += 1;
                    let reason = match missing {
                        Err(e) => e.to_string(),
                        Ok(_) => "queue entry not found".to_string(),
                    };
                    tracing::debug!(
                        queue_id = %queue_id,
                        consecutive_errors = consecutive_errors,
                        error = %reason,
                        "Queue status lookup failed"
                    );
                    if consecutive_errors >= self.config.max_poll_errors {
                        return self.finish(
                            generation,
                            SubmissionOutcome::failed(
                                SubmissionError::Internal(format!(
                                    "lost track of queued submission: {reason}"
                                )),
                                Some(queue_id),
                                true,
                            ),
                        );
                    }
                    continue;
                }
            };

            match entry.status {
                QueueStatus::Completed => {
                    tracing::info!(queue_id = %queue_id, attempts = entry.attempts, "Queued submission completed");
                    return self.finish(
                        generation,
                        SubmissionOutcome::via_queue(queue_id, SubmissionStatus::Success),
                    );
                }
                QueueStatus::Partial => {
                    tracing::info!(
                        queue_id = %queue_id,
                        last_error = ?entry.last_error,
                        "Queued submission delivered, notification incomplete"
                    );
                    return self.finish(
                        generation,
                        SubmissionOutcome::via_queue(queue_id, SubmissionStatus::Partial),
                    );
                }
                QueueStatus::Failed => {
                    let error = SubmissionError::QueueExhaustion {
                        attempts: entry.attempts,
                        last_error: entry
                            .last_error
                            .unwrap_or_else(|| "unknown error".to_string()),
                    };
                    tracing::error!(queue_id = %queue_id, error = %error, "Queued submission failed");
                    return self.finish(
                        generation,
                        SubmissionOutcome::failed(error, Some(queue_id), true),
                    );
                }
                QueueStatus::Queued | QueueStatus::Processing => {}
            }
        }
    }
}
