//! Orchestrator flow tests
//!
//! Scripted direct/queue collaborators for the state machine, plus an end-to-end run
//! over the in-memory storage, inbox and queue store.

use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use scribo_core::models::{
    DeliveryVia, Identity, NotificationChannelKind, PriorityPolicy, QueueEntry, QueueStatus,
    Submission, SubmissionFile, SubmissionOutcome, SubmissionStatus,
};
use scribo_core::{SubmissionError, ValidationError};
use scribo_db::{AdminInbox, MemoryInbox, MemoryQueueStore};
use scribo_services::{
    DeliveryError, DeliveryReceipt, DirectChannel, InAppChannel, NotificationService,
    OrchestratorConfig, QueueClient, QueueConfig, QueueError, SubmissionDelivery,
    SubmissionNotifier, SubmissionObserver, SubmissionOrchestrator, SubmissionQueue,
};
use scribo_storage::MemoryStorage;

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Status(SubmissionStatus),
    Success(SubmissionStatus),
    Error(SubmissionError),
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn statuses(&self) -> Vec<SubmissionStatus> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Status(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    fn errors(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Error(_)))
            .count()
    }

    fn successes(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Success(_)))
            .count()
    }
}

impl SubmissionObserver for Recorder {
    fn on_status_change(&self, status: SubmissionStatus) {
        self.events.lock().unwrap().push(Event::Status(status));
    }

    fn on_success(&self, outcome: &SubmissionOutcome) {
        self.events
            .lock()
            .unwrap()
            .push(Event::Success(outcome.status));
    }

    fn on_error(&self, error: &SubmissionError) {
        self.events.lock().unwrap().push(Event::Error(error.clone()));
    }
}

struct ScriptedDirect {
    succeed: bool,
    delay: Duration,
    channels: Vec<NotificationChannelKind>,
    seen: Mutex<Vec<Uuid>>,
}

impl ScriptedDirect {
    fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            succeed: true,
            delay: Duration::ZERO,
            channels: vec![NotificationChannelKind::InApp],
            seen: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            succeed: false,
            delay: Duration::ZERO,
            channels: Vec::new(),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            succeed: true,
            delay,
            channels: Vec::new(),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl SubmissionDelivery for ScriptedDirect {
    async fn deliver(
        &self,
        submission: &Submission,
        _via: DeliveryVia,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        self.seen.lock().unwrap().push(submission.id);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if !self.succeed {
            return Err(DeliveryError::Unavailable("inbox unreachable".to_string()));
        }
        Ok(DeliveryReceipt {
            success: true,
            submission_id: submission.id,
            notification_channels: self.channels.clone(),
            duplicate: false,
        })
    }
}

/// Queue double answering status lookups from a script, then from `settled`.
struct ScriptedQueue {
    script: Mutex<VecDeque<Option<QueueStatus>>>,
    settled: Option<QueueStatus>,
    enqueued: Mutex<Vec<Uuid>>,
    fail_enqueue: bool,
}

impl ScriptedQueue {
    fn new(script: Vec<Option<QueueStatus>>, settled: Option<QueueStatus>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            settled,
            enqueued: Mutex::new(Vec::new()),
            fail_enqueue: false,
        })
    }

    fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            settled: None,
            enqueued: Mutex::new(Vec::new()),
            fail_enqueue: true,
        })
    }

    fn enqueued(&self) -> Vec<Uuid> {
        self.enqueued.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueueClient for ScriptedQueue {
    async fn enqueue(&self, submission: Submission) -> Result<Uuid, QueueError> {
        if self.fail_enqueue {
            return Err(QueueError::ShuttingDown);
        }
        self.enqueued.lock().unwrap().push(submission.id);
        Ok(submission.id)
    }

    async fn status(&self, queue_id: Uuid) -> Result<Option<QueueEntry>, QueueError> {
        let next = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.settled);
        Ok(next.map(|status| {
            let mut entry = QueueEntry::new(queue_id);
            entry.status = status;
            entry.attempts = 1;
            entry
        }))
    }
}

#[derive(Default)]
struct CountingNotifier {
    calls: AtomicU32,
    fail: bool,
}

#[async_trait]
impl SubmissionNotifier for CountingNotifier {
    async fn notify_submission(
        &self,
        _submission: &Submission,
        _channels: &[NotificationChannelKind],
    ) -> Result<(), SubmissionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(SubmissionError::Notification("in_app: db down".to_string()))
        } else {
            Ok(())
        }
    }
}

fn files(count: usize) -> Vec<SubmissionFile> {
    (0..count)
        .map(|i| {
            SubmissionFile::new(
                format!("chapter-{i}.pdf"),
                "application/pdf",
                format!("page {i}").into_bytes(),
            )
        })
        .collect()
}

fn identity() -> Identity {
    Identity::signed_in("student-42")
}

fn orchestrator(
    direct: Arc<dyn SubmissionDelivery>,
    queue: Arc<dyn QueueClient>,
    notifier: Arc<dyn SubmissionNotifier>,
    config: OrchestratorConfig,
) -> (SubmissionOrchestrator, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let orchestrator =
        SubmissionOrchestrator::new(direct, queue, notifier, config).with_observer(recorder.clone());
    (orchestrator, recorder)
}

#[tokio::test(start_paused = true)]
async fn direct_success_notifies_and_succeeds() {
    let direct = ScriptedDirect::succeeding();
    let queue = ScriptedQueue::new(Vec::new(), None);
    let notifier = Arc::new(CountingNotifier::default());
    let (orchestrator, recorder) = orchestrator(
        direct.clone(),
        queue.clone(),
        notifier.clone(),
        OrchestratorConfig::default(),
    );

    let outcome = orchestrator
        .submit(&identity(), files(3), BTreeMap::new())
        .await;

    assert!(outcome.success);
    assert!(!outcome.queued);
    assert_eq!(outcome.status, SubmissionStatus::Success);
    assert_eq!(
        recorder.statuses(),
        vec![
            SubmissionStatus::Uploading,
            SubmissionStatus::Submitting,
            SubmissionStatus::Notifying,
            SubmissionStatus::Success,
        ]
    );
    assert_eq!(recorder.successes(), 1);
    assert_eq!(recorder.errors(), 0);
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    assert!(queue.enqueued().is_empty());
    assert_eq!(orchestrator.status(), SubmissionStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn direct_notification_failure_does_not_fail_submission() {
    let notifier = Arc::new(CountingNotifier {
        fail: true,
        ..Default::default()
    });
    let (orchestrator, recorder) = orchestrator(
        ScriptedDirect::succeeding(),
        ScriptedQueue::new(Vec::new(), None),
        notifier,
        OrchestratorConfig::default(),
    );

    let outcome = orchestrator
        .submit(&identity(), files(1), BTreeMap::new())
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.status, SubmissionStatus::Success);
    assert_eq!(recorder.errors(), 0);
}

#[tokio::test(start_paused = true)]
async fn falls_back_to_queue_with_same_submission_id() {
    let direct = ScriptedDirect::failing();
    let queue = ScriptedQueue::new(
        vec![Some(QueueStatus::Processing)],
        Some(QueueStatus::Completed),
    );
    let notifier = Arc::new(CountingNotifier::default());
    let (orchestrator, recorder) = orchestrator(
        direct.clone(),
        queue.clone(),
        notifier.clone(),
        OrchestratorConfig::default(),
    );

    let outcome = orchestrator
        .submit(&identity(), files(2), BTreeMap::new())
        .await;

    assert!(outcome.success);
    assert!(outcome.queued);
    assert_eq!(outcome.status, SubmissionStatus::Success);
    assert_eq!(
        recorder.statuses(),
        vec![
            SubmissionStatus::Uploading,
            SubmissionStatus::Submitting,
            SubmissionStatus::Submitting,
            SubmissionStatus::Success,
        ]
    );

    let direct_id = direct.seen.lock().unwrap()[0];
    assert_eq!(queue.enqueued(), vec![direct_id]);
    assert_eq!(outcome.submission_id, Some(direct_id));
    // The queue notifies for its own deliveries.
    assert_eq!(notifier.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn partial_queue_result_counts_as_success() {
    let (orchestrator, recorder) = orchestrator(
        ScriptedDirect::failing(),
        ScriptedQueue::new(Vec::new(), Some(QueueStatus::Partial)),
        Arc::new(CountingNotifier::default()),
        OrchestratorConfig::default(),
    );

    let outcome = orchestrator
        .submit(&identity(), files(1), BTreeMap::new())
        .await;

    assert!(outcome.success);
    assert!(outcome.is_partial());
    assert_eq!(recorder.events().last(), Some(&Event::Success(SubmissionStatus::Partial)));
}

#[tokio::test(start_paused = true)]
async fn direct_timeout_falls_back_to_queue() {
    let direct = ScriptedDirect::slow(Duration::from_secs(60));
    let queue = ScriptedQueue::new(Vec::new(), Some(QueueStatus::Completed));
    let (orchestrator, _recorder) = orchestrator(
        direct,
        queue.clone(),
        Arc::new(CountingNotifier::default()),
        OrchestratorConfig {
            direct_timeout: Duration::from_secs(2),
            ..OrchestratorConfig::default()
        },
    );

    let started = tokio::time::Instant::now();
    let outcome = orchestrator
        .submit(&identity(), files(1), BTreeMap::new())
        .await;

    assert!(outcome.success);
    assert!(outcome.queued);
    assert_eq!(queue.enqueued().len(), 1);
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn enqueue_failure_reports_error() {
    let (orchestrator, recorder) = orchestrator(
        ScriptedDirect::failing(),
        ScriptedQueue::rejecting(),
        Arc::new(CountingNotifier::default()),
        OrchestratorConfig::default(),
    );

    let outcome = orchestrator
        .submit(&identity(), files(1), BTreeMap::new())
        .await;

    assert!(!outcome.success);
    assert!(!outcome.queued);
    assert!(matches!(outcome.error, Some(SubmissionError::Internal(_))));
    assert_eq!(recorder.errors(), 1);
    assert_eq!(orchestrator.status(), SubmissionStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn validation_failure_has_no_side_effects() {
    let direct = ScriptedDirect::succeeding();
    let (orchestrator, recorder) = orchestrator(
        direct.clone(),
        ScriptedQueue::new(Vec::new(), None),
        Arc::new(CountingNotifier::default()),
        OrchestratorConfig::default(),
    );

    let outcome = orchestrator
        .submit(&Identity::anonymous(), files(1), BTreeMap::new())
        .await;
    assert_eq!(
        outcome.error,
        Some(SubmissionError::Validation(ValidationError::NotSignedIn))
    );

    let outcome = orchestrator
        .submit(&identity(), Vec::new(), BTreeMap::new())
        .await;
    assert_eq!(
        outcome.error,
        Some(SubmissionError::Validation(ValidationError::EmptyFileSet))
    );

    assert!(recorder.events().is_empty());
    assert_eq!(direct.calls(), 0);
    assert_eq!(orchestrator.status(), SubmissionStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn rejects_second_submit_while_active() {
    let direct = ScriptedDirect::slow(Duration::from_secs(5));
    let (orchestrator, recorder) = orchestrator(
        direct.clone(),
        ScriptedQueue::new(Vec::new(), None),
        Arc::new(CountingNotifier::default()),
        OrchestratorConfig::default(),
    );
    let orchestrator = Arc::new(orchestrator);

    let first = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move {
            orchestrator
                .submit(&identity(), files(1), BTreeMap::new())
                .await
        }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;

    let second = orchestrator
        .submit(&identity(), files(1), BTreeMap::new())
        .await;
    assert_eq!(
        second.error,
        Some(SubmissionError::Validation(ValidationError::SubmissionInProgress))
    );

    let first = first.await.unwrap();
    assert!(first.success);
    assert_eq!(direct.calls(), 1);
    assert_eq!(recorder.successes(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancel_suppresses_late_callbacks() {
    let (orchestrator, recorder) = orchestrator(
        ScriptedDirect::slow(Duration::from_secs(20)),
        ScriptedQueue::new(Vec::new(), None),
        Arc::new(CountingNotifier::default()),
        OrchestratorConfig::default(),
    );
    let orchestrator = Arc::new(orchestrator);

    let flow = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move {
            orchestrator
                .submit(&identity(), files(1), BTreeMap::new())
                .await
        }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(orchestrator.cancel());
    assert_eq!(orchestrator.status(), SubmissionStatus::Idle);

    let outcome = flow.await.unwrap();
    assert_eq!(outcome.error, Some(SubmissionError::Cancelled));
    assert_eq!(outcome.status, SubmissionStatus::Idle);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(
        recorder.statuses(),
        vec![
            SubmissionStatus::Uploading,
            SubmissionStatus::Submitting,
            SubmissionStatus::Idle,
        ]
    );
    assert_eq!(recorder.successes(), 0);
    assert_eq!(recorder.errors(), 0);
    assert!(!orchestrator.cancel());
}

#[tokio::test(start_paused = true)]
async fn cancel_while_polling_reports_queued() {
    let queue = ScriptedQueue::new(Vec::new(), Some(QueueStatus::Queued));
    let (orchestrator, recorder) = orchestrator(
        ScriptedDirect::failing(),
        queue.clone(),
        Arc::new(CountingNotifier::default()),
        OrchestratorConfig::default(),
    );
    let orchestrator = Arc::new(orchestrator);

    let flow = tokio::spawn({
        let orchestrator = orchestrator.clone();
        async move {
            orchestrator
                .submit(&identity(), files(1), BTreeMap::new())
                .await
        }
    });
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(orchestrator.cancel());

    let outcome = flow.await.unwrap();
    assert_eq!(outcome.error, Some(SubmissionError::Cancelled));
    assert!(outcome.queued);
    assert_eq!(outcome.submission_id, queue.enqueued().first().copied());
    assert_eq!(recorder.errors(), 0);
}

#[tokio::test(start_paused = true)]
async fn poll_error_budget_ends_flow() {
    let (orchestrator, recorder) = orchestrator(
        ScriptedDirect::failing(),
        ScriptedQueue::new(Vec::new(), None),
        Arc::new(CountingNotifier::default()),
        OrchestratorConfig {
            max_poll_errors: 3,
            ..OrchestratorConfig::default()
        },
    );

    let outcome = orchestrator
        .submit(&identity(), files(1), BTreeMap::new())
        .await;

    assert!(!outcome.success);
    assert!(outcome.queued);
    assert!(matches!(outcome.error, Some(SubmissionError::Internal(ref m)) if m.contains("not found")));
    assert_eq!(recorder.errors(), 1);
}

#[tokio::test(start_paused = true)]
async fn poll_counts_only_consecutive_errors() {
    let (orchestrator, _recorder) = orchestrator(
        ScriptedDirect::failing(),
        ScriptedQueue::new(
            vec![
                None,
                None,
                Some(QueueStatus::Processing),
                None,
                None,
            ],
            Some(QueueStatus::Completed),
        ),
        Arc::new(CountingNotifier::default()),
        OrchestratorConfig {
            max_poll_errors: 3,
            ..OrchestratorConfig::default()
        },
    );

    let outcome = orchestrator
        .submit(&identity(), files(1), BTreeMap::new())
        .await;

    assert!(outcome.success);
}

#[tokio::test(start_paused = true)]
async fn stops_polling_after_max_duration() {
    let (orchestrator, _recorder) = orchestrator(
        ScriptedDirect::failing(),
        ScriptedQueue::new(Vec::new(), Some(QueueStatus::Queued)),
        Arc::new(CountingNotifier::default()),
        OrchestratorConfig {
            max_poll_duration: Duration::from_secs(10),
            ..OrchestratorConfig::default()
        },
    );

    let started = tokio::time::Instant::now();
    let outcome = orchestrator
        .submit(&identity(), files(1), BTreeMap::new())
        .await;

    assert!(!outcome.success);
    assert!(outcome.queued);
    assert!(matches!(outcome.error, Some(SubmissionError::Internal(_))));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(10), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(12), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn resubmit_after_settling_passes_through_idle() {
    let (orchestrator, recorder) = orchestrator(
        ScriptedDirect::succeeding(),
        ScriptedQueue::new(Vec::new(), None),
        Arc::new(CountingNotifier::default()),
        OrchestratorConfig::default(),
    );

    orchestrator
        .submit(&identity(), files(1), BTreeMap::new())
        .await;
    orchestrator
        .submit(&identity(), files(1), BTreeMap::new())
        .await;

    let statuses = recorder.statuses();
    assert_eq!(statuses[3], SubmissionStatus::Success);
    assert_eq!(statuses[4], SubmissionStatus::Idle);
    assert_eq!(statuses[5], SubmissionStatus::Uploading);

    orchestrator.reset();
    assert_eq!(orchestrator.status(), SubmissionStatus::Idle);
    assert_eq!(recorder.statuses().last(), Some(&SubmissionStatus::Idle));
}

fn pipeline(
    direct_delivery: Arc<dyn SubmissionDelivery>,
    queue_delivery: Arc<dyn SubmissionDelivery>,
    inbox: MemoryInbox,
) -> (SubmissionOrchestrator, Arc<Recorder>) {
    let notifier: Arc<dyn SubmissionNotifier> = Arc::new(
        NotificationService::new(PriorityPolicy::default())
            .with_channel(Arc::new(InAppChannel::new(Arc::new(inbox)))),
    );
    let queue = SubmissionQueue::new(
        Arc::new(MemoryQueueStore::new()),
        queue_delivery,
        Some(notifier.clone()),
        QueueConfig {
            reap_interval: Duration::ZERO,
            ..QueueConfig::default()
        },
    );
    orchestrator(
        direct_delivery,
        Arc::new(queue),
        notifier,
        OrchestratorConfig::default(),
    )
}

#[tokio::test(start_paused = true)]
async fn queue_exhaustion_reports_error_once() {
    let inbox = MemoryInbox::new();
    let (orchestrator, recorder) = pipeline(
        ScriptedDirect::failing(),
        ScriptedDirect::failing(),
        inbox.clone(),
    );

    let outcome = orchestrator
        .submit(&identity(), files(1), BTreeMap::new())
        .await;

    assert!(!outcome.success);
    assert!(outcome.queued);
    match outcome.error {
        Some(SubmissionError::QueueExhaustion {
            attempts,
            ref last_error,
        }) => {
            assert_eq!(attempts, 5);
            assert!(last_error.contains("inbox unreachable"));
        }
        ref other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(recorder.errors(), 1);
    assert_eq!(recorder.statuses().last(), Some(&SubmissionStatus::Error));
    assert_eq!(inbox.notification_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn queue_recovers_through_real_channel() {
    let storage = MemoryStorage::new();
    let inbox = MemoryInbox::new();
    let channel = Arc::new(DirectChannel::new(
        Arc::new(storage.clone()),
        Arc::new(inbox.clone()),
        vec![NotificationChannelKind::InApp],
    ));
    let (orchestrator, recorder) = pipeline(ScriptedDirect::failing(), channel, inbox.clone());

    let outcome = orchestrator
        .submit(
            &identity(),
            files(3),
            BTreeMap::from([("order_id".to_string(), "A-17".to_string())]),
        )
        .await;

    assert!(outcome.success);
    assert!(outcome.queued);
    assert_eq!(recorder.successes(), 1);
    assert_eq!(storage.len(), 3);

    let id = outcome.submission_id.unwrap();
    let record = inbox.get_submission(id).await.unwrap().unwrap();
    assert_eq!(record.via, DeliveryVia::Queue);
    assert_eq!(record.files.len(), 3);
    assert_eq!(inbox.notification_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn non_ascii_owner_is_delivered_directly() {
    let storage = MemoryStorage::new();
    let inbox = MemoryInbox::new();
    let channel = Arc::new(DirectChannel::new(
        Arc::new(storage.clone()),
        Arc::new(inbox.clone()),
        vec![NotificationChannelKind::InApp],
    ));
    let (orchestrator, recorder) = pipeline(channel.clone(), channel, inbox.clone());

    let outcome = orchestrator
        .submit(&Identity::signed_in("張偉"), files(2), BTreeMap::new())
        .await;

    assert!(outcome.success);
    assert!(!outcome.queued);
    assert_eq!(recorder.successes(), 1);
    assert_eq!(storage.len(), 2);

    let record = inbox
        .get_submission(outcome.submission_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.owner_id, "張偉");
    assert_eq!(record.via, DeliveryVia::Direct);
}
