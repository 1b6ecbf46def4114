//! Application state shared by all handlers.

use scribo_core::models::Identity;
use scribo_core::Config;
use scribo_db::AdminInbox;
use scribo_services::{
    DirectChannel, NotificationService, OrchestratorConfig, QueueClient, SubmissionOrchestrator,
    SubmissionQueue,
};
use scribo_storage::ObjectStorage;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Absent when the service runs on in-memory stores.
    pub db_pool: Option<PgPool>,
    pub storage: Arc<dyn ObjectStorage>,
    pub inbox: Arc<dyn AdminInbox>,
    pub direct: Arc<DirectChannel>,
    pub notifier: Arc<NotificationService>,
    pub queue: SubmissionQueue,
    pub orchestrator: OrchestratorConfig,
    /// Orchestrators with a flow in progress, keyed by owner id.
    pub flows: Arc<Mutex<HashMap<String, Arc<SubmissionOrchestrator>>>>,
}

impl AppState {
    fn flows(&self) -> MutexGuard<'_, HashMap<String, Arc<SubmissionOrchestrator>>> {
        self.flows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn build_orchestrator(&self) -> SubmissionOrchestrator {
        let queue: Arc<dyn QueueClient> = Arc::new(self.queue.clone());
        SubmissionOrchestrator::new(
            self.direct.clone(),
            queue,
            self.notifier.clone(),
            self.orchestrator.clone(),
        )
    }

    /// The orchestrator owning `identity`'s flows.
    ///
    /// Signed-in owners share one orchestrator while a flow is registered, so a
    /// concurrent submit is rejected and cancel/reset reach the running flow.
    /// Anonymous callers get an unregistered one that only rejects them.
    pub fn orchestrator_for(&self, identity: &Identity) -> Arc<SubmissionOrchestrator> {
        if !identity.is_authenticated() {
            return Arc::new(self.build_orchestrator());
        }
        self.flows()
            .entry(identity.owner_id.clone())
            .or_insert_with(|| Arc::new(self.build_orchestrator()))
            .clone()
    }

    /// Registered orchestrator for `owner_id`, if a flow is in progress.
    pub fn active_orchestrator(&self, owner_id: &str) -> Option<Arc<SubmissionOrchestrator>> {
        self.flows().get(owner_id).cloned()
    }

    /// Drop `orchestrator` from the registry once it has nothing in flight.
    pub fn release_orchestrator(&self, owner_id: &str, orchestrator: &Arc<SubmissionOrchestrator>) {
        let mut flows = self.flows();
        let idle = flows
            .get(owner_id)
            .is_some_and(|current| Arc::ptr_eq(current, orchestrator) && !current.status().is_active());
        if idle {
            flows.remove(owner_id);
        }
    }
}
