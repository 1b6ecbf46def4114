//! Submission delivery: the direct channel and the orchestrator driving the two-tier
//! (direct, then durable queue) strategy.

pub mod direct;
pub mod orchestrator;

pub use direct::DirectChannel;
pub use orchestrator::{
    OrchestratorConfig, QueueClient, SubmissionObserver, SubmissionOrchestrator,
};
