//! ProspectForge research orchestrator
//!
//! Takes (campaign, company) pairs through the two external research jobs:
//! 1. Company research (operating status, cloud preference)
//! 2. Prospect research (decision makers), only for qualifying companies
//!
//! Either job may answer synchronously, acknowledge and deliver later
//! through the store, or fail. Direct replies and store notifications are
//! merged into one [`ProgressBoard`] per user.

pub mod enrichment;
pub mod errors;
pub mod orchestrator;
pub mod payload;
pub mod people;
pub mod progress;
mod reconcile;
pub mod registry;

#[cfg(test)]
mod testing;

pub use enrichment::{EnrichmentDispatcher, EnrichmentSummary};
pub use errors::{OrchestratorError, Result};
pub use orchestrator::{BatchItem, BatchSummary, ResearchOrchestrator, RetryPlan};
pub use people::{run_people_for_record, PeopleOutcome};
pub use progress::{CompanyProgress, ProgressBoard, ProgressEvent, ProgressState};
pub use registry::OrchestratorRegistry;
