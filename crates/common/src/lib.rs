//! ProspectForge Common Library
//!
//! Shared code for all ProspectForge services including:
//! - Database models, repository, and the store abstraction
//! - Research domain types and AI payload parsing
//! - Webhook client abstraction for the external research jobs
//! - Realtime event bus
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod research;
pub mod webhook;

// Re-export commonly used types
pub use errors::{AppError, Result};
pub use config::AppConfig;
pub use db::{MemoryStore, Repository, ResearchStore};
pub use events::{EventBus, ResearchEvent};
pub use webhook::{EnrichmentSink, ResearchWebhook};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Postgres NOTIFY channel carrying row change events
pub const RESEARCH_EVENTS_CHANNEL: &str = "research_events";
