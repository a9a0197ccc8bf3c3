//! Database layer for ProspectForge
//!
//! Provides:
//! - SeaORM entity models
//! - The `ResearchStore` abstraction used by the orchestrator and the
//!   callback receiver
//! - A Postgres-backed `Repository` and an in-process `MemoryStore`
//! - Connection pool management and embedded migrations

mod memory;
pub mod models;
mod repository;

pub use memory::MemoryStore;
pub use repository::Repository;

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use crate::research::{CompanyResearchResult, Contact, ProspectStatus, ResearchStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use models::{Campaign, Company, CompanyResearch, ProspectResearch};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Database connection pool wrapper
#[derive(Clone)]
pub struct DbPool {
    /// Primary connection (for writes)
    pub primary: DatabaseConnection,

    /// Read replica connection (optional)
    pub replica: Option<DatabaseConnection>,
}

fn connect_options(url: &str, config: &DatabaseConfig) -> ConnectOptions {
    let mut opts = ConnectOptions::new(url);
    opts.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .sqlx_logging(false);
    opts
}

impl DbPool {
    /// Create a new database pool from configuration
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!("Connecting to primary database...");

        let primary = Database::connect(connect_options(&config.url, config))
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Failed to connect to primary: {}", e),
            })?;

        let replica = match config.read_url {
            Some(ref read_url) => {
                info!("Connecting to read replica...");
                let conn = Database::connect(connect_options(read_url, config))
                    .await
                    .map_err(|e| AppError::DatabaseConnection {
                        message: format!("Failed to connect to replica: {}", e),
                    })?;
                Some(conn)
            }
            None => None,
        };

        info!("Database connections established");

        Ok(Self { primary, replica })
    }

    /// Apply the embedded migrations to the primary database
    pub async fn migrate(&self) -> Result<()> {
        let pool = self.primary.get_postgres_connection_pool();
        sqlx::migrate!("./migrations")
            .run(pool)
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Migration failed: {}", e),
            })?;
        info!("Database migrations applied");
        Ok(())
    }

    /// Get the connection for reads (replica if available, otherwise primary)
    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }

    /// Get the connection for writes (always primary)
    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.primary
            .ping()
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Primary ping failed: {}", e),
            })?;

        if let Some(ref replica) = self.replica {
            replica.ping().await.map_err(|e| AppError::DatabaseConnection {
                message: format!("Replica ping failed: {}", e),
            })?;
        }

        Ok(())
    }
}

// ============================================================================
// Store inputs
// ============================================================================

/// A company research outcome to record
#[derive(Debug, Clone)]
pub struct CompanyResearchInput {
    pub user_id: Uuid,
    pub campaign_id: Option<Uuid>,
    /// Normalized company domain
    pub company_domain: String,
    pub status: ResearchStatus,
    pub result: Option<CompanyResearchResult>,
    pub raw_result: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

impl CompanyResearchInput {
    /// A completed stage-1 result
    pub fn completed(
        user_id: Uuid,
        campaign_id: Option<Uuid>,
        company_domain: impl Into<String>,
        result: CompanyResearchResult,
        raw_result: serde_json::Value,
    ) -> Self {
        Self {
            user_id,
            campaign_id,
            company_domain: company_domain.into(),
            status: ResearchStatus::Completed,
            result: Some(result),
            raw_result: Some(raw_result),
            error_message: None,
        }
    }

    /// Operating status as stored, if any
    pub fn company_status(&self) -> Option<&'static str> {
        self.result
            .as_ref()
            .and_then(|r| r.company_status)
            .map(|s| s.as_str())
    }
}

/// One contact to insert as a prospect row
#[derive(Debug, Clone)]
pub struct ProspectInput {
    pub user_id: Uuid,
    pub company_research_id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub account_id: Option<String>,
    pub contact: Contact,
}

/// Result of an enrichment callback
#[derive(Debug, Clone)]
pub struct EnrichmentUpdate {
    pub status: ProspectStatus,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub account_id: Option<String>,
}

/// What `record_company_research` did
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Inserted(CompanyResearch),
    /// An in-progress row was completed in place
    Updated(CompanyResearch),
    /// A recent identical result already existed; nothing was written
    Reused(CompanyResearch),
}

impl RecordOutcome {
    pub fn record(&self) -> &CompanyResearch {
        match self {
            RecordOutcome::Inserted(r) | RecordOutcome::Updated(r) | RecordOutcome::Reused(r) => r,
        }
    }

    pub fn into_record(self) -> CompanyResearch {
        match self {
            RecordOutcome::Inserted(r) | RecordOutcome::Updated(r) | RecordOutcome::Reused(r) => r,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            RecordOutcome::Inserted(_) => "inserted",
            RecordOutcome::Updated(_) => "updated",
            RecordOutcome::Reused(_) => "reused",
        }
    }
}

/// How a new company research outcome relates to the latest stored row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDecision {
    Insert,
    UpdateInPlace(Uuid),
    Reuse(Uuid),
}

/// Dedup rule shared by every store.
///
/// A `processing` row is completed in place. A `completed` row with the same
/// operating status written within `window` is reused. Anything else gets a
/// new row.
pub fn decide_company_write(
    latest: Option<&CompanyResearch>,
    input: &CompanyResearchInput,
    now: DateTime<Utc>,
    window: Duration,
) -> WriteDecision {
    let Some(latest) = latest else {
        return WriteDecision::Insert;
    };

    match latest.research_status() {
        ResearchStatus::Processing => WriteDecision::UpdateInPlace(latest.id),
        ResearchStatus::Completed if input.status == ResearchStatus::Completed => {
            let same_status = latest.parsed_company_status().map(|s| s.as_str()) == input.company_status();
            let age = now.signed_duration_since(latest.updated_at.with_timezone(&Utc));
            let recent = age
                .to_std()
                .map(|age| age <= window)
                .unwrap_or(true);
            if same_status && recent {
                WriteDecision::Reuse(latest.id)
            } else {
                WriteDecision::Insert
            }
        }
        _ => WriteDecision::Insert,
    }
}

// ============================================================================
// Store seam
// ============================================================================

/// Persistence operations used by the research pipeline
#[async_trait]
pub trait ResearchStore: Send + Sync {
    /// Check connectivity
    async fn ping(&self) -> Result<()>;

    async fn user_exists(&self, user_id: Uuid) -> Result<bool>;

    async fn find_campaign(&self, user_id: Uuid, campaign_id: Uuid) -> Result<Option<Campaign>>;

    async fn list_companies(&self, user_id: Uuid, campaign_id: Uuid) -> Result<Vec<Company>>;

    async fn find_company(&self, user_id: Uuid, company_id: Uuid) -> Result<Option<Company>>;

    /// Company whose website normalizes to `domain`
    async fn find_company_by_domain(&self, user_id: Uuid, domain: &str) -> Result<Option<Company>>;

    /// Dedup-aware write of a company research outcome
    async fn record_company_research(
        &self,
        input: CompanyResearchInput,
        dedupe_window: Duration,
    ) -> Result<RecordOutcome>;

    async fn find_company_research(&self, id: Uuid) -> Result<Option<CompanyResearch>>;

    /// Most recent research row for a (user, domain) pair
    async fn latest_company_research(
        &self,
        user_id: Uuid,
        domain: &str,
    ) -> Result<Option<CompanyResearch>>;

    async fn insert_prospect(&self, input: ProspectInput) -> Result<ProspectResearch>;

    /// Prospect rows of one research record, oldest first
    async fn list_prospects(&self, company_research_id: Uuid) -> Result<Vec<ProspectResearch>>;

    /// Prospect rows owned by `user_id` among `ids`
    async fn find_prospects(&self, user_id: Uuid, ids: &[Uuid]) -> Result<Vec<ProspectResearch>>;

    /// Flag a prospect as handed to the enrichment service
    async fn mark_prospect_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<ProspectResearch>;

    /// Apply an enrichment callback; `None` when the tracking id is unknown
    async fn apply_enrichment(
        &self,
        tracking_id: Uuid,
        update: EnrichmentUpdate,
    ) -> Result<Option<ProspectResearch>>;
}
