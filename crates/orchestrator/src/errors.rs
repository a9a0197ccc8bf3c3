//! Orchestrator error types

use prospectforge_common::errors::AppError;
use prospectforge_common::research::ResearchStage;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("A research batch is already running")]
    BatchAlreadyRunning,

    #[error("{stage} research is already in flight for company {company_id}")]
    StageInFlight { company_id: Uuid, stage: ResearchStage },

    #[error("Company {company_id} has no company research record; run company research first")]
    MissingResearchId { company_id: Uuid },

    #[error("Company not found: {0}")]
    CompanyNotFound(Uuid),

    #[error("Campaign not found: {0}")]
    CampaignNotFound(Uuid),

    #[error("Enrichment is not configured")]
    EnrichmentDisabled,

    #[error("Store error: {0}")]
    Store(#[from] AppError),
}

impl From<OrchestratorError> for AppError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::BatchAlreadyRunning => AppError::BatchAlreadyRunning,
            OrchestratorError::StageInFlight { company_id, .. } => AppError::StageInFlight {
                company_id: company_id.to_string(),
            },
            OrchestratorError::MissingResearchId { .. } => AppError::Precondition {
                message: e.to_string(),
            },
            OrchestratorError::CompanyNotFound(id) => AppError::CompanyNotFound { id: id.to_string() },
            OrchestratorError::CampaignNotFound(id) => AppError::CampaignNotFound { id: id.to_string() },
            OrchestratorError::EnrichmentDisabled => AppError::ServiceUnavailable {
                message: e.to_string(),
            },
            OrchestratorError::Store(inner) => inner,
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
