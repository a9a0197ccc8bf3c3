//! Research control handlers
//!
//! Start, retry and stop research for the acting user, and read the
//! progress board.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;
use validator::Validate;

use super::ApiJson;
use crate::AppState;
use prospectforge_common::{
    auth::UserContext,
    errors::{AppError, Result},
    research::ResearchStage,
};
use prospectforge_orchestrator::{BatchItem, CompanyProgress};

/// Request to research companies of a campaign
#[derive(Debug, Deserialize, Validate)]
pub struct StartResearchRequest {
    /// Companies to research, in order
    #[validate(length(min = 1, max = 1000))]
    pub company_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct StartResearchResponse {
    pub accepted: bool,
    pub campaign_id: Uuid,
    pub queued: usize,
    pub progress_url: &'static str,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RetryRequest {
    pub stage: ResearchStage,
}

#[derive(Debug, Serialize)]
pub struct RetryResponse {
    pub accepted: bool,
    pub company_id: Uuid,
    pub stage: ResearchStage,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub accepted: bool,
    /// Whether a batch was running when the stop arrived
    pub was_running: bool,
}

/// One progress entry with its display line
#[derive(Debug, Serialize)]
pub struct ProgressView {
    #[serde(flatten)]
    pub entry: CompanyProgress,
    pub status_line: String,
}

#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    pub running: bool,
    pub companies: Vec<ProgressView>,
}

/// Start a research batch over the selected companies of a campaign
pub async fn start_research(
    State(state): State<AppState>,
    user: UserContext,
    Path(campaign_id): Path<Uuid>,
    ApiJson(request): ApiJson<StartResearchRequest>,
) -> Result<(StatusCode, Json<StartResearchResponse>)> {
    let campaign = state
        .store
        .find_campaign(user.user_id, campaign_id)
        .await?
        .ok_or_else(|| AppError::CampaignNotFound {
            id: campaign_id.to_string(),
        })?;

    let mut companies: HashMap<Uuid, _> = state
        .store
        .list_companies(user.user_id, campaign_id)
        .await?
        .into_iter()
        .map(|c| (c.id, c))
        .collect();

    // Batch order follows the request; repeated ids are researched once
    let mut items = Vec::with_capacity(request.company_ids.len());
    for id in &request.company_ids {
        match companies.remove(id) {
            Some(company) => items.push(BatchItem {
                company,
                selected: true,
            }),
            None if items.iter().any(|i: &BatchItem| i.company.id == *id) => {}
            None => return Err(AppError::CompanyNotFound { id: id.to_string() }),
        }
    }

    let orchestrator = state.registry.get_or_create(user.user_id);
    let queued = orchestrator.begin_batch(campaign, items)?;

    tracing::info!(
        user_id = %user.user_id,
        campaign_id = %campaign_id,
        queued,
        request_id = %user.request_id,
        "Research batch accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(StartResearchResponse {
            accepted: true,
            campaign_id,
            queued,
            progress_url: "/v1/research/progress",
        }),
    ))
}

/// Re-run one stage for a company in the background
pub async fn retry(
    State(state): State<AppState>,
    user: UserContext,
    Path(company_id): Path<Uuid>,
    ApiJson(request): ApiJson<RetryRequest>,
) -> Result<(StatusCode, Json<RetryResponse>)> {
    let orchestrator = state.registry.get_or_create(user.user_id);
    let plan = orchestrator.prepare_retry(company_id, request.stage).await?;

    tokio::spawn(async move {
        orchestrator.execute_retry(plan).await;
    });

    tracing::info!(
        user_id = %user.user_id,
        company_id = %company_id,
        stage = %request.stage,
        "Retry accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(RetryResponse {
            accepted: true,
            company_id,
            stage: request.stage,
        }),
    ))
}

/// Stop the running batch after the companies already started
pub async fn stop(
    State(state): State<AppState>,
    user: UserContext,
) -> (StatusCode, Json<StopResponse>) {
    let was_running = state
        .registry
        .get(user.user_id)
        .map(|orchestrator| orchestrator.stop_batch())
        .unwrap_or(false);

    (
        StatusCode::ACCEPTED,
        Json(StopResponse {
            accepted: true,
            was_running,
        }),
    )
}

/// Progress of the acting user's companies, in batch order
pub async fn progress(State(state): State<AppState>, user: UserContext) -> Json<ProgressResponse> {
    let (running, entries) = match state.registry.get(user.user_id) {
        Some(orchestrator) => (orchestrator.is_running(), orchestrator.progress()),
        None => (false, Vec::new()),
    };

    Json(ProgressResponse {
        running,
        companies: entries
            .into_iter()
            .map(|entry| ProgressView {
                status_line: entry.status_line(),
                entry,
            })
            .collect(),
    })
}
