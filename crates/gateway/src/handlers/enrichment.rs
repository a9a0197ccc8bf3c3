//! Enrichment handlers
//!
//! Users send selected prospects to the enrichment service; the service
//! posts each result back by tracking id.

use axum::{extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::ApiJson;
use crate::AppState;
use prospectforge_common::{
    auth::{verify_webhook_secret, UserContext},
    db::EnrichmentUpdate,
    errors::{AppError, Result},
    metrics::record_callback,
    research::ProspectStatus,
};
use prospectforge_orchestrator::EnrichmentSummary;

#[derive(Debug, Deserialize, Validate)]
pub struct EnrichRequest {
    #[validate(length(min = 1, max = 500))]
    pub prospect_ids: Vec<Uuid>,
}

/// Result posted back by the enrichment service
#[derive(Debug, Deserialize, Validate)]
pub struct EnrichmentCallback {
    pub tracking_id: Uuid,

    #[validate(length(min = 1, max = 32))]
    pub status: String,

    #[serde(default)]
    #[validate(length(max = 320))]
    pub email: Option<String>,

    #[serde(default)]
    #[validate(length(max = 64))]
    pub phone: Option<String>,

    #[serde(default)]
    pub account_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnrichmentCallbackResponse {
    pub received: bool,
    pub id: Uuid,
    pub status: String,
}

/// Send the selected prospects to the enrichment service
pub async fn enrich(
    State(state): State<AppState>,
    user: UserContext,
    ApiJson(request): ApiJson<EnrichRequest>,
) -> Result<Json<EnrichmentSummary>> {
    let summary = state
        .enrichment
        .enrich(user.user_id, &request.prospect_ids)
        .await?;
    Ok(Json(summary))
}

/// Apply one enrichment result
pub async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<EnrichmentCallback>,
) -> Result<Json<EnrichmentCallbackResponse>> {
    verify_webhook_secret(&headers, state.config.webhooks.shared_secret.as_deref())?;

    let status = ProspectStatus::parse(&request.status)
        .filter(ProspectStatus::is_enrichment_outcome)
        .ok_or_else(|| AppError::Validation {
            message: "status must be one of inputted, duplicate, fail".to_string(),
            field: Some("status".to_string()),
        })?;

    let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    let update = EnrichmentUpdate {
        status,
        email: non_empty(request.email),
        phone: non_empty(request.phone),
        account_id: non_empty(request.account_id),
    };

    let prospect = state
        .enrichment
        .apply_callback(request.tracking_id, update)
        .await?
        .ok_or_else(|| AppError::ProspectNotFound {
            id: request.tracking_id.to_string(),
        })?;
    record_callback("enrichment", status.as_str());

    Ok(Json(EnrichmentCallbackResponse {
        received: true,
        id: prospect.id,
        status: prospect.status,
    }))
}
