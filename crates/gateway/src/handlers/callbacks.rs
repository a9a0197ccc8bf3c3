//! Result callbacks from the research job runner
//!
//! Stage 1 posts one company research result per call; stage 2 posts one
//! prospect per call. Both write to the store, whose row events then reach
//! any orchestrator tracking the company.

use axum::{extract::State, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use super::ApiJson;
use crate::autotrigger::{auto_trigger_people_stage, AutoTriggerStatus};
use crate::AppState;
use prospectforge_common::{
    auth::verify_webhook_secret,
    db::{models::CompanyResearch, CompanyResearchInput, ProspectInput, RecordOutcome},
    errors::{AppError, Result},
    metrics::record_callback,
    research::{
        classify_company_reply, normalize_domain, validate_company_domain, CompanyReply, Contact,
        Priority, ResearchStatus,
    },
};

/// Stage-1 result posted by the job runner
#[derive(Debug, Deserialize, Validate)]
pub struct CompanyResearchCallback {
    #[validate(length(min = 1, max = 64))]
    pub user_id: String,

    #[validate(length(min = 1, max = 2048))]
    pub company_domain: String,

    #[serde(default)]
    pub campaign_id: Option<Uuid>,

    /// Job output: an object, or text that may wrap fenced JSON
    #[serde(default)]
    pub company: Option<Value>,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CompanyCallbackResponse {
    pub received: bool,
    pub id: Uuid,
    pub status: String,
    /// inserted | updated | reused
    pub action: &'static str,
    pub auto_trigger: AutoTriggerStatus,
}

/// One stage-2 contact posted by the job runner
#[derive(Debug, Deserialize, Validate)]
pub struct ProspectResearchCallback {
    #[validate(length(min = 1, max = 64))]
    pub user_id: String,

    #[serde(default)]
    pub company_domain: Option<String>,

    #[serde(default)]
    pub company_research_id: Option<Uuid>,

    #[serde(default)]
    pub campaign_id: Option<Uuid>,

    #[serde(default)]
    pub account_id: Option<String>,

    #[validate(length(min = 1, max = 200))]
    pub first_name: String,

    #[serde(default)]
    #[validate(length(max = 200))]
    pub last_name: String,

    #[serde(default)]
    pub job_title: Option<String>,

    #[serde(default, alias = "linkedin")]
    #[validate(length(max = 2048))]
    pub linkedin_url: Option<String>,

    #[serde(default)]
    pub priority: Option<String>,

    #[serde(default)]
    pub priority_reason: Option<String>,

    #[serde(default)]
    pub pitch_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ProspectCallbackResponse {
    pub received: bool,
    pub id: Uuid,
    pub status: String,
    pub tracking_id: Uuid,
}

/// Parse and check the acting user named in a callback body
async fn known_user(state: &AppState, raw: &str) -> Result<Uuid> {
    let user_id = Uuid::parse_str(raw.trim()).map_err(|_| AppError::Validation {
        message: "user_id must be a UUID".to_string(),
        field: Some("user_id".to_string()),
    })?;

    if !state.store.user_exists(user_id).await? {
        return Err(AppError::UnknownUser {
            id: user_id.to_string(),
        });
    }
    Ok(user_id)
}

fn checked_domain(raw: &str) -> Result<String> {
    let domain = normalize_domain(raw);
    validate_company_domain(&domain)?;
    Ok(domain)
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn failed_input(
    user_id: Uuid,
    campaign_id: Option<Uuid>,
    company_domain: String,
    message: String,
    raw_result: Option<Value>,
) -> CompanyResearchInput {
    CompanyResearchInput {
        user_id,
        campaign_id,
        company_domain,
        status: ResearchStatus::Failed,
        result: None,
        raw_result,
        error_message: Some(message),
    }
}

/// Turn a stage-1 callback body into a store write
fn company_input(
    user_id: Uuid,
    domain: String,
    request: CompanyResearchCallback,
) -> Result<CompanyResearchInput> {
    let CompanyResearchCallback {
        campaign_id,
        company,
        status,
        error_message,
        ..
    } = request;
    let company = company.filter(|v| !is_blank(v));

    if status.as_deref().map(ResearchStatus::from) == Some(ResearchStatus::Failed) {
        let message = error_message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| "Company research failed".to_string());
        return Ok(failed_input(user_id, campaign_id, domain, message, company));
    }

    let company = company.ok_or_else(|| AppError::MissingField {
        field: "company".to_string(),
    })?;

    Ok(match classify_company_reply(&company) {
        CompanyReply::Completed { result, raw } => {
            CompanyResearchInput::completed(user_id, campaign_id, domain, result, raw)
        }
        CompanyReply::Accepted { .. } => CompanyResearchInput {
            user_id,
            campaign_id,
            company_domain: domain,
            status: ResearchStatus::Processing,
            result: None,
            raw_result: None,
            error_message: None,
        },
        CompanyReply::Failed { message, raw } => {
            failed_input(user_id, campaign_id, domain, message, raw.map(Value::String))
        }
    })
}

/// Receive a stage-1 (company research) result
pub async fn company_research(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<CompanyResearchCallback>,
) -> Result<Json<CompanyCallbackResponse>> {
    verify_webhook_secret(&headers, state.config.webhooks.shared_secret.as_deref())?;

    let user_id = known_user(&state, &request.user_id).await?;
    let domain = checked_domain(&request.company_domain)?;
    let input = company_input(user_id, domain, request)?;

    let outcome = state
        .store
        .record_company_research(input, state.config.orchestrator.dedupe_window())
        .await?;
    let action = outcome.action();
    let reused = matches!(outcome, RecordOutcome::Reused(_));
    let record: CompanyResearch = outcome.into_record();
    record_callback("company", &record.status);

    tracing::info!(
        user_id = %user_id,
        research_id = %record.id,
        domain = %record.company_domain,
        status = %record.status,
        action,
        "Company research callback recorded"
    );

    // A reused row already went through stage two when it was first written
    let auto_trigger = if reused {
        AutoTriggerStatus::AlreadyTriggered
    } else {
        auto_trigger_people_stage(&state, user_id, record.clone()).await
    };

    Ok(Json(CompanyCallbackResponse {
        received: true,
        id: record.id,
        status: record.status,
        action,
        auto_trigger,
    }))
}

/// Receive one stage-2 (prospect research) contact
pub async fn prospect_research(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(request): ApiJson<ProspectResearchCallback>,
) -> Result<Json<ProspectCallbackResponse>> {
    verify_webhook_secret(&headers, state.config.webhooks.shared_secret.as_deref())?;

    let user_id = known_user(&state, &request.user_id).await?;

    let research = match (request.company_research_id, request.company_domain.as_deref()) {
        (Some(id), _) => state
            .store
            .find_company_research(id)
            .await?
            .filter(|r| r.user_id == user_id)
            .ok_or_else(|| AppError::ResearchNotFound { id: id.to_string() })?,
        (None, Some(raw_domain)) => {
            let domain = checked_domain(raw_domain)?;
            state
                .store
                .latest_company_research(user_id, &domain)
                .await?
                .ok_or(AppError::ResearchNotFound { id: domain })?
        }
        (None, None) => {
            return Err(AppError::MissingField {
                field: "company_research_id".to_string(),
            })
        }
    };

    let contact = Contact {
        first_name: request.first_name.trim().to_string(),
        last_name: request.last_name.trim().to_string(),
        job_title: request.job_title,
        pitch_type: request.pitch_type,
        linkedin: request.linkedin_url.filter(|u| !u.trim().is_empty()),
        priority: request.priority.as_deref().and_then(Priority::parse),
        priority_reason: request.priority_reason,
    };

    let prospect = state
        .store
        .insert_prospect(ProspectInput {
            user_id,
            company_research_id: research.id,
            campaign_id: request.campaign_id.or(research.campaign_id),
            account_id: request.account_id,
            contact,
        })
        .await?;
    record_callback("people", "received");

    tracing::info!(
        user_id = %user_id,
        research_id = %research.id,
        prospect_id = %prospect.id,
        "Prospect callback recorded"
    );

    Ok(Json(ProspectCallbackResponse {
        received: true,
        id: prospect.id,
        status: prospect.status,
        tracking_id: prospect.tracking_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{body_json, post_json, TestApp};
    use axum::http::StatusCode;
    use prospectforge_common::ResearchStore;
    use prospectforge_common::research::ResearchStage;
    use prospectforge_common::webhook::MockReply;
    use serde_json::json;

    fn operating_text() -> String {
        "Here is the research:\n```json\n{\"status\":\"completed\",\"company_status\":\"Operating\",\"cloud_preference\":{\"provider\":\"AWS\",\"confidence\":\"high\",\"evidence_urls\":[]}}\n```".to_string()
    }

    #[tokio::test]
    async fn test_company_callback_records_and_triggers_people() {
        let app = TestApp::new().await;
        app.webhook.push_people(MockReply::Json(json!({
            "status": "completed",
            "contacts": [{"first_name": "Ada", "last_name": "Lovelace", "linkedin": "https://linkedin.com/in/ada"}]
        })));
        app.add_company("Acme", "https://www.acme.com").await;

        let response = post_json(
            &app,
            "/v1/callbacks/company-research",
            json!({
                "user_id": app.user_id.to_string(),
                "company_domain": "https://www.Acme.com/",
                "campaign_id": app.campaign.id,
                "company": operating_text(),
                "status": "completed"
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["received"], true);
        assert_eq!(body["status"], "completed");
        assert_eq!(body["action"], "inserted");
        assert_eq!(body["auto_trigger"], "triggered");

        let people = app.webhook.calls_for(ResearchStage::People);
        assert_eq!(people.len(), 1);
        assert_eq!(people[0].body["company_research_id"], body["id"]);
        assert_eq!(app.store.prospect_count().await, 1);
    }

    #[tokio::test]
    async fn test_not_qualified_result_does_not_trigger() {
        let app = TestApp::new().await;
        app.add_company("Zenith", "zenith.io").await;

        let response = post_json(
            &app,
            "/v1/callbacks/company-research",
            json!({
                "user_id": app.user_id.to_string(),
                "company_domain": "zenith.io",
                "company": {"status": "completed", "company_status": "Bankrupt"},
            }),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["auto_trigger"], "not_qualified");
        assert!(app.webhook.calls_for(ResearchStage::People).is_empty());
    }

    #[tokio::test]
    async fn test_failed_and_unparseable_callbacks_are_recorded() {
        let app = TestApp::new().await;

        let failed = post_json(
            &app,
            "/v1/callbacks/company-research",
            json!({
                "user_id": app.user_id.to_string(),
                "company_domain": "acme.com",
                "status": "failed",
                "error_message": "model overloaded"
            }),
        )
        .await;
        assert_eq!(failed.status(), StatusCode::OK);
        assert_eq!(body_json(failed).await["status"], "failed");

        let garbled = post_json(
            &app,
            "/v1/callbacks/company-research",
            json!({
                "user_id": app.user_id.to_string(),
                "company_domain": "acme.com",
                "company": "I could not find anything useful {"
            }),
        )
        .await;
        assert_eq!(garbled.status(), StatusCode::OK);
        let body = body_json(garbled).await;
        assert_eq!(body["status"], "failed");

        let id = Uuid::parse_str(body["id"].as_str().unwrap()).unwrap();
        let record = app.store.find_company_research(id).await.unwrap().unwrap();
        assert!(record.raw_result.is_some());
    }

    #[tokio::test]
    async fn test_company_callback_validation() {
        let app = TestApp::new().await;
        let cases = [
            (json!({"user_id": "nope", "company_domain": "acme.com", "company": "{}"}), "VALIDATION_ERROR"),
            (json!({"user_id": Uuid::new_v4().to_string(), "company_domain": "acme.com", "company": "{}"}), "UNKNOWN_USER"),
            (json!({"user_id": app.user_id.to_string(), "company_domain": "-bad-", "company": "{}"}), "INVALID_DOMAIN"),
            (json!({"user_id": app.user_id.to_string(), "company_domain": "acme.com"}), "MISSING_FIELD"),
            (json!({"company_domain": "acme.com"}), "INVALID_FORMAT"),
        ];

        for (payload, code) in cases {
            let response = post_json(&app, "/v1/callbacks/company-research", payload).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{code}");
            assert_eq!(body_json(response).await["error"]["code"], code);
        }
    }

    #[tokio::test]
    async fn test_shared_secret_is_enforced_when_configured() {
        let app = TestApp::with_config(|config| {
            config.webhooks.shared_secret = Some("s3cret".to_string());
        })
        .await;

        let response = post_json(
            &app,
            "/v1/callbacks/company-research",
            json!({"user_id": app.user_id.to_string(), "company_domain": "acme.com", "status": "failed"}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_prospect_callback_by_domain_and_id() {
        let app = TestApp::new().await;
        let research = app.completed_research("acme.com").await;

        let by_domain = post_json(
            &app,
            "/v1/callbacks/prospect-research",
            json!({
                "user_id": app.user_id.to_string(),
                "company_domain": "www.acme.com",
                "first_name": "Ada",
                "last_name": "Lovelace",
                "job_title": "CTO",
                "linkedin_url": "https://linkedin.com/in/ada",
                "priority": "High"
            }),
        )
        .await;
        assert_eq!(by_domain.status(), StatusCode::OK);
        let body = body_json(by_domain).await;
        assert_eq!(body["received"], true);
        assert_eq!(body["status"], "pending");
        assert!(Uuid::parse_str(body["tracking_id"].as_str().unwrap()).is_ok());

        let by_id = post_json(
            &app,
            "/v1/callbacks/prospect-research",
            json!({
                "user_id": app.user_id.to_string(),
                "company_research_id": research.id,
                "first_name": "Grace",
                "last_name": "Hopper"
            }),
        )
        .await;
        assert_eq!(by_id.status(), StatusCode::OK);

        let rows = app.store.list_prospects(research.id).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].priority.as_deref(), Some("High"));
    }

    #[tokio::test]
    async fn test_prospect_callback_unknown_research() {
        let app = TestApp::new().await;

        let response = post_json(
            &app,
            "/v1/callbacks/prospect-research",
            json!({
                "user_id": app.user_id.to_string(),
                "company_research_id": Uuid::new_v4(),
                "first_name": "Ada"
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["code"], "RESEARCH_NOT_FOUND");

        let missing = post_json(
            &app,
            "/v1/callbacks/prospect-research",
            json!({"user_id": app.user_id.to_string(), "first_name": "Ada"}),
        )
        .await;
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    }
}
