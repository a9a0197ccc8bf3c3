//! Research webhook abstraction
//!
//! The two research stages run as opaque jobs behind HTTP webhooks. Replies
//! are returned as raw JSON and classified by the caller (see
//! [`crate::research::classify_company_reply`]), which also records the call
//! metrics.
//!
//! Provides:
//! - Request payload types for both stages and for enrichment
//! - [`ResearchWebhook`] / [`EnrichmentSink`] traits
//! - reqwest-backed clients and scripted mocks

use crate::config::{EnrichmentConfig, WebhookConfig};
use crate::errors::{AppError, Result};
use crate::research::ResearchStage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Campaign context sent to both stages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignPayload {
    pub campaign_name: String,
    pub product: String,
    pub product_category: String,
    pub primary_angle: String,
    pub secondary_angle: String,
    pub target_region: String,
    pub pain_points: Vec<String>,
    pub target_personas: Vec<String>,
    pub target_titles: Vec<String>,
    pub target_verticals: Vec<String>,
    pub tech_focus: String,
}

/// Company identity sent to both stages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyPayload {
    pub name: String,
    /// Normalized domain
    pub website: String,
    pub linkedin: String,
}

/// Stage-1 request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyResearchRequest {
    pub user_id: Uuid,
    pub company_domain: String,
    pub campaign: CampaignPayload,
    pub company: CompanyPayload,
}

/// Stage-2 request body: stage-1 shape plus the stage-1 outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProspectResearchRequest {
    #[serde(flatten)]
    pub base: CompanyResearchRequest,
    pub company_research_id: Uuid,
    #[serde(rename = "companyResearch")]
    pub company_research: Value,
    pub qualify: bool,
}

/// One prospect handed to the enrichment service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRequest {
    pub tracking_id: Uuid,
    pub prospect_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub job_title: Option<String>,
    pub linkedin_url: Option<String>,
    pub company_domain: String,
    pub account_id: Option<String>,
}

/// Client for the two research stage webhooks
#[async_trait]
pub trait ResearchWebhook: Send + Sync {
    /// Invoke stage 1; returns the raw reply body (`Null` when empty)
    async fn company_research(&self, request: &CompanyResearchRequest) -> Result<Value>;

    /// Invoke stage 2; returns the raw reply body (`Null` when empty)
    async fn prospect_research(&self, request: &ProspectResearchRequest) -> Result<Value>;
}

/// Destination for user-triggered prospect enrichment
#[async_trait]
pub trait EnrichmentSink: Send + Sync {
    async fn send_prospect(&self, request: &EnrichmentRequest) -> Result<()>;
}

/// Body as JSON; non-JSON text is kept as a string for the parser
fn decode_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Configuration {
            message: format!("Failed to create HTTP client: {}", e),
        })
}

/// reqwest client for the research stage webhooks
pub struct HttpWebhookClient {
    client: reqwest::Client,
    company_url: String,
    prospect_url: String,
    shared_secret: Option<String>,
    timeout: Duration,
}

impl HttpWebhookClient {
    pub fn new(config: &WebhookConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout())?,
            company_url: config.company_research_url.clone(),
            prospect_url: config.prospect_research_url.clone(),
            shared_secret: config.shared_secret.clone(),
            timeout: config.timeout(),
        })
    }

    async fn post<T: Serialize + Sync>(&self, stage: ResearchStage, url: &str, body: &T) -> Result<Value> {
        let start = Instant::now();
        let mut request = self.client.post(url).json(body);
        if let Some(ref secret) = self.shared_secret {
            request = request.header(crate::auth::WEBHOOK_SECRET_HEADER, secret);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                if e.is_timeout() {
                    return Err(AppError::WebhookTimeout {
                        stage: stage.to_string(),
                        timeout_secs: self.timeout.as_secs(),
                    });
                }
                return Err(AppError::Webhook {
                    stage: stage.to_string(),
                    message: e.to_string(),
                });
            }
        };

        let status = response.status();
        let text = response.text().await.map_err(|e| AppError::Webhook {
            stage: stage.to_string(),
            message: format!("Failed to read response body: {}", e),
        })?;
        let elapsed = start.elapsed().as_secs_f64();

        if !status.is_success() {
            warn!(%stage, status = status.as_u16(), "Research webhook returned an error status");
            let detail: String = text.chars().take(200).collect();
            return Err(AppError::Webhook {
                stage: stage.to_string(),
                message: format!("HTTP {}: {}", status.as_u16(), detail),
            });
        }

        debug!(%stage, status = status.as_u16(), bytes = text.len(), elapsed, "Research webhook replied");
        Ok(decode_body(&text))
    }
}

#[async_trait]
impl ResearchWebhook for HttpWebhookClient {
    #[instrument(skip(self, request), fields(domain = %request.company_domain))]
    async fn company_research(&self, request: &CompanyResearchRequest) -> Result<Value> {
        self.post(ResearchStage::Company, &self.company_url, request).await
    }

    #[instrument(skip(self, request), fields(domain = %request.base.company_domain, research_id = %request.company_research_id))]
    async fn prospect_research(&self, request: &ProspectResearchRequest) -> Result<Value> {
        self.post(ResearchStage::People, &self.prospect_url, request).await
    }
}

/// reqwest client for the enrichment (Clay) table webhook
pub struct ClayClient {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

impl ClayClient {
    /// `None` when no enrichment URL is configured
    pub fn from_config(config: &EnrichmentConfig) -> Result<Option<Self>> {
        let Some(ref url) = config.clay_webhook_url else {
            return Ok(None);
        };
        Ok(Some(Self {
            client: build_client(Duration::from_secs(30))?,
            url: url.clone(),
            api_key: config.api_key.clone(),
        }))
    }
}

#[async_trait]
impl EnrichmentSink for ClayClient {
    #[instrument(skip(self, request), fields(prospect_id = %request.prospect_id))]
    async fn send_prospect(&self, request: &EnrichmentRequest) -> Result<()> {
        let mut builder = self.client.post(&self.url).json(request);
        if let Some(ref key) = self.api_key {
            builder = builder.header("x-clay-webhook-auth", key);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            return Err(AppError::Webhook {
                stage: "enrichment".to_string(),
                message: format!("HTTP {}", response.status().as_u16()),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Mocks
// ============================================================================

/// Scripted reply for [`MockWebhook`]
#[derive(Debug, Clone)]
pub enum MockReply {
    Json(Value),
    /// Non-2xx or transport failure with this message
    Fail(String),
    Timeout,
}

/// A call seen by [`MockWebhook`]
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub stage: ResearchStage,
    pub body: Value,
}

#[derive(Default)]
struct MockState {
    company: VecDeque<MockReply>,
    people: VecDeque<MockReply>,
    calls: Vec<RecordedCall>,
}

/// Webhook mock with per-stage reply queues.
///
/// An exhausted queue answers with an empty body, which callers treat as an
/// asynchronous acceptance.
#[derive(Default)]
pub struct MockWebhook {
    state: Mutex<MockState>,
    delay: Option<Duration>,
}

impl MockWebhook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every reply, to exercise bounded waits
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            state: Mutex::default(),
            delay: Some(delay),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push_company(&self, reply: MockReply) -> &Self {
        self.lock().company.push_back(reply);
        self
    }

    pub fn push_people(&self, reply: MockReply) -> &Self {
        self.lock().people.push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn calls_for(&self, stage: ResearchStage) -> Vec<RecordedCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.stage == stage)
            .cloned()
            .collect()
    }

    async fn answer(&self, stage: ResearchStage, body: Value) -> Result<Value> {
        let reply = {
            let mut state = self.lock();
            state.calls.push(RecordedCall { stage, body });
            match stage {
                ResearchStage::Company => state.company.pop_front(),
                ResearchStage::People => state.people.pop_front(),
            }
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match reply {
            None => Ok(Value::Null),
            Some(MockReply::Json(value)) => Ok(value),
            Some(MockReply::Fail(message)) => Err(AppError::Webhook {
                stage: stage.to_string(),
                message,
            }),
            Some(MockReply::Timeout) => Err(AppError::WebhookTimeout {
                stage: stage.to_string(),
                timeout_secs: 0,
            }),
        }
    }
}

#[async_trait]
impl ResearchWebhook for MockWebhook {
    async fn company_research(&self, request: &CompanyResearchRequest) -> Result<Value> {
        let body = serde_json::to_value(request)?;
        self.answer(ResearchStage::Company, body).await
    }

    async fn prospect_research(&self, request: &ProspectResearchRequest) -> Result<Value> {
        let body = serde_json::to_value(request)?;
        self.answer(ResearchStage::People, body).await
    }
}

/// Enrichment sink that records what it was sent
#[derive(Default)]
pub struct MockEnrichmentSink {
    sent: Mutex<Vec<EnrichmentRequest>>,
    fail: bool,
}

impl MockEnrichmentSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Mutex::default(),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<EnrichmentRequest> {
        self.sent
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl EnrichmentSink for MockEnrichmentSink {
    async fn send_prospect(&self, request: &EnrichmentRequest) -> Result<()> {
        if self.fail {
            return Err(AppError::Webhook {
                stage: "enrichment".to_string(),
                message: "HTTP 500".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());
        Ok(())
    }
}
