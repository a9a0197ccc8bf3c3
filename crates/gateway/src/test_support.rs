//! Router fixtures: an in-memory store, scripted webhooks and oneshot requests

use crate::{create_router, AppState};
use axum::{
    body::Body,
    http::{header, Method, Request},
    response::Response,
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use prospectforge_common::{
    config::AppConfig,
    db::{
        models::{Campaign, Company, CompanyResearch},
        CompanyResearchInput, MemoryStore, ResearchStore,
    },
    events::EventBus,
    research::{CompanyResearchResult, CompanyStatus},
    webhook::{EnrichmentSink, MockEnrichmentSink, MockWebhook},
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

pub struct TestApp {
    pub user_id: Uuid,
    pub campaign: Campaign,
    pub store: Arc<MemoryStore>,
    pub webhook: Arc<MockWebhook>,
    pub sink: Arc<MockEnrichmentSink>,
    pub state: AppState,
    router: Router,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(AppConfig::default(), MockWebhook::new(), true).await
    }

    pub async fn with_config(configure: impl FnOnce(&mut AppConfig)) -> Self {
        let mut config = AppConfig::default();
        configure(&mut config);
        Self::build(config, MockWebhook::new(), true).await
    }

    pub async fn with_webhook_delay(delay: Duration) -> Self {
        Self::build(AppConfig::default(), MockWebhook::with_delay(delay), true).await
    }

    pub async fn without_enrichment() -> Self {
        Self::build(AppConfig::default(), MockWebhook::new(), false).await
    }

    async fn build(config: AppConfig, webhook: MockWebhook, enrichment: bool) -> Self {
        let bus = EventBus::new(256);
        let store = Arc::new(MemoryStore::with_events(bus.clone()));
        let webhook = Arc::new(webhook);
        let sink = Arc::new(MockEnrichmentSink::new());

        let user = store.insert_user("rep@example.com").await;
        let campaign = store.insert_campaign(campaign(user.id)).await;

        let state = AppState::new(
            Arc::new(config),
            store.clone(),
            webhook.clone(),
            enrichment.then(|| sink.clone() as Arc<dyn EnrichmentSink>),
            bus,
        );
        let router = create_router(state.clone());

        Self {
            user_id: user.id,
            campaign,
            store,
            webhook,
            sink,
            state,
            router,
        }
    }

    pub async fn add_company(&self, name: &str, website: &str) -> Company {
        self.store
            .insert_company(Company {
                id: Uuid::new_v4(),
                user_id: self.user_id,
                campaign_id: self.campaign.id,
                name: name.to_string(),
                website: website.to_string(),
                linkedin_url: None,
                account_id: Some(format!("acct-{}", name.to_lowercase())),
                created_at: Utc::now().into(),
            })
            .await
    }

    /// A completed, qualifying stage-1 record for `domain`
    pub async fn completed_research(&self, domain: &str) -> CompanyResearch {
        self.store
            .record_company_research(
                CompanyResearchInput::completed(
                    self.user_id,
                    Some(self.campaign.id),
                    domain,
                    CompanyResearchResult {
                        company_status: Some(CompanyStatus::Operating),
                        ..Default::default()
                    },
                    serde_json::json!({"company_status": "Operating"}),
                ),
                Duration::from_secs(900),
            )
            .await
            .unwrap()
            .into_record()
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn request_without_user(&self, path: &str) -> Response {
        self.send(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
    }
}

fn campaign(user_id: Uuid) -> Campaign {
    let now = Utc::now().into();
    Campaign {
        id: Uuid::new_v4(),
        user_id,
        name: "Cloud migration Q3".to_string(),
        product: "Managed Kubernetes".to_string(),
        product_category: None,
        primary_angle: Some("Cost".to_string()),
        secondary_angle: None,
        target_region: None,
        pain_points: Some("Cloud spend".to_string()),
        target_personas: None,
        target_titles: Some("CTO".to_string()),
        target_verticals: None,
        tech_focus: None,
        created_at: now,
        updated_at: now,
    }
}

pub async fn post_json(app: &TestApp, path: &str, body: Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-user-id", app.user_id.to_string())
        .body(Body::from(body.to_string()))
        .unwrap();
    app.send(request).await
}

pub async fn get(app: &TestApp, path: &str) -> Response {
    let request = Request::builder()
        .uri(path)
        .header("x-user-id", app.user_id.to_string())
        .body(Body::empty())
        .unwrap();
    app.send(request).await
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
