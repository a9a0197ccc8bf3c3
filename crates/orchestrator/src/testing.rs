//! Shared fixtures for the orchestrator tests

use crate::orchestrator::{BatchItem, ResearchOrchestrator};
use chrono::Utc;
use prospectforge_common::config::OrchestratorConfig;
use prospectforge_common::db::models::{Campaign, Company};
use prospectforge_common::db::MemoryStore;
use prospectforge_common::events::EventBus;
use prospectforge_common::webhook::MockWebhook;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub fn campaign(user_id: Uuid) -> Campaign {
    let now = Utc::now().into();
    Campaign {
        id: Uuid::new_v4(),
        user_id,
        name: "Cloud migration Q3".to_string(),
        product: "Managed Kubernetes".to_string(),
        product_category: Some("Infrastructure".to_string()),
        primary_angle: Some("Cost".to_string()),
        secondary_angle: None,
        target_region: Some("EMEA".to_string()),
        pain_points: Some("Cloud spend\nOn-call load".to_string()),
        target_personas: Some("Platform lead".to_string()),
        target_titles: Some("CTO, VP Engineering".to_string()),
        target_verticals: Some("Fintech".to_string()),
        tech_focus: Some("Kubernetes".to_string()),
        created_at: now,
        updated_at: now,
    }
}

pub fn company(campaign: &Campaign, name: &str, website: &str) -> Company {
    Company {
        id: Uuid::new_v4(),
        user_id: campaign.user_id,
        campaign_id: campaign.id,
        name: name.to_string(),
        website: website.to_string(),
        linkedin_url: Some(format!("https://linkedin.com/company/{}", name.to_lowercase())),
        account_id: Some(format!("acct-{}", name.to_lowercase())),
        created_at: Utc::now().into(),
    }
}

/// One user with a campaign, a store wired to an event bus and a scripted webhook
pub struct Harness {
    pub user_id: Uuid,
    pub bus: EventBus,
    pub store: Arc<MemoryStore>,
    pub webhook: Arc<MockWebhook>,
    pub campaign: Campaign,
    pub orchestrator: Arc<ResearchOrchestrator>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(OrchestratorConfig::default()).await
    }

    pub async fn with_config(config: OrchestratorConfig) -> Self {
        Self::build(config, Arc::new(MockWebhook::new())).await
    }

    pub async fn build(config: OrchestratorConfig, webhook: Arc<MockWebhook>) -> Self {
        let bus = EventBus::new(256);
        let store = Arc::new(MemoryStore::with_events(bus.clone()));
        let user = store.insert_user("rep@example.com").await;
        let campaign = store.insert_campaign(campaign(user.id)).await;
        let orchestrator = Arc::new(ResearchOrchestrator::new(
            user.id,
            store.clone(),
            webhook.clone(),
            config,
        ));

        Self {
            user_id: user.id,
            bus,
            store,
            webhook,
            campaign,
            orchestrator,
        }
    }

    pub async fn add_company(&self, name: &str, website: &str) -> Company {
        self.store
            .insert_company(company(&self.campaign, name, website))
            .await
    }

    pub fn selected(companies: &[Company]) -> Vec<BatchItem> {
        companies
            .iter()
            .map(|c| BatchItem {
                company: c.clone(),
                selected: true,
            })
            .collect()
    }
}

/// Poll `check` until it holds or a second has passed
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
