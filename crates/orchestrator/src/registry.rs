//! One orchestrator per user

use crate::orchestrator::ResearchOrchestrator;
use prospectforge_common::config::OrchestratorConfig;
use prospectforge_common::db::ResearchStore;
use prospectforge_common::events::EventBus;
use prospectforge_common::webhook::ResearchWebhook;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;
use uuid::Uuid;

/// Lazily created per-user orchestrators sharing one store, webhook client
/// and event bus
pub struct OrchestratorRegistry {
    store: Arc<dyn ResearchStore>,
    webhook: Arc<dyn ResearchWebhook>,
    bus: EventBus,
    config: OrchestratorConfig,
    orchestrators: RwLock<HashMap<Uuid, Arc<ResearchOrchestrator>>>,
}

impl OrchestratorRegistry {
    pub fn new(
        store: Arc<dyn ResearchStore>,
        webhook: Arc<dyn ResearchWebhook>,
        bus: EventBus,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            webhook,
            bus,
            config,
            orchestrators: RwLock::new(HashMap::new()),
        }
    }

    /// Existing orchestrator for `user_id`, if any
    pub fn get(&self, user_id: Uuid) -> Option<Arc<ResearchOrchestrator>> {
        self.orchestrators
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&user_id)
            .cloned()
    }

    /// Orchestrator for `user_id`, created with its reconciler on first use.
    /// Must be called inside a tokio runtime.
    pub fn get_or_create(&self, user_id: Uuid) -> Arc<ResearchOrchestrator> {
        if let Some(existing) = self.get(user_id) {
            return existing;
        }

        let mut orchestrators = self.orchestrators.write().unwrap_or_else(|p| p.into_inner());
        orchestrators
            .entry(user_id)
            .or_insert_with(|| {
                let orchestrator = Arc::new(ResearchOrchestrator::new(
                    user_id,
                    self.store.clone(),
                    self.webhook.clone(),
                    self.config.clone(),
                ));
                orchestrator.spawn_reconciler(&self.bus);
                orchestrator.spawn_stale_sweeper();
                info!(user_id = %user_id, "Research orchestrator created");
                orchestrator
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.orchestrators.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
