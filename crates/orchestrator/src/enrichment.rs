//! User-triggered enrichment
//!
//! Sends stored prospects to the enrichment service and applies the
//! results it posts back.

use crate::errors::{OrchestratorError, Result};
use chrono::Utc;
use prospectforge_common::db::models::ProspectResearch;
use prospectforge_common::db::{EnrichmentUpdate, ResearchStore};
use prospectforge_common::metrics::record_enrichment;
use prospectforge_common::webhook::{EnrichmentRequest, EnrichmentSink};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// A prospect that was not sent, and why
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedProspect {
    pub prospect_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentSummary {
    pub sent: Vec<Uuid>,
    pub skipped: Vec<SkippedProspect>,
    pub failed: Vec<SkippedProspect>,
}

pub struct EnrichmentDispatcher {
    store: Arc<dyn ResearchStore>,
    sink: Option<Arc<dyn EnrichmentSink>>,
}

impl EnrichmentDispatcher {
    pub fn new(store: Arc<dyn ResearchStore>, sink: Option<Arc<dyn EnrichmentSink>>) -> Self {
        Self { store, sink }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Send the requested prospects owned by `user_id`
    #[instrument(skip(self, prospect_ids), fields(requested = prospect_ids.len()))]
    pub async fn enrich(&self, user_id: Uuid, prospect_ids: &[Uuid]) -> Result<EnrichmentSummary> {
        let sink = self.sink.as_ref().ok_or(OrchestratorError::EnrichmentDisabled)?;
        let prospects = self.store.find_prospects(user_id, prospect_ids).await?;
        let mut summary = EnrichmentSummary::default();

        for id in prospect_ids {
            if !prospects.iter().any(|p| p.id == *id) {
                summary.skipped.push(SkippedProspect {
                    prospect_id: *id,
                    reason: "prospect not found".to_string(),
                });
            }
        }

        for prospect in prospects {
            match self.send_one(sink.as_ref(), &prospect).await {
                Ok(None) => summary.sent.push(prospect.id),
                Ok(Some(reason)) => summary.skipped.push(SkippedProspect {
                    prospect_id: prospect.id,
                    reason,
                }),
                Err(e) => {
                    warn!(prospect_id = %prospect.id, error = %e, "Enrichment send failed");
                    summary.failed.push(SkippedProspect {
                        prospect_id: prospect.id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        record_enrichment(summary.sent.len());
        info!(
            sent = summary.sent.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            "Enrichment dispatched"
        );
        Ok(summary)
    }

    /// Send one prospect; `Ok(Some(reason))` when it was skipped
    async fn send_one(&self, sink: &dyn EnrichmentSink, prospect: &ProspectResearch) -> Result<Option<String>> {
        if prospect.sent_to_clay {
            return Ok(Some("already sent".to_string()));
        }

        let research = self
            .store
            .find_company_research(prospect.company_research_id)
            .await?;
        let Some(research) = research.filter(|r| r.is_completed()) else {
            return Ok(Some("company research is not completed".to_string()));
        };

        let request = EnrichmentRequest {
            tracking_id: prospect.tracking_id,
            prospect_id: prospect.id,
            first_name: prospect.first_name.clone(),
            last_name: prospect.last_name.clone(),
            job_title: prospect.job_title.clone(),
            linkedin_url: prospect.linkedin_url.clone(),
            company_domain: research.company_domain,
            account_id: prospect.account_id.clone(),
        };
        sink.send_prospect(&request).await?;
        self.store.mark_prospect_sent(prospect.id, Utc::now()).await?;
        Ok(None)
    }

    /// Apply an enrichment result posted back by the service
    pub async fn apply_callback(
        &self,
        tracking_id: Uuid,
        update: EnrichmentUpdate,
    ) -> Result<Option<ProspectResearch>> {
        let status = update.status;
        let updated = self.store.apply_enrichment(tracking_id, update).await?;
        match updated {
            Some(ref prospect) => info!(prospect_id = %prospect.id, status = status.as_str(), "Enrichment result applied"),
            None => warn!(tracking_id = %tracking_id, "Enrichment result for unknown tracking id"),
        }
        Ok(updated)
    }
}
