//! Prospect research outside a tracked batch
//!
//! When a company research result arrives by callback for a company no
//! orchestrator is tracking, stage 2 still runs: the campaign and company
//! are looked up from the stored record.

use crate::errors::{OrchestratorError, Result};
use crate::payload;
use prospectforge_common::db::models::CompanyResearch;
use prospectforge_common::db::{ProspectInput, ResearchStore};
use prospectforge_common::metrics::record_webhook_call;
use prospectforge_common::research::{classify_prospect_reply, Contact, ProspectReply};
use prospectforge_common::webhook::ResearchWebhook;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Outcome of one stage-2 run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeopleOutcome {
    /// Contacts returned and stored
    Contacts(usize),
    /// The job will deliver contacts by callback
    Accepted,
    Skipped(String),
    Failed(String),
}

/// Store contacts as prospect rows. Returns how many were written.
pub async fn persist_contacts(
    store: &dyn ResearchStore,
    user_id: Uuid,
    company_research_id: Uuid,
    campaign_id: Option<Uuid>,
    account_id: Option<String>,
    contacts: &[Contact],
) -> usize {
    let mut stored = 0;
    for contact in contacts {
        let input = ProspectInput {
            user_id,
            company_research_id,
            campaign_id,
            account_id: account_id.clone(),
            contact: contact.clone(),
        };
        match store.insert_prospect(input).await {
            Ok(_) => stored += 1,
            Err(e) => warn!(
                error = %e,
                contact = %contact.full_name(),
                "Could not store prospect"
            ),
        }
    }
    stored
}

/// Run stage 2 for a completed research record by looking up its company
#[instrument(skip_all, fields(user_id = %user_id, research_id = %record.id, domain = %record.company_domain))]
pub async fn run_people_for_record(
    store: &dyn ResearchStore,
    webhook: &dyn ResearchWebhook,
    user_id: Uuid,
    record: &CompanyResearch,
) -> Result<PeopleOutcome> {
    let result = record.result();
    if !record.is_completed() || !result.is_advanceable() {
        return Ok(PeopleOutcome::Skipped(format!(
            "company status {} does not qualify",
            result
                .company_status
                .map(|s| s.as_str())
                .unwrap_or("unknown")
        )));
    }

    let Some(company) = store
        .find_company_by_domain(user_id, &record.company_domain)
        .await?
    else {
        return Ok(PeopleOutcome::Skipped(format!(
            "no company with domain {}",
            record.company_domain
        )));
    };

    let campaign_id = record.campaign_id.unwrap_or(company.campaign_id);
    let campaign = store
        .find_campaign(user_id, campaign_id)
        .await?
        .ok_or(OrchestratorError::CampaignNotFound(campaign_id))?;

    let request = payload::prospect_request(
        payload::company_request(user_id, &campaign, &company),
        record.id,
        Some(&result),
        record.raw_result.clone(),
    );

    let started = Instant::now();
    let reply = webhook.prospect_research(&request).await;
    let elapsed = started.elapsed().as_secs_f64();

    let body = match reply {
        Ok(body) => body,
        Err(e) => {
            record_webhook_call("people", "error", elapsed);
            warn!(error = %e, "Prospect research call failed");
            return Ok(PeopleOutcome::Failed(e.to_string()));
        }
    };

    let outcome = match classify_prospect_reply(&body) {
        ProspectReply::Contacts(contacts) => {
            record_webhook_call("people", "completed", elapsed);
            let stored = persist_contacts(
                store,
                user_id,
                record.id,
                Some(campaign.id),
                company.account_id.clone(),
                &contacts,
            )
            .await;
            PeopleOutcome::Contacts(stored)
        }
        ProspectReply::Accepted => {
            record_webhook_call("people", "accepted", elapsed);
            PeopleOutcome::Accepted
        }
        ProspectReply::Failed { message, .. } => {
            record_webhook_call("people", "failed", elapsed);
            PeopleOutcome::Failed(message)
        }
    };

    info!(outcome = ?outcome, "Prospect research finished");
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use prospectforge_common::db::CompanyResearchInput;
    use prospectforge_common::research::{CompanyResearchResult, CompanyStatus, ResearchStage};
    use prospectforge_common::webhook::MockReply;
    use serde_json::json;
    use std::time::Duration;

    async fn record(h: &Harness, domain: &str, status: CompanyStatus) -> CompanyResearch {
        h.store
            .record_company_research(
                CompanyResearchInput::completed(
                    h.user_id,
                    Some(h.campaign.id),
                    domain,
                    CompanyResearchResult {
                        company_status: Some(status),
                        ..Default::default()
                    },
                    json!({ "company_status": status.as_str() }),
                ),
                Duration::from_secs(900),
            )
            .await
            .unwrap()
            .into_record()
    }

    #[tokio::test]
    async fn test_untracked_record_runs_stage_two() {
        let h = Harness::new().await;
        h.add_company("Acme", "https://acme.com").await;
        let record = record(&h, "acme.com", CompanyStatus::Acquired).await;
        h.webhook.push_people(MockReply::Json(json!({
            "contacts": [
                { "first_name": "Ada", "last_name": "Lovelace", "linkedin": "https://linkedin.com/in/ada" },
                { "first_name": "Ada", "last_name": "Lovelace", "linkedin": "https://linkedin.com/in/ada/" }
            ]
        })));

        let outcome = run_people_for_record(h.store.as_ref(), h.webhook.as_ref(), h.user_id, &record)
            .await
            .unwrap();

        assert_eq!(outcome, PeopleOutcome::Contacts(1));
        let calls = h.webhook.calls_for(ResearchStage::People);
        assert_eq!(calls[0].body["company_research_id"], record.id.to_string());
        assert_eq!(calls[0].body["company"]["linkedin"], "https://linkedin.com/company/acme");
    }

    #[tokio::test]
    async fn test_non_qualifying_record_is_skipped() {
        let h = Harness::new().await;
        h.add_company("Gone", "gone.com").await;
        let record = record(&h, "gone.com", CompanyStatus::Bankrupt).await;

        let outcome = run_people_for_record(h.store.as_ref(), h.webhook.as_ref(), h.user_id, &record)
            .await
            .unwrap();

        assert!(matches!(outcome, PeopleOutcome::Skipped(_)));
        assert!(h.webhook.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_domain_is_skipped() {
        let h = Harness::new().await;
        let record = record(&h, "nobody.com", CompanyStatus::Operating).await;

        let outcome = run_people_for_record(h.store.as_ref(), h.webhook.as_ref(), h.user_id, &record)
            .await
            .unwrap();

        assert!(matches!(outcome, PeopleOutcome::Skipped(_)));
    }

    #[tokio::test]
    async fn test_persist_contacts_reports_failures() {
        let h = Harness::new().await;
        let contacts = vec![Contact {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            ..Default::default()
        }];

        // No research row with this id
        let stored = persist_contacts(h.store.as_ref(), h.user_id, Uuid::new_v4(), None, None, &contacts).await;
        assert_eq!(stored, 0);
        assert_eq!(h.store.prospect_count().await, 0);
    }
}
