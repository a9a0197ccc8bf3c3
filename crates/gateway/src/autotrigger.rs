//! Best-effort stage-2 start after a stage-1 callback
//!
//! The callback answers within `webhooks.auto_trigger_wait_secs`. When the
//! prospect research call takes longer it keeps running and its outcome is
//! logged when it lands.

use crate::AppState;
use prospectforge_common::db::models::CompanyResearch;
use prospectforge_orchestrator::{run_people_for_record, PeopleOutcome};
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// What the auto-trigger did by the time the callback answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoTriggerStatus {
    /// The record does not qualify for stage two
    NotQualified,
    /// Stage two ran to an answer (contacts or acceptance)
    Triggered,
    /// A batch or an earlier callback already started stage two
    AlreadyTriggered,
    Skipped,
    Failed,
    /// Still running when the wait elapsed
    Pending,
}

/// Start prospect research for a freshly recorded stage-1 result, waiting at
/// most the configured time for it to be accepted
#[instrument(skip_all, fields(user_id = %user_id, research_id = %record.id, domain = %record.company_domain))]
pub async fn auto_trigger_people_stage(
    state: &AppState,
    user_id: Uuid,
    record: CompanyResearch,
) -> AutoTriggerStatus {
    if !record.is_completed() || !record.result().is_advanceable() {
        return AutoTriggerStatus::NotQualified;
    }

    let mut handle = {
        let state = state.clone();
        tokio::spawn(async move { trigger(&state, user_id, &record).await })
    };

    let wait = state.config.webhooks.auto_trigger_wait();
    match tokio::time::timeout(wait, &mut handle).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            error!(error = %e, "Auto-trigger task failed");
            AutoTriggerStatus::Failed
        }
        Err(_) => {
            info!(wait_secs = wait.as_secs(), "Prospect research still running, answering callback");
            tokio::spawn(async move {
                match handle.await {
                    Ok(status) => info!(?status, "Auto-triggered prospect research finished"),
                    Err(e) => error!(error = %e, "Auto-trigger task failed"),
                }
            });
            AutoTriggerStatus::Pending
        }
    }
}

async fn trigger(state: &AppState, user_id: Uuid, record: &CompanyResearch) -> AutoTriggerStatus {
    // A company in a running batch goes through its orchestrator so the
    // progress board sees stage two and the atomic claim is honoured
    if let Some(orchestrator) = state.registry.get(user_id) {
        if orchestrator.tracks_domain(&record.company_domain) {
            if let Some(company_id) = orchestrator.board().find_by_domain(&record.company_domain) {
                return if orchestrator.advance_from_record(company_id, record).await {
                    AutoTriggerStatus::Triggered
                } else {
                    AutoTriggerStatus::AlreadyTriggered
                };
            }
        }
    }

    match run_people_for_record(state.store.as_ref(), state.webhook.as_ref(), user_id, record).await {
        Ok(PeopleOutcome::Contacts(stored)) => {
            info!(stored, "Prospect research returned contacts");
            AutoTriggerStatus::Triggered
        }
        Ok(PeopleOutcome::Accepted) => AutoTriggerStatus::Triggered,
        Ok(PeopleOutcome::Skipped(reason)) => {
            info!(%reason, "Prospect research skipped");
            AutoTriggerStatus::Skipped
        }
        Ok(PeopleOutcome::Failed(message)) => {
            warn!(%message, "Auto-triggered prospect research failed");
            AutoTriggerStatus::Failed
        }
        Err(e) => {
            warn!(error = %e, "Auto-triggered prospect research failed");
            AutoTriggerStatus::Failed
        }
    }
}
