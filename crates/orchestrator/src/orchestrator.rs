//! Research orchestrator
//!
//! Drives selected companies through company research, then prospect
//! research, for one user. Every outcome lands on the shared
//! [`ProgressBoard`]; results that arrive later through the store are merged
//! by the reconciler (see `reconcile.rs`).

use crate::errors::{OrchestratorError, Result};
use crate::payload;
use crate::people::persist_contacts;
use crate::progress::{CompanyProgress, ProgressBoard, ProgressEvent, ProgressState};
use futures::StreamExt;
use prospectforge_common::config::OrchestratorConfig;
use prospectforge_common::db::models::{Campaign, Company, CompanyResearch};
use prospectforge_common::db::{CompanyResearchInput, ResearchStore};
use prospectforge_common::metrics::{record_batch_finished, record_batch_started, record_webhook_call};
use prospectforge_common::research::{
    classify_company_reply, classify_prospect_reply, CompanyReply, CompanyResearchResult,
    ProspectReply, ResearchStage,
};
use prospectforge_common::webhook::ResearchWebhook;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub(crate) const STOPPED_MESSAGE: &str = "Batch stopped before this company started";
const NO_WEBSITE_MESSAGE: &str = "Company has no website";

/// A company offered to a batch
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub company: Company,
    pub selected: bool,
}

/// Where each company of a finished batch ended up
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub complete: usize,
    pub awaiting: usize,
    pub not_qualified: usize,
    pub errors: usize,
    pub stopped: bool,
}

/// Holds the single-batch flag; released on drop, including unwinding
struct BatchGuard {
    running: Arc<AtomicBool>,
}

impl BatchGuard {
    fn acquire(running: &Arc<AtomicBool>, companies: usize) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        record_batch_started(companies);
        Some(Self {
            running: running.clone(),
        })
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        record_batch_finished();
    }
}

/// Campaign and company behind a progress entry
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub company: Company,
    pub campaign: Campaign,
}

/// A validated retry, ready to run
#[derive(Debug, Clone)]
pub struct RetryPlan {
    pub company_id: Uuid,
    pub stage: ResearchStage,
    target: Target,
    research_id: Option<Uuid>,
    result: Option<CompanyResearchResult>,
    raw: Option<Value>,
}

/// Per-user research orchestrator
pub struct ResearchOrchestrator {
    pub(crate) user_id: Uuid,
    pub(crate) store: Arc<dyn ResearchStore>,
    pub(crate) webhook: Arc<dyn ResearchWebhook>,
    pub(crate) board: ProgressBoard,
    pub(crate) config: OrchestratorConfig,
    running: Arc<AtomicBool>,
    stop_requested: AtomicBool,
    targets: RwLock<HashMap<Uuid, Target>>,
}

impl ResearchOrchestrator {
    pub fn new(
        user_id: Uuid,
        store: Arc<dyn ResearchStore>,
        webhook: Arc<dyn ResearchWebhook>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            user_id,
            store,
            webhook,
            board: ProgressBoard::new(),
            config,
            running: Arc::new(AtomicBool::new(false)),
            stop_requested: AtomicBool::new(false),
            targets: RwLock::new(HashMap::new()),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn board(&self) -> &ProgressBoard {
        &self.board
    }

    pub fn progress(&self) -> Vec<CompanyProgress> {
        self.board.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop after the companies already started. Returns whether a batch was running.
    pub fn stop_batch(&self) -> bool {
        let running = self.is_running();
        if running {
            self.stop_requested.store(true, Ordering::Release);
            info!(user_id = %self.user_id, "Batch stop requested");
        }
        running
    }

    pub(crate) fn target(&self, company_id: Uuid) -> Option<Target> {
        self.targets
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&company_id)
            .cloned()
    }

    fn remember(&self, campaign: &Campaign, company: &Company) {
        self.targets
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(
                company.id,
                Target {
                    company: company.clone(),
                    campaign: campaign.clone(),
                },
            );
    }

    /// Whether a tracked company has this domain
    pub fn tracks_domain(&self, domain: &str) -> bool {
        self.board
            .find_by_domain(domain)
            .map(|id| self.target(id).is_some())
            .unwrap_or(false)
    }

    fn queue(&self, campaign: &Campaign, items: Vec<BatchItem>) -> Vec<Company> {
        self.stop_requested.store(false, Ordering::Release);
        let selected: Vec<Company> = items
            .into_iter()
            .filter(|item| item.selected)
            .map(|item| item.company)
            .collect();

        let mut queued = Vec::with_capacity(selected.len());
        for (position, company) in selected.into_iter().enumerate() {
            if !self
                .board
                .enqueue(company.id, &company.name, &company.website, position as u64)
            {
                warn!(company_id = %company.id, "Company has a call in flight, left out of the batch");
                continue;
            }
            self.remember(campaign, &company);
            queued.push(company);
        }
        queued
    }

    /// Research every selected company and wait for the batch to finish
    pub async fn run_batch(&self, campaign: Campaign, items: Vec<BatchItem>) -> Result<BatchSummary> {
        let selected = items.iter().filter(|i| i.selected).count();
        let guard = BatchGuard::acquire(&self.running, selected)
            .ok_or(OrchestratorError::BatchAlreadyRunning)?;
        let companies = self.queue(&campaign, items);
        Ok(self.process(guard, campaign, companies).await)
    }

    /// Queue a batch and run it in the background. Returns the number of
    /// companies queued.
    pub fn begin_batch(self: &Arc<Self>, campaign: Campaign, items: Vec<BatchItem>) -> Result<usize> {
        let selected = items.iter().filter(|i| i.selected).count();
        let guard = BatchGuard::acquire(&self.running, selected)
            .ok_or(OrchestratorError::BatchAlreadyRunning)?;
        let companies = self.queue(&campaign, items);
        let queued = companies.len();

        let this = self.clone();
        tokio::spawn(async move {
            let summary = this.process(guard, campaign, companies).await;
            info!(
                user_id = %this.user_id,
                complete = summary.complete,
                awaiting = summary.awaiting,
                errors = summary.errors,
                "Background batch finished"
            );
        });
        Ok(queued)
    }

    #[instrument(skip_all, fields(user_id = %self.user_id, campaign_id = %campaign.id, companies = companies.len()))]
    async fn process(&self, _guard: BatchGuard, campaign: Campaign, companies: Vec<Company>) -> BatchSummary {
        info!("Batch started");

        let campaign = &campaign;
        let limit = self.config.max_concurrency.max(1);
        futures::stream::iter(companies.iter())
            .for_each_concurrent(limit, |company| async move {
                if self.stop_requested.load(Ordering::Acquire) {
                    self.board.settle(
                        company.id,
                        ProgressEvent::Failed {
                            stage: ResearchStage::Company,
                            message: STOPPED_MESSAGE.to_string(),
                            raw: None,
                        },
                    );
                    return;
                }
                self.run_company(campaign, company).await;
            })
            .await;

        let mut summary = BatchSummary {
            processed: companies.len(),
            stopped: self.stop_requested.swap(false, Ordering::AcqRel),
            ..Default::default()
        };
        for company in &companies {
            match self.board.get(company.id).map(|e| e.state) {
                Some(ProgressState::Complete) => summary.complete += 1,
                Some(ProgressState::AwaitingCallback) => summary.awaiting += 1,
                Some(ProgressState::NotQualified) => summary.not_qualified += 1,
                Some(ProgressState::Error) => summary.errors += 1,
                _ => {}
            }
        }

        info!(
            complete = summary.complete,
            awaiting = summary.awaiting,
            not_qualified = summary.not_qualified,
            errors = summary.errors,
            stopped = summary.stopped,
            "Batch finished"
        );
        summary
    }

    async fn run_company(&self, campaign: &Campaign, company: &Company) {
        if !self.board.try_start(company.id, ProgressEvent::CompanyStarted) {
            warn!(company_id = %company.id, "Company research already in flight, skipping");
            return;
        }
        self.company_stage(campaign, company).await;
    }

    /// Stage 1 for a company already marked in flight
    #[instrument(skip_all, fields(company_id = %company.id, domain = %company.domain()))]
    async fn company_stage(&self, campaign: &Campaign, company: &Company) {
        let domain = company.domain();
        if domain.is_empty() {
            self.board.settle(
                company.id,
                ProgressEvent::Failed {
                    stage: ResearchStage::Company,
                    message: NO_WEBSITE_MESSAGE.to_string(),
                    raw: None,
                },
            );
            return;
        }

        let request = payload::company_request(self.user_id, campaign, company);
        let started = Instant::now();
        let reply = self.webhook.company_research(&request).await;
        let elapsed = started.elapsed().as_secs_f64();

        let body = match reply {
            Ok(body) => body,
            Err(e) => {
                record_webhook_call("company", "error", elapsed);
                warn!(error = %e, "Company research call failed");
                self.board.settle(
                    company.id,
                    ProgressEvent::Failed {
                        stage: ResearchStage::Company,
                        message: e.to_string(),
                        raw: None,
                    },
                );
                return;
            }
        };

        match classify_company_reply(&body) {
            CompanyReply::Completed { result, raw } => {
                record_webhook_call("company", "completed", elapsed);

                // Claim before the write so the notification it causes cannot trigger stage 2 too
                let claimed = result.is_advanceable() && self.board.claim_people(company.id);

                let input = CompanyResearchInput::completed(
                    self.user_id,
                    Some(campaign.id),
                    domain,
                    result.clone(),
                    raw.clone(),
                );
                let record = match self
                    .store
                    .record_company_research(input, self.config.dedupe_window())
                    .await
                {
                    Ok(outcome) => {
                        debug!(action = outcome.action(), "Company research stored");
                        outcome.into_record()
                    }
                    Err(e) => {
                        if claimed {
                            self.board.release_people(company.id);
                        }
                        warn!(error = %e, "Could not store company research");
                        self.board.settle(
                            company.id,
                            ProgressEvent::Failed {
                                stage: ResearchStage::Company,
                                message: format!("Could not store company research: {}", e),
                                raw: None,
                            },
                        );
                        return;
                    }
                };

                info!(
                    research_id = %record.id,
                    company_status = ?result.company_status,
                    "Company research completed"
                );
                self.board.settle(
                    company.id,
                    ProgressEvent::CompanyResearched {
                        result: result.clone(),
                        research_id: Some(record.id),
                    },
                );

                if claimed {
                    self.people_stage(campaign, company, record.id, Some(&result), Some(raw))
                        .await;
                }
            }
            CompanyReply::Accepted { company_research_id } => {
                record_webhook_call("company", "accepted", elapsed);
                info!(research_id = ?company_research_id, "Company research accepted, awaiting callback");
                self.board.settle(
                    company.id,
                    ProgressEvent::CompanyAccepted {
                        research_id: company_research_id,
                    },
                );
            }
            CompanyReply::Failed { message, raw } => {
                record_webhook_call("company", "failed", elapsed);
                warn!(%message, "Company research failed");
                self.board.settle(
                    company.id,
                    ProgressEvent::Failed {
                        stage: ResearchStage::Company,
                        message,
                        raw,
                    },
                );
            }
        }
    }

    /// Mark stage 2 started and run it
    pub(crate) async fn people_stage(
        &self,
        campaign: &Campaign,
        company: &Company,
        research_id: Uuid,
        result: Option<&CompanyResearchResult>,
        raw: Option<Value>,
    ) {
        self.board.merge(company.id, ProgressEvent::PeopleStarted);
        self.people_call(campaign, company, research_id, result, raw)
            .await;
    }

    #[instrument(skip_all, fields(company_id = %company.id, research_id = %research_id))]
    async fn people_call(
        &self,
        campaign: &Campaign,
        company: &Company,
        research_id: Uuid,
        result: Option<&CompanyResearchResult>,
        raw: Option<Value>,
    ) {
        let request = payload::prospect_request(
            payload::company_request(self.user_id, campaign, company),
            research_id,
            result,
            raw,
        );

        let started = Instant::now();
        let reply = self.webhook.prospect_research(&request).await;
        let elapsed = started.elapsed().as_secs_f64();

        let event = match reply {
            Err(e) => {
                record_webhook_call("people", "error", elapsed);
                warn!(error = %e, "Prospect research call failed");
                ProgressEvent::Failed {
                    stage: ResearchStage::People,
                    message: e.to_string(),
                    raw: None,
                }
            }
            Ok(body) => match classify_prospect_reply(&body) {
                ProspectReply::Contacts(contacts) => {
                    record_webhook_call("people", "completed", elapsed);
                    let stored = persist_contacts(
                        self.store.as_ref(),
                        self.user_id,
                        research_id,
                        Some(campaign.id),
                        company.account_id.clone(),
                        &contacts,
                    )
                    .await;
                    info!(contacts = contacts.len(), stored, "Prospect research completed");
                    ProgressEvent::ContactsFound {
                        contacts,
                        research_id: Some(research_id),
                    }
                }
                ProspectReply::Accepted => {
                    record_webhook_call("people", "accepted", elapsed);
                    info!("Prospect research accepted, awaiting callback");
                    ProgressEvent::PeopleAccepted
                }
                ProspectReply::Failed { message, raw } => {
                    record_webhook_call("people", "failed", elapsed);
                    warn!(%message, "Prospect research failed");
                    ProgressEvent::Failed {
                        stage: ResearchStage::People,
                        message,
                        raw,
                    }
                }
            },
        };

        self.board.settle(company.id, event);
    }

    /// Merge a completed stage-1 record for a tracked company and start
    /// stage 2 when it qualifies and no other path has. Returns whether
    /// stage 2 ran from here.
    pub async fn advance_from_record(&self, company_id: Uuid, record: &CompanyResearch) -> bool {
        let result = record.result();
        self.board.merge(
            company_id,
            ProgressEvent::CompanyResearched {
                result: result.clone(),
                research_id: Some(record.id),
            },
        );

        if !result.is_advanceable() || !self.board.claim_people(company_id) {
            return false;
        }

        let Some(target) = self.target(company_id) else {
            self.board.release_people(company_id);
            return false;
        };

        info!(company_id = %company_id, research_id = %record.id, "Starting prospect research from stored result");
        self.people_stage(
            &target.campaign,
            &target.company,
            record.id,
            Some(&result),
            record.raw_result.clone(),
        )
        .await;
        true
    }

    /// Re-run one stage for a company
    pub async fn retry_stage(&self, company_id: Uuid, stage: ResearchStage) -> Result<()> {
        let plan = self.prepare_retry(company_id, stage).await?;
        self.execute_retry(plan).await;
        Ok(())
    }

    /// Validate a retry and mark the stage in flight, without calling out
    #[instrument(skip(self), fields(user_id = %self.user_id))]
    pub async fn prepare_retry(&self, company_id: Uuid, stage: ResearchStage) -> Result<RetryPlan> {
        let target = match self.target(company_id) {
            Some(target) => target,
            None => self.load_target(company_id).await?,
        };

        let entry = self
            .board
            .get(company_id)
            .ok_or(OrchestratorError::CompanyNotFound(company_id))?;
        if entry.in_flight {
            return Err(OrchestratorError::StageInFlight { company_id, stage });
        }

        let mut plan = RetryPlan {
            company_id,
            stage,
            target,
            research_id: entry.company_research_id,
            result: entry.company_research.clone(),
            raw: None,
        };

        let started = match stage {
            ResearchStage::Company => self.board.try_start(company_id, ProgressEvent::CompanyStarted),
            ResearchStage::People => {
                let research_id = plan
                    .research_id
                    .ok_or(OrchestratorError::MissingResearchId { company_id })?;
                if let Some(record) = self.store.find_company_research(research_id).await? {
                    plan.result = Some(record.result());
                    plan.raw = record.raw_result;
                }
                self.board.try_start(company_id, ProgressEvent::PeopleStarted)
            }
        };

        if !started {
            return Err(OrchestratorError::StageInFlight { company_id, stage });
        }

        info!(company_id = %company_id, %stage, "Retry prepared");
        Ok(plan)
    }

    pub async fn execute_retry(&self, plan: RetryPlan) {
        let Target { campaign, company } = plan.target;
        match plan.stage {
            ResearchStage::Company => self.company_stage(&campaign, &company).await,
            ResearchStage::People => {
                // prepare_retry guarantees the id for this stage
                if let Some(research_id) = plan.research_id {
                    self.people_call(&campaign, &company, research_id, plan.result.as_ref(), plan.raw)
                        .await;
                }
            }
        }
    }

    /// Load a company the board does not know yet, with its latest completed result
    async fn load_target(&self, company_id: Uuid) -> Result<Target> {
        let company = self
            .store
            .find_company(self.user_id, company_id)
            .await?
            .ok_or(OrchestratorError::CompanyNotFound(company_id))?;
        let campaign = self
            .store
            .find_campaign(self.user_id, company.campaign_id)
            .await?
            .ok_or(OrchestratorError::CampaignNotFound(company.campaign_id))?;

        self.remember(&campaign, &company);
        self.board.ensure(CompanyProgress::new(
            company.id,
            company.name.clone(),
            &company.website,
        ));

        let latest = self
            .store
            .latest_company_research(self.user_id, &company.domain())
            .await?;
        if let Some(record) = latest.filter(|r| r.is_completed()) {
            self.board.merge(
                company.id,
                ProgressEvent::CompanyResearched {
                    result: record.result(),
                    research_id: Some(record.id),
                },
            );
        }

        Ok(Target { company, campaign })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{eventually, Harness};
    use prospectforge_common::config::OrchestratorConfig;
    use prospectforge_common::webhook::{MockReply, MockWebhook};
    use serde_json::json;
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn operating() -> MockReply {
        MockReply::Json(json!({ "status": "success", "company_status": "Operating" }))
    }

    fn contacts(names: &[&str]) -> MockReply {
        let contacts: Vec<Value> = names
            .iter()
            .map(|n| json!({ "first_name": n, "last_name": "Smith", "job_title": "CTO" }))
            .collect();
        MockReply::Json(json!({ "status": "success", "contacts": contacts }))
    }

    #[tokio::test]
    async fn test_sync_happy_path_completes() {
        let h = Harness::new().await;
        let acme = h.add_company("Acme", "https://www.acme.com").await;
        h.webhook.push_company(operating()).push_people(contacts(&["Ada", "Alan"]));

        let summary = assert_ok!(
            h.orchestrator
                .run_batch(h.campaign.clone(), Harness::selected(&[acme.clone()]))
                .await
        );

        assert_eq!(summary.complete, 1);
        let entry = h.orchestrator.board().get(acme.id).unwrap();
        assert_eq!(entry.state, ProgressState::Complete);
        assert_eq!(entry.contacts.len(), 2);
        assert_eq!(h.store.prospect_count().await, 2);
        assert!(!h.orchestrator.is_running());
    }

    #[tokio::test]
    async fn test_stage_one_invoked_once_per_selected_company_in_order() {
        let h = Harness::new().await;
        let mut items = Vec::new();
        for (i, name) in ["Alpha", "Beta", "Gamma", "Delta"].iter().enumerate() {
            let company = h.add_company(name, &format!("{}.io", name.to_lowercase())).await;
            items.push(BatchItem {
                company,
                selected: i != 2,
            });
        }

        let summary = h
            .orchestrator
            .run_batch(h.campaign.clone(), items)
            .await
            .unwrap();

        let domains: Vec<String> = h
            .webhook
            .calls_for(ResearchStage::Company)
            .iter()
            .map(|c| c.body["company_domain"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(domains, vec!["alpha.io", "beta.io", "delta.io"]);
        assert_eq!(summary.processed, 3);
        // Empty replies are acknowledgments
        assert_eq!(summary.awaiting, 3);
    }

    #[tokio::test]
    async fn test_non_advanceable_status_skips_stage_two() {
        let h = Harness::new().await;
        let gone = h.add_company("Gone", "gone.com").await;
        let lost = h.add_company("Lost", "lost.com").await;
        h.webhook
            .push_company(MockReply::Json(json!({ "company_status": "Bankrupt" })))
            .push_company(MockReply::Json(json!({ "company_status": "Not_Found" })));

        let summary = h
            .orchestrator
            .run_batch(h.campaign.clone(), Harness::selected(&[gone.clone(), lost]))
            .await
            .unwrap();

        assert_eq!(summary.not_qualified, 2);
        assert!(h.webhook.calls_for(ResearchStage::People).is_empty());
        let entry = h.orchestrator.board().get(gone.id).unwrap();
        assert!(entry.company_research.is_some());
        assert!(entry.company_research_id.is_some());
    }

    #[tokio::test]
    async fn test_stage_two_carries_stage_one_record_id() {
        let h = Harness::new().await;
        let acme = h.add_company("Acme", "acme.com").await;
        h.webhook.push_company(operating());

        h.orchestrator
            .run_batch(h.campaign.clone(), Harness::selected(&[acme.clone()]))
            .await
            .unwrap();

        let record = h
            .store
            .latest_company_research(h.user_id, "acme.com")
            .await
            .unwrap()
            .unwrap();
        let people = h.webhook.calls_for(ResearchStage::People);
        assert_eq!(people.len(), 1);
        assert_eq!(people[0].body["company_research_id"], record.id.to_string());
        assert_eq!(people[0].body["qualify"], true);
        assert_eq!(people[0].body["companyResearch"]["company_status"], "Operating");

        // Empty stage-2 reply means the contacts arrive by callback
        let entry = h.orchestrator.board().get(acme.id).unwrap();
        assert_eq!(entry.state, ProgressState::AwaitingCallback);
        assert_eq!(entry.awaiting_stage, Some(ResearchStage::People));
    }

    #[tokio::test]
    async fn test_stage_two_failure_does_not_affect_next_company() {
        let h = Harness::new().await;
        let first = h.add_company("First", "first.com").await;
        let second = h.add_company("Second", "second.com").await;
        h.webhook
            .push_company(operating())
            .push_company(operating())
            .push_people(MockReply::Fail("HTTP 502: bad gateway".into()))
            .push_people(contacts(&["Grace"]));

        let summary = h
            .orchestrator
            .run_batch(h.campaign.clone(), Harness::selected(&[first.clone(), second.clone()]))
            .await
            .unwrap();

        let failed = h.orchestrator.board().get(first.id).unwrap();
        assert_eq!(failed.state, ProgressState::Error);
        assert!(failed.error.unwrap().contains("bad gateway"));
        assert_eq!(
            h.orchestrator.board().get(second.id).unwrap().state,
            ProgressState::Complete
        );
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.complete, 1);
    }

    #[tokio::test]
    async fn test_unrecognised_status_is_an_error() {
        let h = Harness::new().await;
        let acme = h.add_company("Acme", "acme.com").await;
        h.webhook
            .push_company(MockReply::Json(json!({ "status": "success", "company_status": "Unknown" })));

        let summary = h
            .orchestrator
            .run_batch(h.campaign.clone(), Harness::selected(&[acme.clone()]))
            .await
            .unwrap();

        assert_eq!(summary.errors, 1);
        assert_eq!(summary.not_qualified, 0);
        assert_eq!(h.orchestrator.board().get(acme.id).unwrap().state, ProgressState::Error);
        assert!(h.webhook.calls_for(ResearchStage::People).is_empty());
    }

    #[tokio::test]
    async fn test_unparseable_reply_keeps_raw_text() {
        let h = Harness::new().await;
        let acme = h.add_company("Acme", "acme.com").await;
        h.webhook
            .push_company(MockReply::Json(Value::String("I could not find that company".into())));

        h.orchestrator
            .run_batch(h.campaign.clone(), Harness::selected(&[acme.clone()]))
            .await
            .unwrap();

        let entry = h.orchestrator.board().get(acme.id).unwrap();
        assert_eq!(entry.state, ProgressState::Error);
        assert_eq!(entry.raw_response.as_deref(), Some("I could not find that company"));
    }

    #[tokio::test]
    async fn test_missing_website_fails_without_call() {
        let h = Harness::new().await;
        let blank = h.add_company("Blank", "  ").await;

        h.orchestrator
            .run_batch(h.campaign.clone(), Harness::selected(&[blank.clone()]))
            .await
            .unwrap();

        assert!(h.webhook.calls().is_empty());
        let entry = h.orchestrator.board().get(blank.id).unwrap();
        assert_eq!(entry.error.as_deref(), Some(NO_WEBSITE_MESSAGE));
    }

    #[tokio::test]
    async fn test_second_batch_rejected_while_running() {
        let webhook = Arc::new(MockWebhook::with_delay(Duration::from_millis(200)));
        let h = Harness::build(OrchestratorConfig::default(), webhook).await;
        let acme = h.add_company("Acme", "acme.com").await;

        let queued = h
            .orchestrator
            .begin_batch(h.campaign.clone(), Harness::selected(&[acme.clone()]))
            .unwrap();
        assert_eq!(queued, 1);
        assert!(h.orchestrator.is_running());

        let err = h
            .orchestrator
            .run_batch(h.campaign.clone(), Harness::selected(&[acme]))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::BatchAlreadyRunning));

        let orchestrator = h.orchestrator.clone();
        assert!(eventually(move || !orchestrator.is_running()).await);
    }

    #[tokio::test]
    async fn test_stop_skips_remaining_companies() {
        let webhook = Arc::new(MockWebhook::with_delay(Duration::from_millis(100)));
        let h = Harness::build(OrchestratorConfig::default(), webhook).await;
        let first = h.add_company("First", "first.com").await;
        let second = h.add_company("Second", "second.com").await;

        h.orchestrator
            .begin_batch(h.campaign.clone(), Harness::selected(&[first, second.clone()]))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(h.orchestrator.stop_batch());

        let orchestrator = h.orchestrator.clone();
        assert!(eventually(move || !orchestrator.is_running()).await);
        assert_eq!(h.webhook.calls_for(ResearchStage::Company).len(), 1);
        let skipped = h.orchestrator.board().get(second.id).unwrap();
        assert_eq!(skipped.error.as_deref(), Some(STOPPED_MESSAGE));
    }

    #[tokio::test]
    async fn test_retry_people_without_research_id_makes_no_call() {
        let h = Harness::new().await;
        let acme = h.add_company("Acme", "acme.com").await;

        let err = h
            .orchestrator
            .retry_stage(acme.id, ResearchStage::People)
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestratorError::MissingResearchId { .. }));
        assert!(h.webhook.calls().is_empty());
    }

    #[tokio::test]
    async fn test_retry_company_continues_into_people() {
        let h = Harness::new().await;
        let acme = h.add_company("Acme", "acme.com").await;
        h.webhook
            .push_company(MockReply::Timeout)
            .push_company(operating())
            .push_people(contacts(&["Ada"]));

        h.orchestrator
            .run_batch(h.campaign.clone(), Harness::selected(&[acme.clone()]))
            .await
            .unwrap();
        assert_eq!(h.orchestrator.board().get(acme.id).unwrap().state, ProgressState::Error);

        h.orchestrator
            .retry_stage(acme.id, ResearchStage::Company)
            .await
            .unwrap();

        let entry = h.orchestrator.board().get(acme.id).unwrap();
        assert_eq!(entry.state, ProgressState::Complete);
        assert_eq!(h.webhook.calls_for(ResearchStage::Company).len(), 2);
        assert_eq!(h.webhook.calls_for(ResearchStage::People).len(), 1);
    }

    #[tokio::test]
    async fn test_retry_people_loads_research_id_from_store() {
        let h = Harness::new().await;
        let acme = h.add_company("Acme", "acme.com").await;
        let stored = h
            .store
            .record_company_research(
                CompanyResearchInput::completed(
                    h.user_id,
                    Some(h.campaign.id),
                    "acme.com",
                    CompanyResearchResult {
                        company_status: Some(prospectforge_common::research::CompanyStatus::Operating),
                        ..Default::default()
                    },
                    json!({ "company_status": "Operating", "source": "callback" }),
                ),
                Duration::from_secs(900),
            )
            .await
            .unwrap()
            .into_record();
        h.webhook.push_people(contacts(&["Ada"]));

        h.orchestrator
            .retry_stage(acme.id, ResearchStage::People)
            .await
            .unwrap();

        let people = h.webhook.calls_for(ResearchStage::People);
        assert_eq!(people[0].body["company_research_id"], stored.id.to_string());
        assert_eq!(people[0].body["companyResearch"]["source"], "callback");
        assert_eq!(h.orchestrator.board().get(acme.id).unwrap().state, ProgressState::Complete);
    }

    #[tokio::test]
    async fn test_retry_rejected_while_in_flight() {
        let h = Harness::new().await;
        let acme = h.add_company("Acme", "acme.com").await;

        let plan = h
            .orchestrator
            .prepare_retry(acme.id, ResearchStage::Company)
            .await
            .unwrap();
        let err = h
            .orchestrator
            .prepare_retry(acme.id, ResearchStage::Company)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::StageInFlight { .. }));

        h.orchestrator.execute_retry(plan).await;
        assert!(!h.orchestrator.board().get(acme.id).unwrap().in_flight);
    }

    #[tokio::test]
    async fn test_batch_leaves_out_company_with_retry_in_flight() {
        let h = Harness::new().await;
        let acme = h.add_company("Acme", "acme.com").await;
        let beta = h.add_company("Beta", "beta.io").await;

        let plan = h
            .orchestrator
            .prepare_retry(acme.id, ResearchStage::Company)
            .await
            .unwrap();

        let summary = h
            .orchestrator
            .run_batch(h.campaign.clone(), Harness::selected(&[acme.clone(), beta]))
            .await
            .unwrap();
        assert_eq!(summary.processed, 1);
        assert!(h.orchestrator.board().get(acme.id).unwrap().in_flight);

        h.orchestrator.execute_retry(plan).await;

        let acme_calls = h
            .webhook
            .calls_for(ResearchStage::Company)
            .iter()
            .filter(|c| c.body["company_domain"] == "acme.com")
            .count();
        assert_eq!(acme_calls, 1);
        let entry = h.orchestrator.board().get(acme.id).unwrap();
        assert_eq!(entry.state, ProgressState::AwaitingCallback);
        assert!(!entry.in_flight);
    }

    #[tokio::test]
    async fn test_concurrent_batch_settles_every_company() {
        let config = OrchestratorConfig {
            max_concurrency: 2,
            ..Default::default()
        };
        let webhook = Arc::new(MockWebhook::with_delay(Duration::from_millis(30)));
        let h = Harness::build(config, webhook).await;

        let mut companies = Vec::new();
        for name in ["Alpha", "Beta", "Gamma", "Delta", "Omega"] {
            companies.push(h.add_company(name, &format!("{}.io", name.to_lowercase())).await);
        }
        // Companies start in input order and take stage-1 replies in that order
        for _ in 0..3 {
            h.webhook.push_company(operating()).push_people(contacts(&["Ada"]));
        }
        h.webhook
            .push_company(MockReply::Json(json!({ "company_status": "Bankrupt" })))
            .push_company(MockReply::Json(json!({ "status": "processing" })));

        let summary = h
            .orchestrator
            .run_batch(h.campaign.clone(), Harness::selected(&companies))
            .await
            .unwrap();

        assert_eq!(summary.processed, 5);
        assert_eq!(summary.complete, 3);
        assert_eq!(summary.not_qualified, 1);
        assert_eq!(summary.awaiting, 1);
        assert_eq!(summary.errors, 0);
        assert_eq!(h.webhook.calls_for(ResearchStage::Company).len(), 5);

        let board = h.orchestrator.progress();
        let order: Vec<Uuid> = board.iter().map(|e| e.company_id).collect();
        let expected: Vec<Uuid> = companies.iter().map(|c| c.id).collect();
        assert_eq!(order, expected);
        for entry in &board {
            assert!(!entry.in_flight);
            assert!(matches!(
                entry.state,
                ProgressState::Complete | ProgressState::NotQualified | ProgressState::AwaitingCallback
            ));
        }
        assert!(!h.orchestrator.is_running());
    }

    #[tokio::test]
    async fn test_retry_unknown_company() {
        let h = Harness::new().await;
        let err = h
            .orchestrator
            .retry_stage(Uuid::new_v4(), ResearchStage::Company)
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::CompanyNotFound(_)));
    }
}
