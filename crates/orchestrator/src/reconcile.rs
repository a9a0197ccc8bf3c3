//! Notification path
//!
//! Row events from the store are merged into the progress board. Events may
//! arrive zero, one or many times and in any order relative to the direct
//! webhook replies; the board's rank rules make repeated merges no-ops.

use crate::orchestrator::ResearchOrchestrator;
use crate::progress::{ProgressEvent, ProgressState};
use prospectforge_common::db::models::{CompanyResearch, ProspectResearch};
use prospectforge_common::events::{EventBus, ResearchEvent, RowOp};
use prospectforge_common::research::{dedupe_contacts, ResearchStage, ResearchStatus};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

impl ResearchOrchestrator {
    /// Merge one store event into this user's progress
    #[instrument(skip_all, fields(user_id = %self.user_id, kind = event.kind()))]
    pub async fn reconcile(&self, event: ResearchEvent) {
        if event.user_id() != self.user_id {
            return;
        }

        match event {
            ResearchEvent::CompanyResearch { op, record } => self.reconcile_company(op, record).await,
            ResearchEvent::ProspectInserted { record } => self.reconcile_prospect(record).await,
        }
    }

    async fn reconcile_company(&self, op: RowOp, record: CompanyResearch) {
        let Some(company_id) = self.board.find_by_domain(&record.company_domain) else {
            debug!(domain = %record.company_domain, "Research event for untracked domain");
            return;
        };

        match record.research_status() {
            ResearchStatus::Completed => {
                let triggered = self.advance_from_record(company_id, &record).await;
                debug!(?op, research_id = %record.id, triggered, "Merged company research");
            }
            ResearchStatus::Failed => {
                // Only a company waiting on this callback takes the failure
                let waiting = self
                    .board
                    .get(company_id)
                    .map(|e| {
                        e.state == ProgressState::AwaitingCallback
                            && e.awaiting_stage == Some(ResearchStage::Company)
                    })
                    .unwrap_or(false);
                if waiting {
                    self.board.merge(
                        company_id,
                        ProgressEvent::Failed {
                            stage: ResearchStage::Company,
                            message: record
                                .error_message
                                .clone()
                                .unwrap_or_else(|| "Company research failed".to_string()),
                            raw: None,
                        },
                    );
                }
            }
            ResearchStatus::Processing => {
                self.board.merge(
                    company_id,
                    ProgressEvent::CompanyAccepted {
                        research_id: Some(record.id),
                    },
                );
            }
        }
    }

    async fn reconcile_prospect(&self, record: ProspectResearch) {
        let research_id = record.company_research_id;
        let company_id = match self.board.find_by_research_id(research_id) {
            Some(id) => id,
            None => match self.store.find_company_research(research_id).await {
                Ok(Some(research)) => match self.board.find_by_domain(&research.company_domain) {
                    Some(id) => id,
                    None => return,
                },
                Ok(None) => return,
                Err(e) => {
                    warn!(error = %e, research_id = %research_id, "Could not load research for prospect event");
                    return;
                }
            },
        };

        // Re-read the full set so duplicate or reordered inserts converge
        let rows = match self.store.list_prospects(research_id).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, research_id = %research_id, "Could not list prospects");
                return;
            }
        };
        let contacts = dedupe_contacts(rows.iter().map(|r| r.contact()).collect());
        let count = contacts.len();

        self.board.merge(
            company_id,
            ProgressEvent::ContactsFound {
                contacts,
                research_id: Some(research_id),
            },
        );
        debug!(company_id = %company_id, contacts = count, "Merged prospects");
    }

    /// Move callbacks that never arrived to `error`. Returns how many entries moved.
    pub fn sweep_stale(&self) -> usize {
        let Some(max_wait) = self.config.stale_after() else {
            return 0;
        };

        let stale = self.board.stale_entries(max_wait);
        for company_id in &stale {
            self.board
                .merge(*company_id, ProgressEvent::Stale { waited: max_wait });
        }
        if !stale.is_empty() {
            info!(user_id = %self.user_id, count = stale.len(), "Stale callbacks marked as errors");
        }
        stale.len()
    }

    /// Subscribe to the bus and reconcile each event on its own task
    pub fn spawn_reconciler(self: &Arc<Self>, bus: &EventBus) -> JoinHandle<()> {
        let mut events = bus.subscribe();
        let this = self.clone();

        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        if event.user_id() != this.user_id {
                            continue;
                        }
                        let this = this.clone();
                        tokio::spawn(async move { this.reconcile(event).await });
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(user_id = %this.user_id, skipped, "Reconciler lagged behind research events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!(user_id = %this.user_id, "Reconciler stopped");
        })
    }

    /// Periodic stale sweep, when a staleness limit is configured
    pub fn spawn_stale_sweeper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let max_wait = self.config.stale_after()?;
        let period = (max_wait / 4).max(std::time::Duration::from_secs(1));
        let this = Arc::downgrade(self);

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let Some(this) = this.upgrade() else { break };
                this.sweep_stale();
            }
        }))
    }

    /// Company whose progress carries this research record id
    pub fn company_for_research(&self, research_id: Uuid) -> Option<Uuid> {
        self.board.find_by_research_id(research_id)
    }
}
