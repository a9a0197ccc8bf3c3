//! Research progress projection
//!
//! One [`CompanyProgress`] entry per company under research, mutated only
//! through [`ProgressBoard`] operations. Each operation runs as a single
//! closure under the board's lock, so the direct-response path and the
//! notification path can never interleave inside an update.
//!
//! Result events only move an entry forward. Ordering by rank:
//!
//! | state                         | rank |
//! |-------------------------------|------|
//! | pending, error                | 0    |
//! | company                       | 1    |
//! | awaiting_callback (company)   | 2    |
//! | people                        | 3    |
//! | awaiting_callback (people)    | 4    |
//! | complete, not_qualified       | 5    |
//!
//! Start events (`CompanyStarted`, `PeopleStarted`) begin a new attempt and
//! are applied unconditionally. A stage-2 `error` is only left through a
//! new attempt or found contacts, never through a stage-1 result.

use chrono::{DateTime, Utc};
use prospectforge_common::metrics::record_transition;
use prospectforge_common::research::{
    merge_contacts, normalize_domain, CompanyResearchResult, Contact, ResearchStage,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressState {
    /// Queued in a batch
    Pending,
    /// Stage 1 in flight
    Company,
    /// Stage 2 ready or in flight
    People,
    /// Job acknowledged, result expected through the store
    AwaitingCallback,
    Complete,
    /// Stage 1 concluded Bankrupt or Not_Found
    NotQualified,
    Error,
}

impl ProgressState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressState::Pending => "pending",
            ProgressState::Company => "company",
            ProgressState::People => "people",
            ProgressState::AwaitingCallback => "awaiting_callback",
            ProgressState::Complete => "complete",
            ProgressState::NotQualified => "not_qualified",
            ProgressState::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressState::Complete | ProgressState::NotQualified)
    }
}

/// Something that happened to a company's research
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Added to a new batch; resets the entry
    Queued,
    CompanyStarted,
    CompanyAccepted { research_id: Option<Uuid> },
    CompanyResearched {
        result: CompanyResearchResult,
        research_id: Option<Uuid>,
    },
    PeopleStarted,
    PeopleAccepted,
    ContactsFound {
        contacts: Vec<Contact>,
        research_id: Option<Uuid>,
    },
    Failed {
        stage: ResearchStage,
        message: String,
        raw: Option<String>,
    },
    /// No callback arrived in time
    Stale { waited: Duration },
}

/// Progress of one company
#[derive(Debug, Clone, Serialize)]
pub struct CompanyProgress {
    pub company_id: Uuid,
    pub company_name: String,
    pub domain: String,
    pub state: ProgressState,
    /// Which stage an `awaiting_callback` entry waits on
    pub awaiting_stage: Option<ResearchStage>,
    pub company_research: Option<CompanyResearchResult>,
    pub contacts: Vec<Contact>,
    pub company_research_id: Option<Uuid>,
    pub error: Option<String>,
    /// Stage whose failure put the entry in `error`
    pub failed_stage: Option<ResearchStage>,
    /// Unparseable job output, kept for display
    pub raw_response: Option<String>,
    pub people_triggered: bool,
    pub in_flight: bool,
    pub updated_at: DateTime<Utc>,
    /// Position in the batch
    pub position: u64,
}

impl CompanyProgress {
    pub fn new(company_id: Uuid, company_name: impl Into<String>, website: &str) -> Self {
        Self {
            company_id,
            company_name: company_name.into(),
            domain: normalize_domain(website),
            state: ProgressState::Pending,
            awaiting_stage: None,
            company_research: None,
            contacts: Vec::new(),
            company_research_id: None,
            error: None,
            failed_stage: None,
            raw_response: None,
            people_triggered: false,
            in_flight: false,
            updated_at: Utc::now(),
            position: 0,
        }
    }

    pub fn rank(&self) -> u8 {
        match (self.state, self.awaiting_stage) {
            (ProgressState::Pending | ProgressState::Error, _) => 0,
            (ProgressState::Company, _) => 1,
            (ProgressState::AwaitingCallback, Some(ResearchStage::People)) => 4,
            (ProgressState::AwaitingCallback, _) => 2,
            (ProgressState::People, _) => 3,
            (ProgressState::Complete | ProgressState::NotQualified, _) => 5,
        }
    }

    fn set_state(&mut self, state: ProgressState, awaiting: Option<ResearchStage>) {
        if self.state != state {
            record_transition(self.state.as_str(), state.as_str());
        }
        self.state = state;
        self.awaiting_stage = awaiting;
    }

    /// Human-readable status for the progress view
    pub fn status_line(&self) -> String {
        match self.state {
            ProgressState::Pending => "Queued".to_string(),
            ProgressState::Company => "Researching company...".to_string(),
            ProgressState::People if self.in_flight => "Finding decision makers...".to_string(),
            ProgressState::People => "Ready for prospect research".to_string(),
            ProgressState::AwaitingCallback => match self.awaiting_stage {
                Some(ResearchStage::People) => "Waiting for prospect results...".to_string(),
                _ => "Waiting for company research results...".to_string(),
            },
            ProgressState::Complete => format!("Found {} contacts", self.contacts.len()),
            ProgressState::NotQualified => {
                let status = self
                    .company_research
                    .as_ref()
                    .and_then(|r| r.company_status)
                    .map(|s| s.as_str())
                    .unwrap_or("not qualified");
                format!("Skipped: company is {}", status)
            }
            ProgressState::Error => format!(
                "Error: {}",
                self.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }

    /// Apply one event. Returns whether the state changed.
    pub fn apply(&mut self, event: ProgressEvent) -> bool {
        let before = (self.state, self.awaiting_stage);

        match event {
            ProgressEvent::Queued => {
                let mut fresh = CompanyProgress::new(self.company_id, self.company_name.clone(), "");
                fresh.domain = std::mem::take(&mut self.domain);
                fresh.position = self.position;
                if self.state != ProgressState::Pending {
                    record_transition(self.state.as_str(), ProgressState::Pending.as_str());
                }
                *self = fresh;
            }
            ProgressEvent::CompanyStarted => {
                self.set_state(ProgressState::Company, None);
                self.error = None;
                self.failed_stage = None;
                self.raw_response = None;
                self.people_triggered = false;
                self.in_flight = true;
            }
            ProgressEvent::CompanyAccepted { research_id } => {
                if self.company_research_id.is_none() {
                    self.company_research_id = research_id;
                }
                if self.rank() < 2 {
                    self.set_state(ProgressState::AwaitingCallback, Some(ResearchStage::Company));
                }
            }
            ProgressEvent::CompanyResearched {
                result,
                research_id,
            } => {
                let target = if result.is_advanceable() {
                    ProgressState::People
                } else {
                    ProgressState::NotQualified
                };
                let target_rank = if target == ProgressState::People { 3 } else { 5 };
                // Only a stage-1 result can clear a stage-1 failure
                let people_failed = self.state == ProgressState::Error
                    && self.failed_stage == Some(ResearchStage::People);

                if self.rank() < target_rank && !people_failed {
                    self.set_state(target, None);
                    self.error = None;
                    self.failed_stage = None;
                    self.raw_response = None;
                    if research_id.is_some() {
                        self.company_research_id = research_id;
                    }
                } else if self.company_research_id.is_none() {
                    self.company_research_id = research_id;
                }
                self.company_research = Some(result);
            }
            ProgressEvent::PeopleStarted => {
                self.set_state(ProgressState::People, None);
                self.error = None;
                self.failed_stage = None;
                self.raw_response = None;
                self.people_triggered = true;
                self.in_flight = true;
            }
            ProgressEvent::PeopleAccepted => {
                if self.rank() < 4 {
                    self.set_state(ProgressState::AwaitingCallback, Some(ResearchStage::People));
                }
            }
            ProgressEvent::ContactsFound {
                contacts,
                research_id,
            } => {
                if !contacts.is_empty() {
                    self.contacts = merge_contacts(&self.contacts, contacts);
                    self.set_state(ProgressState::Complete, None);
                    self.error = None;
                    self.failed_stage = None;
                    self.raw_response = None;
                    if self.company_research_id.is_none() {
                        self.company_research_id = research_id;
                    }
                }
            }
            ProgressEvent::Failed {
                stage,
                message,
                raw,
            } => {
                // A failure is stale once the entry moved past the failed stage
                let passed = match stage {
                    ResearchStage::Company => self.rank() >= 3,
                    ResearchStage::People => self.rank() >= 5,
                };
                if !passed {
                    self.set_state(ProgressState::Error, None);
                    self.error = Some(message);
                    self.failed_stage = Some(stage);
                    self.raw_response = raw;
                }
            }
            ProgressEvent::Stale { waited } => {
                if self.state == ProgressState::AwaitingCallback {
                    let stage = self.awaiting_stage.unwrap_or(ResearchStage::Company);
                    self.set_state(ProgressState::Error, None);
                    self.failed_stage = Some(stage);
                    self.error = Some(format!(
                        "No {} research result received after {}s",
                        stage,
                        waited.as_secs()
                    ));
                }
            }
        }

        self.updated_at = Utc::now();
        before != (self.state, self.awaiting_stage)
    }
}

/// Shared, lock-protected map of progress entries
#[derive(Clone, Default)]
pub struct ProgressBoard {
    entries: Arc<RwLock<HashMap<Uuid, CompanyProgress>>>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn write<R>(&self, f: impl FnOnce(&mut HashMap<Uuid, CompanyProgress>) -> R) -> R {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        f(&mut entries)
    }

    fn read<R>(&self, f: impl FnOnce(&HashMap<Uuid, CompanyProgress>) -> R) -> R {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        f(&entries)
    }

    fn update<R>(&self, company_id: Uuid, f: impl FnOnce(&mut CompanyProgress) -> R) -> Option<R> {
        self.write(|entries| entries.get_mut(&company_id).map(f))
    }

    /// Add or reset an entry for a new batch. An entry with a call in flight
    /// keeps its attempt; the batch skips it. Returns whether it was reset.
    pub fn enqueue(&self, company_id: Uuid, company_name: &str, website: &str, position: u64) -> bool {
        self.write(|entries| {
            let entry = entries
                .entry(company_id)
                .or_insert_with(|| CompanyProgress::new(company_id, company_name, website));
            entry.position = position;
            if entry.in_flight {
                return false;
            }
            entry.company_name = company_name.to_string();
            entry.domain = normalize_domain(website);
            entry.apply(ProgressEvent::Queued);
            true
        })
    }

    /// Add an entry unless one exists; used when a company is retried outside a batch
    pub fn ensure(&self, entry: CompanyProgress) {
        self.write(|entries| {
            let position = entries.len() as u64;
            entries.entry(entry.company_id).or_insert_with(|| CompanyProgress {
                position,
                ..entry
            });
        });
    }

    /// Notification path: apply without touching the in-flight flag
    pub fn merge(&self, company_id: Uuid, event: ProgressEvent) -> bool {
        self.update(company_id, |entry| entry.apply(event))
            .unwrap_or(false)
    }

    /// Direct path: apply the outcome of our own call and clear in-flight
    pub fn settle(&self, company_id: Uuid, event: ProgressEvent) -> bool {
        self.update(company_id, |entry| {
            let changed = entry.apply(event);
            entry.in_flight = false;
            changed
        })
        .unwrap_or(false)
    }

    /// Start an attempt unless a call for this company is already in flight
    pub fn try_start(&self, company_id: Uuid, event: ProgressEvent) -> bool {
        self.update(company_id, |entry| {
            if entry.in_flight {
                return false;
            }
            entry.apply(event);
            entry.in_flight = true;
            true
        })
        .unwrap_or(false)
    }

    /// Claim the right to trigger stage 2 for this attempt
    pub fn claim_people(&self, company_id: Uuid) -> bool {
        self.update(company_id, |entry| {
            let blocked = entry.people_triggered
                || entry.state.is_terminal()
                || entry.awaiting_stage == Some(ResearchStage::People);
            if blocked {
                return false;
            }
            entry.people_triggered = true;
            true
        })
        .unwrap_or(false)
    }

    /// Give a claim back when stage 2 could not be started
    pub fn release_people(&self, company_id: Uuid) {
        self.update(company_id, |entry| entry.people_triggered = false);
    }

    pub fn get(&self, company_id: Uuid) -> Option<CompanyProgress> {
        self.read(|entries| entries.get(&company_id).cloned())
    }

    pub fn contains(&self, company_id: Uuid) -> bool {
        self.read(|entries| entries.contains_key(&company_id))
    }

    /// All entries in batch order
    pub fn snapshot(&self) -> Vec<CompanyProgress> {
        let mut all: Vec<_> = self.read(|entries| entries.values().cloned().collect());
        all.sort_by_key(|e| e.position);
        all
    }

    pub fn find_by_domain(&self, domain: &str) -> Option<Uuid> {
        let domain = normalize_domain(domain);
        if domain.is_empty() {
            return None;
        }
        self.read(|entries| {
            entries
                .values()
                .find(|e| e.domain == domain)
                .map(|e| e.company_id)
        })
    }

    pub fn find_by_research_id(&self, research_id: Uuid) -> Option<Uuid> {
        self.read(|entries| {
            entries
                .values()
                .find(|e| e.company_research_id == Some(research_id))
                .map(|e| e.company_id)
        })
    }

    /// Entries awaiting a callback for longer than `max_wait`
    pub fn stale_entries(&self, max_wait: Duration) -> Vec<Uuid> {
        let now = Utc::now();
        self.read(|entries| {
            entries
                .values()
                .filter(|e| e.state == ProgressState::AwaitingCallback)
                .filter(|e| {
                    now.signed_duration_since(e.updated_at)
                        .to_std()
                        .map(|age| age >= max_wait)
                        .unwrap_or(false)
                })
                .map(|e| e.company_id)
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prospectforge_common::research::CompanyStatus;

    fn result(status: CompanyStatus) -> CompanyResearchResult {
        CompanyResearchResult {
            company_status: Some(status),
            ..Default::default()
        }
    }

    fn contact(first: &str) -> Contact {
        Contact {
            first_name: first.to_string(),
            last_name: "Doe".to_string(),
            ..Default::default()
        }
    }

    fn board_with(id: Uuid) -> ProgressBoard {
        let board = ProgressBoard::new();
        board.enqueue(id, "Acme", "https://www.acme.com", 0);
        board
    }

    #[test]
    fn test_happy_path_transitions() {
        let id = Uuid::new_v4();
        let board = board_with(id);
        assert_eq!(board.get(id).unwrap().state, ProgressState::Pending);

        assert!(board.try_start(id, ProgressEvent::CompanyStarted));
        assert_eq!(board.get(id).unwrap().state, ProgressState::Company);

        let research_id = Uuid::new_v4();
        board.settle(
            id,
            ProgressEvent::CompanyResearched {
                result: result(CompanyStatus::Operating),
                research_id: Some(research_id),
            },
        );
        let entry = board.get(id).unwrap();
        assert_eq!(entry.state, ProgressState::People);
        assert_eq!(entry.company_research_id, Some(research_id));
        assert!(!entry.in_flight);

        board.try_start(id, ProgressEvent::PeopleStarted);
        board.settle(
            id,
            ProgressEvent::ContactsFound {
                contacts: vec![contact("Ada"), contact("Alan")],
                research_id: None,
            },
        );
        let entry = board.get(id).unwrap();
        assert_eq!(entry.state, ProgressState::Complete);
        assert_eq!(entry.contacts.len(), 2);
        assert_eq!(entry.status_line(), "Found 2 contacts");
    }

    #[test]
    fn test_non_advanceable_result_is_not_qualified() {
        let id = Uuid::new_v4();
        let board = board_with(id);
        board.try_start(id, ProgressEvent::CompanyStarted);
        board.settle(id, ProgressEvent::CompanyAccepted { research_id: None });
        assert_eq!(board.get(id).unwrap().awaiting_stage, Some(ResearchStage::Company));

        board.merge(
            id,
            ProgressEvent::CompanyResearched {
                result: result(CompanyStatus::Bankrupt),
                research_id: Some(Uuid::new_v4()),
            },
        );
        let entry = board.get(id).unwrap();
        assert_eq!(entry.state, ProgressState::NotQualified);
        assert!(entry.company_research.is_some());
        assert!(!board.claim_people(id));
        assert_eq!(entry.status_line(), "Skipped: company is Bankrupt");
    }

    #[test]
    fn test_notifications_never_regress() {
        let id = Uuid::new_v4();
        let board = board_with(id);
        board.try_start(id, ProgressEvent::CompanyStarted);
        board.settle(
            id,
            ProgressEvent::ContactsFound {
                contacts: vec![contact("Ada")],
                research_id: None,
            },
        );

        // Late, duplicate stage-1 result and late stage-2 acknowledgment
        assert!(!board.merge(
            id,
            ProgressEvent::CompanyResearched {
                result: result(CompanyStatus::Operating),
                research_id: Some(Uuid::new_v4()),
            },
        ));
        assert!(!board.merge(id, ProgressEvent::PeopleAccepted));
        assert!(!board.merge(
            id,
            ProgressEvent::Failed {
                stage: ResearchStage::People,
                message: "timeout".into(),
                raw: None,
            },
        ));
        assert_eq!(board.get(id).unwrap().state, ProgressState::Complete);
    }

    #[test]
    fn test_stale_company_failure_after_notification_is_ignored() {
        let id = Uuid::new_v4();
        let board = board_with(id);
        board.try_start(id, ProgressEvent::CompanyStarted);
        board.merge(
            id,
            ProgressEvent::CompanyResearched {
                result: result(CompanyStatus::Operating),
                research_id: Some(Uuid::new_v4()),
            },
        );
        board.settle(
            id,
            ProgressEvent::Failed {
                stage: ResearchStage::Company,
                message: "company webhook timed out".into(),
                raw: None,
            },
        );
        let entry = board.get(id).unwrap();
        assert_eq!(entry.state, ProgressState::People);
        assert!(!entry.in_flight);
    }

    #[test]
    fn test_people_claim_is_exclusive() {
        let id = Uuid::new_v4();
        let board = board_with(id);
        board.merge(
            id,
            ProgressEvent::CompanyResearched {
                result: result(CompanyStatus::Renamed),
                research_id: Some(Uuid::new_v4()),
            },
        );
        assert!(board.claim_people(id));
        assert!(!board.claim_people(id));

        board.release_people(id);
        assert!(board.claim_people(id));
    }

    #[test]
    fn test_try_start_rejects_in_flight() {
        let id = Uuid::new_v4();
        let board = board_with(id);
        assert!(board.try_start(id, ProgressEvent::CompanyStarted));
        assert!(!board.try_start(id, ProgressEvent::CompanyStarted));
        assert!(!board.try_start(Uuid::new_v4(), ProgressEvent::CompanyStarted));
    }

    #[test]
    fn test_contacts_merge_is_idempotent() {
        let id = Uuid::new_v4();
        let board = board_with(id);
        let found = ProgressEvent::ContactsFound {
            contacts: vec![contact("Ada"), contact("Ada")],
            research_id: None,
        };
        board.merge(id, found.clone());
        board.merge(id, found);
        assert_eq!(board.get(id).unwrap().contacts.len(), 1);

        // Empty results never complete an entry
        let other = Uuid::new_v4();
        board.enqueue(other, "Zenith", "zenith.com", 1);
        board.merge(
            other,
            ProgressEvent::ContactsFound {
                contacts: vec![],
                research_id: None,
            },
        );
        assert_eq!(board.get(other).unwrap().state, ProgressState::Pending);
    }

    #[test]
    fn test_lookup_and_staleness() {
        let id = Uuid::new_v4();
        let board = board_with(id);
        assert_eq!(board.find_by_domain("ACME.com"), Some(id));
        assert_eq!(board.find_by_domain(""), None);

        let research_id = Uuid::new_v4();
        board.merge(id, ProgressEvent::CompanyAccepted { research_id: Some(research_id) });
        assert_eq!(board.find_by_research_id(research_id), Some(id));

        assert_eq!(board.stale_entries(Duration::ZERO), vec![id]);
        assert!(board.stale_entries(Duration::from_secs(3600)).is_empty());

        board.merge(id, ProgressEvent::Stale { waited: Duration::from_secs(60) });
        let entry = board.get(id).unwrap();
        assert_eq!(entry.state, ProgressState::Error);
        assert!(entry.error.unwrap().contains("company"));
    }

    #[test]
    fn test_error_recovers_through_notification() {
        let id = Uuid::new_v4();
        let board = board_with(id);
        board.try_start(id, ProgressEvent::CompanyStarted);
        board.settle(
            id,
            ProgressEvent::Failed {
                stage: ResearchStage::Company,
                message: "connection reset".into(),
                raw: None,
            },
        );
        assert_eq!(board.get(id).unwrap().state, ProgressState::Error);

        board.merge(
            id,
            ProgressEvent::CompanyResearched {
                result: result(CompanyStatus::Operating),
                research_id: Some(Uuid::new_v4()),
            },
        );
        let entry = board.get(id).unwrap();
        assert_eq!(entry.state, ProgressState::People);
        assert!(entry.error.is_none());
        assert_eq!(entry.failed_stage, None);
    }

    #[test]
    fn test_people_error_survives_duplicate_company_result() {
        let id = Uuid::new_v4();
        let board = board_with(id);
        let research_id = Uuid::new_v4();
        board.try_start(id, ProgressEvent::CompanyStarted);
        board.settle(
            id,
            ProgressEvent::CompanyResearched {
                result: result(CompanyStatus::Operating),
                research_id: Some(research_id),
            },
        );
        assert!(board.claim_people(id));
        board.try_start(id, ProgressEvent::PeopleStarted);
        board.settle(
            id,
            ProgressEvent::Failed {
                stage: ResearchStage::People,
                message: "people webhook failed: HTTP 502".into(),
                raw: None,
            },
        );

        assert!(!board.merge(
            id,
            ProgressEvent::CompanyResearched {
                result: result(CompanyStatus::Operating),
                research_id: Some(research_id),
            },
        ));
        let entry = board.get(id).unwrap();
        assert_eq!(entry.state, ProgressState::Error);
        assert_eq!(entry.failed_stage, Some(ResearchStage::People));
        assert_eq!(entry.error.as_deref(), Some("people webhook failed: HTTP 502"));
        assert_eq!(entry.company_research_id, Some(research_id));
        assert!(entry.company_research.is_some());

        // An explicit retry still restarts stage 2
        assert!(board.try_start(id, ProgressEvent::PeopleStarted));
        let entry = board.get(id).unwrap();
        assert_eq!(entry.state, ProgressState::People);
        assert!(entry.error.is_none());
    }

    #[test]
    fn test_enqueue_keeps_in_flight_attempt() {
        let id = Uuid::new_v4();
        let board = board_with(id);
        assert!(board.try_start(id, ProgressEvent::CompanyStarted));

        assert!(!board.enqueue(id, "Acme", "acme.com", 3));
        let entry = board.get(id).unwrap();
        assert!(entry.in_flight);
        assert_eq!(entry.state, ProgressState::Company);
        assert_eq!(entry.position, 3);
        assert!(!board.try_start(id, ProgressEvent::CompanyStarted));

        board.settle(id, ProgressEvent::CompanyAccepted { research_id: None });
        assert!(board.enqueue(id, "Acme", "acme.com", 0));
        assert_eq!(board.get(id).unwrap().state, ProgressState::Pending);
    }
}
