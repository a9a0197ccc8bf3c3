//! In-process research store
//!
//! Keeps every table in memory and publishes the same row events the
//! Postgres notify triggers would. Used for local runs without a database
//! and throughout the test suites.

use super::models::{Campaign, Company, CompanyResearch, ProspectResearch, UserAccount};
use super::{
    decide_company_write, CompanyResearchInput, EnrichmentUpdate, ProspectInput, RecordOutcome,
    ResearchStore, WriteDecision,
};
use crate::errors::{AppError, Result};
use crate::events::{EventBus, ResearchEvent, RowOp};
use crate::research::{normalize_domain, ProspectStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, UserAccount>,
    campaigns: HashMap<Uuid, Campaign>,
    /// Insertion order is kept so listings are stable
    companies: Vec<Company>,
    company_research: Vec<CompanyResearch>,
    prospects: Vec<ProspectResearch>,
}

/// In-memory [`ResearchStore`]
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    bus: Option<EventBus>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that publishes row events on `bus`
    pub fn with_events(bus: EventBus) -> Self {
        Self {
            tables: RwLock::default(),
            bus: Some(bus),
        }
    }

    fn publish(&self, event: ResearchEvent) {
        if let Some(ref bus) = self.bus {
            bus.publish(event);
        }
    }

    pub async fn insert_user(&self, email: &str) -> UserAccount {
        let user = UserAccount {
            id: Uuid::new_v4(),
            email: email.to_string(),
            created_at: Utc::now().into(),
        };
        self.tables.write().await.users.insert(user.id, user.clone());
        user
    }

    pub async fn insert_campaign(&self, campaign: Campaign) -> Campaign {
        self.tables
            .write()
            .await
            .campaigns
            .insert(campaign.id, campaign.clone());
        campaign
    }

    pub async fn insert_company(&self, company: Company) -> Company {
        self.tables.write().await.companies.push(company.clone());
        company
    }

    /// Write a research row without the dedup rule, as an external job would
    pub async fn insert_company_research(&self, record: CompanyResearch) -> CompanyResearch {
        self.tables
            .write()
            .await
            .company_research
            .push(record.clone());
        self.publish(ResearchEvent::CompanyResearch {
            op: RowOp::Insert,
            record: record.clone(),
        });
        record
    }

    pub async fn prospect_count(&self) -> usize {
        self.tables.read().await.prospects.len()
    }

    pub async fn company_research_count(&self) -> usize {
        self.tables.read().await.company_research.len()
    }
}

fn latest_for<'a>(
    rows: &'a [CompanyResearch],
    user_id: Uuid,
    domain: &str,
) -> Option<&'a CompanyResearch> {
    // Ties on created_at resolve to the later insert
    rows.iter()
        .filter(|r| r.user_id == user_id && r.company_domain == domain)
        .fold(None, |best: Option<&CompanyResearch>, r| match best {
            Some(b) if b.created_at > r.created_at => Some(b),
            _ => Some(r),
        })
}

fn apply_input(record: &mut CompanyResearch, input: &CompanyResearchInput, now: DateTime<Utc>) {
    record.status = input.status.as_str().to_string();
    record.campaign_id = input.campaign_id.or(record.campaign_id);
    record.error_message = input.error_message.clone();
    record.raw_result = input.raw_result.clone().or(record.raw_result.take());
    if let Some(ref result) = input.result {
        record.company_status = result.company_status.map(|s| s.as_str().to_string());
        record.acquired_by = result.acquired_by.clone();
        record.effective_date = result.effective_date.clone();
        let cloud = result.cloud_preference.clone().unwrap_or_default();
        record.cloud_provider = cloud.provider;
        record.cloud_confidence = cloud.confidence;
        record.cloud_evidence_urls = serde_json::json!(cloud.evidence_urls);
    }
    record.updated_at = now.into();
}

fn new_record(input: &CompanyResearchInput, now: DateTime<Utc>) -> CompanyResearch {
    let mut record = CompanyResearch {
        id: Uuid::new_v4(),
        user_id: input.user_id,
        campaign_id: input.campaign_id,
        company_domain: input.company_domain.clone(),
        status: String::new(),
        company_status: None,
        acquired_by: None,
        effective_date: None,
        cloud_provider: None,
        cloud_confidence: None,
        cloud_evidence_urls: serde_json::json!([]),
        raw_result: None,
        error_message: None,
        created_at: now.into(),
        updated_at: now.into(),
    };
    apply_input(&mut record, input, now);
    record
}

#[async_trait]
impl ResearchStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn user_exists(&self, user_id: Uuid) -> Result<bool> {
        Ok(self.tables.read().await.users.contains_key(&user_id))
    }

    async fn find_campaign(&self, user_id: Uuid, campaign_id: Uuid) -> Result<Option<Campaign>> {
        Ok(self
            .tables
            .read()
            .await
            .campaigns
            .get(&campaign_id)
            .filter(|c| c.user_id == user_id)
            .cloned())
    }

    async fn list_companies(&self, user_id: Uuid, campaign_id: Uuid) -> Result<Vec<Company>> {
        Ok(self
            .tables
            .read()
            .await
            .companies
            .iter()
            .filter(|c| c.user_id == user_id && c.campaign_id == campaign_id)
            .cloned()
            .collect())
    }

    async fn find_company(&self, user_id: Uuid, company_id: Uuid) -> Result<Option<Company>> {
        Ok(self
            .tables
            .read()
            .await
            .companies
            .iter()
            .find(|c| c.id == company_id && c.user_id == user_id)
            .cloned())
    }

    async fn find_company_by_domain(&self, user_id: Uuid, domain: &str) -> Result<Option<Company>> {
        let domain = normalize_domain(domain);
        Ok(self
            .tables
            .read()
            .await
            .companies
            .iter()
            .find(|c| c.user_id == user_id && c.domain() == domain)
            .cloned())
    }

    async fn record_company_research(
        &self,
        input: CompanyResearchInput,
        dedupe_window: Duration,
    ) -> Result<RecordOutcome> {
        let now = Utc::now();
        let mut tables = self.tables.write().await;

        let latest = latest_for(&tables.company_research, input.user_id, &input.company_domain);
        let outcome = match decide_company_write(latest, &input, now, dedupe_window) {
            WriteDecision::Reuse(id) => {
                let record = tables
                    .company_research
                    .iter()
                    .find(|r| r.id == id)
                    .cloned()
                    .ok_or_else(|| AppError::ResearchNotFound { id: id.to_string() })?;
                return Ok(RecordOutcome::Reused(record));
            }
            WriteDecision::UpdateInPlace(id) => {
                let record = tables
                    .company_research
                    .iter_mut()
                    .find(|r| r.id == id)
                    .ok_or_else(|| AppError::ResearchNotFound { id: id.to_string() })?;
                apply_input(record, &input, now);
                RecordOutcome::Updated(record.clone())
            }
            WriteDecision::Insert => {
                let record = new_record(&input, now);
                tables.company_research.push(record.clone());
                RecordOutcome::Inserted(record)
            }
        };
        drop(tables);

        let op = match outcome {
            RecordOutcome::Inserted(_) => RowOp::Insert,
            _ => RowOp::Update,
        };
        self.publish(ResearchEvent::CompanyResearch {
            op,
            record: outcome.record().clone(),
        });
        Ok(outcome)
    }

    async fn find_company_research(&self, id: Uuid) -> Result<Option<CompanyResearch>> {
        Ok(self
            .tables
            .read()
            .await
            .company_research
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn latest_company_research(
        &self,
        user_id: Uuid,
        domain: &str,
    ) -> Result<Option<CompanyResearch>> {
        let tables = self.tables.read().await;
        Ok(latest_for(&tables.company_research, user_id, domain).cloned())
    }

    async fn insert_prospect(&self, input: ProspectInput) -> Result<ProspectResearch> {
        let now = Utc::now();
        let mut tables = self.tables.write().await;

        if !tables
            .company_research
            .iter()
            .any(|r| r.id == input.company_research_id)
        {
            return Err(AppError::ResearchNotFound {
                id: input.company_research_id.to_string(),
            });
        }

        let contact = input.contact;
        let record = ProspectResearch {
            id: Uuid::new_v4(),
            user_id: input.user_id,
            company_research_id: input.company_research_id,
            campaign_id: input.campaign_id,
            account_id: input.account_id,
            first_name: contact.first_name,
            last_name: contact.last_name,
            job_title: contact.job_title,
            linkedin_url: contact.linkedin,
            priority: contact.priority.map(|p| p.as_str().to_string()),
            priority_reason: contact.priority_reason,
            pitch_type: contact.pitch_type,
            email: None,
            phone: None,
            status: ProspectStatus::Pending.as_str().to_string(),
            sent_to_clay: false,
            sent_to_clay_at: None,
            tracking_id: Uuid::new_v4(),
            created_at: now.into(),
            updated_at: now.into(),
        };
        tables.prospects.push(record.clone());
        drop(tables);

        self.publish(ResearchEvent::ProspectInserted {
            record: record.clone(),
        });
        Ok(record)
    }

    async fn list_prospects(&self, company_research_id: Uuid) -> Result<Vec<ProspectResearch>> {
        Ok(self
            .tables
            .read()
            .await
            .prospects
            .iter()
            .filter(|p| p.company_research_id == company_research_id)
            .cloned()
            .collect())
    }

    async fn find_prospects(&self, user_id: Uuid, ids: &[Uuid]) -> Result<Vec<ProspectResearch>> {
        Ok(self
            .tables
            .read()
            .await
            .prospects
            .iter()
            .filter(|p| p.user_id == user_id && ids.contains(&p.id))
            .cloned()
            .collect())
    }

    async fn mark_prospect_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<ProspectResearch> {
        let mut tables = self.tables.write().await;
        let prospect = tables
            .prospects
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| AppError::ProspectNotFound { id: id.to_string() })?;

        prospect.sent_to_clay = true;
        prospect.sent_to_clay_at = Some(at.into());
        prospect.status = ProspectStatus::SentToClay.as_str().to_string();
        prospect.updated_at = at.into();
        Ok(prospect.clone())
    }

    async fn apply_enrichment(
        &self,
        tracking_id: Uuid,
        update: EnrichmentUpdate,
    ) -> Result<Option<ProspectResearch>> {
        let mut tables = self.tables.write().await;
        let Some(prospect) = tables.prospects.iter_mut().find(|p| p.tracking_id == tracking_id) else {
            return Ok(None);
        };

        prospect.status = update.status.as_str().to_string();
        prospect.email = update.email.or(prospect.email.take());
        prospect.phone = update.phone.or(prospect.phone.take());
        prospect.account_id = update.account_id.or(prospect.account_id.take());
        prospect.updated_at = Utc::now().into();
        Ok(Some(prospect.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::{CompanyResearchResult, CompanyStatus, Contact};
    use tokio_test::assert_ok;

    fn operating(user_id: Uuid) -> CompanyResearchInput {
        CompanyResearchInput::completed(
            user_id,
            None,
            "acme.com",
            CompanyResearchResult {
                company_status: Some(CompanyStatus::Operating),
                ..Default::default()
            },
            serde_json::json!({ "company_status": "Operating" }),
        )
    }

    #[tokio::test]
    async fn test_duplicate_callback_reuses_record() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let store = MemoryStore::with_events(bus);
        let user = store.insert_user("ada@example.com").await;

        let window = Duration::from_secs(900);
        let first = store.record_company_research(operating(user.id), window).await.unwrap();
        let second = store.record_company_research(operating(user.id), window).await.unwrap();

        assert_eq!(first.action(), "inserted");
        assert_eq!(second.action(), "reused");
        assert_eq!(first.record().id, second.record().id);
        assert_eq!(store.company_research_count().await, 1);

        // Only the insert was announced
        assert!(matches!(
            rx.try_recv(),
            Ok(ResearchEvent::CompanyResearch { op: RowOp::Insert, .. })
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_processing_row_is_completed() {
        let store = MemoryStore::new();
        let user = store.insert_user("ada@example.com").await;
        let window = Duration::from_secs(900);

        let mut pending = operating(user.id);
        pending.status = crate::research::ResearchStatus::Processing;
        pending.result = None;
        let processing = assert_ok!(store.record_company_research(pending, window).await);

        let done = assert_ok!(store.record_company_research(operating(user.id), window).await);
        assert_eq!(done.action(), "updated");
        assert_eq!(done.record().id, processing.record().id);
        assert!(done.record().is_completed());
        assert_eq!(done.record().company_status.as_deref(), Some("Operating"));
    }

    #[tokio::test]
    async fn test_prospect_lifecycle() {
        let store = MemoryStore::new();
        let user = store.insert_user("ada@example.com").await;
        let research = store
            .record_company_research(operating(user.id), Duration::from_secs(900))
            .await
            .unwrap()
            .into_record();

        let prospect = store
            .insert_prospect(ProspectInput {
                user_id: user.id,
                company_research_id: research.id,
                campaign_id: None,
                account_id: None,
                contact: Contact {
                    first_name: "Ada".into(),
                    last_name: "Lovelace".into(),
                    ..Default::default()
                },
            })
            .await
            .unwrap();
        assert_eq!(prospect.prospect_status(), ProspectStatus::Pending);

        let sent = store.mark_prospect_sent(prospect.id, Utc::now()).await.unwrap();
        assert!(sent.sent_to_clay);

        let enriched = store
            .apply_enrichment(
                prospect.tracking_id,
                EnrichmentUpdate {
                    status: ProspectStatus::Inputted,
                    email: Some("ada@acme.com".into()),
                    phone: None,
                    account_id: Some("acct-1".into()),
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(enriched.prospect_status(), ProspectStatus::Inputted);
        assert_eq!(enriched.email.as_deref(), Some("ada@acme.com"));

        let unknown = store
            .apply_enrichment(
                Uuid::new_v4(),
                EnrichmentUpdate {
                    status: ProspectStatus::Fail,
                    email: None,
                    phone: None,
                    account_id: None,
                },
            )
            .await
            .unwrap();
        assert!(unknown.is_none());
    }

    #[tokio::test]
    async fn test_prospect_requires_research_row() {
        let store = MemoryStore::new();
        let err = store
            .insert_prospect(ProspectInput {
                user_id: Uuid::new_v4(),
                company_research_id: Uuid::new_v4(),
                campaign_id: None,
                account_id: None,
                contact: Contact::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ResearchNotFound { .. }));
    }

    #[tokio::test]
    async fn test_notification_resolves_to_event() {
        let store = MemoryStore::new();
        let user = store.insert_user("ada@example.com").await;
        let research = store
            .record_company_research(operating(user.id), Duration::from_secs(900))
            .await
            .unwrap()
            .into_record();

        let payload = crate::events::NotifyPayload {
            table: "company_research".into(),
            op: RowOp::Update,
            id: research.id,
            user_id: user.id,
        };
        let event = crate::events::resolve_notification(&store, &payload)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.user_id(), user.id);
        assert!(matches!(event, ResearchEvent::CompanyResearch { op: RowOp::Update, .. }));
    }
}
