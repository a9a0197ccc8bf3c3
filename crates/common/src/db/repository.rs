//! Repository pattern for database operations
//!
//! Postgres implementation of [`ResearchStore`] over SeaORM. Realtime events
//! are not published here; the notify triggers installed by the migrations
//! announce every write and the listener bridge re-reads the rows.

use crate::db::models::*;
use crate::db::{
    decide_company_write, CompanyResearchInput, DbPool, EnrichmentUpdate, ProspectInput,
    RecordOutcome, ResearchStore, WriteDecision,
};
use crate::errors::{AppError, Result};
use crate::research::{normalize_domain, ProspectStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::time::Duration;
use uuid::Uuid;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    /// Underlying pool, for the realtime listener
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn latest_for_update(
        txn: &DatabaseTransaction,
        user_id: Uuid,
        domain: &str,
    ) -> Result<Option<CompanyResearch>> {
        CompanyResearchEntity::find()
            .filter(CompanyResearchColumn::UserId.eq(user_id))
            .filter(CompanyResearchColumn::CompanyDomain.eq(domain))
            .order_by_desc(CompanyResearchColumn::CreatedAt)
            .lock_exclusive()
            .one(txn)
            .await
            .map_err(Into::into)
    }
}

fn fill_active_model(
    model: &mut CompanyResearchActiveModel,
    input: &CompanyResearchInput,
    now: DateTime<Utc>,
) {
    model.status = Set(input.status.as_str().to_string());
    if input.campaign_id.is_some() {
        model.campaign_id = Set(input.campaign_id);
    }
    model.error_message = Set(input.error_message.clone());
    if input.raw_result.is_some() {
        model.raw_result = Set(input.raw_result.clone());
    }
    if let Some(ref result) = input.result {
        let cloud = result.cloud_preference.clone().unwrap_or_default();
        model.company_status = Set(result.company_status.map(|s| s.as_str().to_string()));
        model.acquired_by = Set(result.acquired_by.clone());
        model.effective_date = Set(result.effective_date.clone());
        model.cloud_provider = Set(cloud.provider);
        model.cloud_confidence = Set(cloud.confidence);
        model.cloud_evidence_urls = Set(serde_json::json!(cloud.evidence_urls));
    }
    model.updated_at = Set(now.into());
}

#[async_trait]
impl ResearchStore for Repository {
    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    async fn user_exists(&self, user_id: Uuid) -> Result<bool> {
        let user = UserAccountEntity::find_by_id(user_id)
            .one(self.read_conn())
            .await?;
        Ok(user.is_some())
    }

    async fn find_campaign(&self, user_id: Uuid, campaign_id: Uuid) -> Result<Option<Campaign>> {
        CampaignEntity::find_by_id(campaign_id)
            .filter(CampaignColumn::UserId.eq(user_id))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_companies(&self, user_id: Uuid, campaign_id: Uuid) -> Result<Vec<Company>> {
        CompanyEntity::find()
            .filter(CompanyColumn::UserId.eq(user_id))
            .filter(CompanyColumn::CampaignId.eq(campaign_id))
            .order_by_asc(CompanyColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_company(&self, user_id: Uuid, company_id: Uuid) -> Result<Option<Company>> {
        CompanyEntity::find_by_id(company_id)
            .filter(CompanyColumn::UserId.eq(user_id))
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_company_by_domain(&self, user_id: Uuid, domain: &str) -> Result<Option<Company>> {
        let domain = normalize_domain(domain);
        if domain.is_empty() {
            return Ok(None);
        }

        // Websites are stored as typed; narrow in SQL, compare normalized
        let candidates = CompanyEntity::find()
            .filter(CompanyColumn::UserId.eq(user_id))
            .filter(CompanyColumn::Website.contains(domain.as_str()))
            .order_by_desc(CompanyColumn::CreatedAt)
            .all(self.read_conn())
            .await?;

        Ok(candidates.into_iter().find(|c| c.domain() == domain))
    }

    async fn record_company_research(
        &self,
        input: CompanyResearchInput,
        dedupe_window: Duration,
    ) -> Result<RecordOutcome> {
        let now = Utc::now();
        let txn = self.write_conn().begin().await?;

        let latest = Self::latest_for_update(&txn, input.user_id, &input.company_domain).await?;
        let decision = decide_company_write(latest.as_ref(), &input, now, dedupe_window);

        let outcome = match (decision, latest) {
            (WriteDecision::Reuse(_), Some(record)) => RecordOutcome::Reused(record),
            (WriteDecision::UpdateInPlace(_), Some(record)) => {
                let mut model: CompanyResearchActiveModel = record.into();
                fill_active_model(&mut model, &input, now);
                RecordOutcome::Updated(model.update(&txn).await?)
            }
            _ => {
                let mut model = CompanyResearchActiveModel {
                    id: Set(Uuid::new_v4()),
                    user_id: Set(input.user_id),
                    campaign_id: Set(input.campaign_id),
                    company_domain: Set(input.company_domain.clone()),
                    status: Set(input.status.as_str().to_string()),
                    company_status: Set(None),
                    acquired_by: Set(None),
                    effective_date: Set(None),
                    cloud_provider: Set(None),
                    cloud_confidence: Set(None),
                    cloud_evidence_urls: Set(serde_json::json!([])),
                    raw_result: Set(None),
                    error_message: Set(None),
                    created_at: Set(now.into()),
                    updated_at: Set(now.into()),
                };
                fill_active_model(&mut model, &input, now);
                RecordOutcome::Inserted(model.insert(&txn).await?)
            }
        };

        txn.commit().await?;
        Ok(outcome)
    }

    async fn find_company_research(&self, id: Uuid) -> Result<Option<CompanyResearch>> {
        CompanyResearchEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn latest_company_research(
        &self,
        user_id: Uuid,
        domain: &str,
    ) -> Result<Option<CompanyResearch>> {
        CompanyResearchEntity::find()
            .filter(CompanyResearchColumn::UserId.eq(user_id))
            .filter(CompanyResearchColumn::CompanyDomain.eq(domain))
            .order_by_desc(CompanyResearchColumn::CreatedAt)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn insert_prospect(&self, input: ProspectInput) -> Result<ProspectResearch> {
        let now = Utc::now();
        let contact = input.contact;

        let prospect = ProspectResearchActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(input.user_id),
            company_research_id: Set(input.company_research_id),
            campaign_id: Set(input.campaign_id),
            account_id: Set(input.account_id),
            first_name: Set(contact.first_name),
            last_name: Set(contact.last_name),
            job_title: Set(contact.job_title),
            linkedin_url: Set(contact.linkedin),
            priority: Set(contact.priority.map(|p| p.as_str().to_string())),
            priority_reason: Set(contact.priority_reason),
            pitch_type: Set(contact.pitch_type),
            email: Set(None),
            phone: Set(None),
            status: Set(ProspectStatus::Pending.as_str().to_string()),
            sent_to_clay: Set(false),
            sent_to_clay_at: Set(None),
            tracking_id: Set(Uuid::new_v4()),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        prospect.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn list_prospects(&self, company_research_id: Uuid) -> Result<Vec<ProspectResearch>> {
        ProspectResearchEntity::find()
            .filter(ProspectResearchColumn::CompanyResearchId.eq(company_research_id))
            .order_by_asc(ProspectResearchColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_prospects(&self, user_id: Uuid, ids: &[Uuid]) -> Result<Vec<ProspectResearch>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        ProspectResearchEntity::find()
            .filter(ProspectResearchColumn::UserId.eq(user_id))
            .filter(ProspectResearchColumn::Id.is_in(ids.iter().copied()))
            .order_by_asc(ProspectResearchColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn mark_prospect_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<ProspectResearch> {
        let mut prospect: ProspectResearchActiveModel = ProspectResearchEntity::find_by_id(id)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::ProspectNotFound { id: id.to_string() })?
            .into();

        prospect.sent_to_clay = Set(true);
        prospect.sent_to_clay_at = Set(Some(at.into()));
        prospect.status = Set(ProspectStatus::SentToClay.as_str().to_string());
        prospect.updated_at = Set(at.into());

        prospect.update(self.write_conn()).await.map_err(Into::into)
    }

    async fn apply_enrichment(
        &self,
        tracking_id: Uuid,
        update: EnrichmentUpdate,
    ) -> Result<Option<ProspectResearch>> {
        let Some(existing) = ProspectResearchEntity::find()
            .filter(ProspectResearchColumn::TrackingId.eq(tracking_id))
            .one(self.write_conn())
            .await?
        else {
            return Ok(None);
        };

        let mut prospect: ProspectResearchActiveModel = existing.into();
        prospect.status = Set(update.status.as_str().to_string());
        if update.email.is_some() {
            prospect.email = Set(update.email);
        }
        if update.phone.is_some() {
            prospect.phone = Set(update.phone);
        }
        if update.account_id.is_some() {
            prospect.account_id = Set(update.account_id);
        }
        prospect.updated_at = Set(Utc::now().into());

        Ok(Some(prospect.update(self.write_conn()).await?))
    }
}
