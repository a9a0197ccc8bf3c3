//! Company research entity
//!
//! One stage-1 research attempt for a (user, company domain) pair. The most
//! recent row for a pair is authoritative.

use crate::research::{CloudPreference, CompanyResearchResult, CompanyStatus, ResearchStatus};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "company_research")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,

    pub campaign_id: Option<Uuid>,

    #[sea_orm(column_type = "Text")]
    pub company_domain: String,

    /// processing | completed | failed
    #[sea_orm(column_type = "Text")]
    pub status: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub company_status: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub acquired_by: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub effective_date: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub cloud_provider: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub cloud_confidence: Option<String>,

    #[sea_orm(column_type = "JsonBinary")]
    pub cloud_evidence_urls: serde_json::Value,

    /// Parsed job output as received
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub raw_result: Option<serde_json::Value>,

    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn research_status(&self) -> ResearchStatus {
        ResearchStatus::from(self.status.as_str())
    }

    pub fn parsed_company_status(&self) -> Option<CompanyStatus> {
        self.company_status.as_deref().and_then(CompanyStatus::parse)
    }

    pub fn is_completed(&self) -> bool {
        self.research_status() == ResearchStatus::Completed
    }

    /// Rebuild the structured stage-1 result from the stored columns
    pub fn result(&self) -> CompanyResearchResult {
        let evidence_urls = self
            .cloud_evidence_urls
            .as_array()
            .map(|urls| {
                urls.iter()
                    .filter_map(|u| u.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        let cloud_preference = if self.cloud_provider.is_some() || self.cloud_confidence.is_some() {
            Some(CloudPreference {
                provider: self.cloud_provider.clone(),
                confidence: self.cloud_confidence.clone(),
                evidence_urls,
            })
        } else {
            None
        };

        CompanyResearchResult {
            status: Some(self.status.clone()),
            company_status: self.parsed_company_status(),
            acquired_by: self.acquired_by.clone(),
            effective_date: self.effective_date.clone(),
            cloud_preference,
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user_account::Entity",
        from = "Column::UserId",
        to = "super::user_account::Column::Id",
        on_delete = "Cascade"
    )]
    UserAccount,

    #[sea_orm(has_many = "super::prospect_research::Entity")]
    Prospects,
}

impl Related<super::user_account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserAccount.def()
    }
}

impl Related<super::prospect_research::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Prospects.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
