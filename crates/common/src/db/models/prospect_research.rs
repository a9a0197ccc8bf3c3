//! Prospect research entity
//!
//! One discovered contact. Rows are not unique per person; readers
//! deduplicate by name and LinkedIn URL.

use crate::research::{Contact, Priority, ProspectStatus};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "prospect_research")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,

    pub company_research_id: Uuid,

    pub campaign_id: Option<Uuid>,

    #[sea_orm(column_type = "Text", nullable)]
    pub account_id: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub first_name: String,

    #[sea_orm(column_type = "Text")]
    pub last_name: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub job_title: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub linkedin_url: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub priority: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub priority_reason: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub pitch_type: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub email: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub phone: Option<String>,

    /// pending | sent_to_clay | inputted | duplicate | fail
    #[sea_orm(column_type = "Text")]
    pub status: String,

    pub sent_to_clay: bool,

    pub sent_to_clay_at: Option<DateTimeWithTimeZone>,

    /// Correlates enrichment callbacks with this row
    pub tracking_id: Uuid,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn prospect_status(&self) -> ProspectStatus {
        ProspectStatus::parse(&self.status).unwrap_or(ProspectStatus::Pending)
    }

    pub fn contact(&self) -> Contact {
        Contact {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            job_title: self.job_title.clone(),
            pitch_type: self.pitch_type.clone(),
            linkedin: self.linkedin_url.clone(),
            priority: self.priority.as_deref().and_then(Priority::parse),
            priority_reason: self.priority_reason.clone(),
        }
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::company_research::Entity",
        from = "Column::CompanyResearchId",
        to = "super::company_research::Column::Id",
        on_delete = "Cascade"
    )]
    CompanyResearch,
}

impl Related<super::company_research::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CompanyResearch.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
