//! Campaign entity
//!
//! Targeting configuration for a research batch. The list-valued fields are
//! stored as the free text the user typed (one entry per line or comma).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "campaigns")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub user_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub name: String,

    #[sea_orm(column_type = "Text")]
    pub product: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub product_category: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub primary_angle: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub secondary_angle: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub target_region: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub pain_points: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub target_personas: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub target_titles: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub target_verticals: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub tech_focus: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
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

    #[sea_orm(has_many = "super::company::Entity")]
    Companies,
}

impl Related<super::user_account::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UserAccount.def()
    }
}

impl Related<super::company::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Companies.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
