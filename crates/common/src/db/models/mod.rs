//! SeaORM entity models
//!
//! Database entities for ProspectForge

mod user_account;
mod campaign;
mod company;
mod company_research;
mod prospect_research;

pub use user_account::{
    Entity as UserAccountEntity,
    Model as UserAccount,
    ActiveModel as UserAccountActiveModel,
    Column as UserAccountColumn,
};

pub use campaign::{
    Entity as CampaignEntity,
    Model as Campaign,
    ActiveModel as CampaignActiveModel,
    Column as CampaignColumn,
};

pub use company::{
    Entity as CompanyEntity,
    Model as Company,
    ActiveModel as CompanyActiveModel,
    Column as CompanyColumn,
};

pub use company_research::{
    Entity as CompanyResearchEntity,
    Model as CompanyResearch,
    ActiveModel as CompanyResearchActiveModel,
    Column as CompanyResearchColumn,
};

pub use prospect_research::{
    Entity as ProspectResearchEntity,
    Model as ProspectResearch,
    ActiveModel as ProspectResearchActiveModel,
    Column as ProspectResearchColumn,
};
