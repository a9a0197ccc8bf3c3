//! Webhook request builders

use prospectforge_common::db::models::{Campaign, Company};
use prospectforge_common::research::{normalize_domain, split_list, CompanyResearchResult};
use prospectforge_common::webhook::{
    CampaignPayload, CompanyPayload, CompanyResearchRequest, ProspectResearchRequest,
};
use serde_json::Value;
use uuid::Uuid;

fn text(field: &Option<String>) -> String {
    field.as_deref().map(str::trim).unwrap_or_default().to_string()
}

fn list(field: &Option<String>) -> Vec<String> {
    field.as_deref().map(split_list).unwrap_or_default()
}

pub fn campaign_payload(campaign: &Campaign) -> CampaignPayload {
    CampaignPayload {
        campaign_name: campaign.name.trim().to_string(),
        product: campaign.product.trim().to_string(),
        product_category: text(&campaign.product_category),
        primary_angle: text(&campaign.primary_angle),
        secondary_angle: text(&campaign.secondary_angle),
        target_region: text(&campaign.target_region),
        pain_points: list(&campaign.pain_points),
        target_personas: list(&campaign.target_personas),
        target_titles: list(&campaign.target_titles),
        target_verticals: list(&campaign.target_verticals),
        tech_focus: text(&campaign.tech_focus),
    }
}

/// Stage-1 request for one company
pub fn company_request(user_id: Uuid, campaign: &Campaign, company: &Company) -> CompanyResearchRequest {
    let domain = normalize_domain(&company.website);
    CompanyResearchRequest {
        user_id,
        company_domain: domain.clone(),
        campaign: campaign_payload(campaign),
        company: CompanyPayload {
            name: company.name.trim().to_string(),
            website: domain,
            linkedin: text(&company.linkedin_url),
        },
    }
}

/// Stage-2 request: stage-1 body plus the stage-1 outcome.
///
/// `raw` is the parsed job output when we have it; otherwise the structured
/// result is sent.
pub fn prospect_request(
    base: CompanyResearchRequest,
    company_research_id: Uuid,
    result: Option<&CompanyResearchResult>,
    raw: Option<Value>,
) -> ProspectResearchRequest {
    let company_research = match raw {
        Some(value) if !value.is_null() => value,
        _ => result
            .and_then(|r| serde_json::to_value(r).ok())
            .unwrap_or(Value::Null),
    };

    ProspectResearchRequest {
        base,
        company_research_id,
        company_research,
        qualify: true,
    }
}
