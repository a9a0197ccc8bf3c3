//! Research domain types
//!
//! Typed views of what the external research jobs send back:
//! - Stage-1 company research results (operating status, cloud preference)
//! - Stage-2 contacts
//! - Lifecycle enums shared by the store and the orchestrator

mod contacts;
mod domain;
pub mod parse;
mod reply;

pub use contacts::{contact_key, dedupe_contacts, merge_contacts, prospect_fingerprint};
pub use domain::{normalize_domain, split_list, validate_company_domain, MAX_DOMAIN_LEN};
pub use parse::{parse_research_payload, parse_research_text, ParseError, PayloadShape, StructuredPayload};
pub use reply::{classify_company_reply, classify_prospect_reply, CompanyReply, ProspectReply};

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// The two research stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStage {
    /// Stage 1: company status and cloud preference
    Company,
    /// Stage 2: decision-maker discovery
    People,
}

impl ResearchStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchStage::Company => "company",
            ResearchStage::People => "people",
        }
    }
}

impl fmt::Display for ResearchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a company research record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchStatus {
    Processing,
    Completed,
    Failed,
}

impl From<&str> for ResearchStatus {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "completed" | "complete" | "success" | "succeeded" | "done" => ResearchStatus::Completed,
            "failed" | "failure" | "error" => ResearchStatus::Failed,
            _ => ResearchStatus::Processing,
        }
    }
}

impl From<ResearchStatus> for String {
    fn from(status: ResearchStatus) -> Self {
        status.as_str().to_string()
    }
}

impl ResearchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResearchStatus::Processing => "processing",
            ResearchStatus::Completed => "completed",
            ResearchStatus::Failed => "failed",
        }
    }
}

/// Operating status concluded by company research
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompanyStatus {
    Operating,
    /// Acquired but still operating independently
    Acquired,
    Renamed,
    Bankrupt,
    #[serde(rename = "Not_Found")]
    NotFound,
}

impl CompanyStatus {
    /// Lenient parse of the status strings the AI jobs produce
    pub fn parse(value: &str) -> Option<Self> {
        let normalized: String = value
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();

        match normalized.as_str() {
            "operating" | "active" => Some(CompanyStatus::Operating),
            "acquired" | "acquired_with_independent_operation" | "acquired_independent" => {
                Some(CompanyStatus::Acquired)
            }
            "renamed" | "rebranded" => Some(CompanyStatus::Renamed),
            "bankrupt" | "defunct" => Some(CompanyStatus::Bankrupt),
            "not_found" | "notfound" => Some(CompanyStatus::NotFound),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompanyStatus::Operating => "Operating",
            CompanyStatus::Acquired => "Acquired",
            CompanyStatus::Renamed => "Renamed",
            CompanyStatus::Bankrupt => "Bankrupt",
            CompanyStatus::NotFound => "Not_Found",
        }
    }

    /// Whether this outcome qualifies the company for prospect research
    pub fn is_advanceable(&self) -> bool {
        matches!(
            self,
            CompanyStatus::Operating | CompanyStatus::Acquired | CompanyStatus::Renamed
        )
    }
}

impl fmt::Display for CompanyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contact priority assigned by prospect research
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" | "p1" => Some(Priority::High),
            "medium" | "med" | "p2" => Some(Priority::Medium),
            "low" | "p3" => Some(Priority::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "High",
            Priority::Medium => "Medium",
            Priority::Low => "Low",
        }
    }
}

/// Enrichment lifecycle of a prospect row
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProspectStatus {
    Pending,
    SentToClay,
    Inputted,
    Duplicate,
    Fail,
}

impl ProspectStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(ProspectStatus::Pending),
            "sent_to_clay" => Some(ProspectStatus::SentToClay),
            "inputted" => Some(ProspectStatus::Inputted),
            "duplicate" => Some(ProspectStatus::Duplicate),
            "fail" | "failed" => Some(ProspectStatus::Fail),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProspectStatus::Pending => "pending",
            ProspectStatus::SentToClay => "sent_to_clay",
            ProspectStatus::Inputted => "inputted",
            ProspectStatus::Duplicate => "duplicate",
            ProspectStatus::Fail => "fail",
        }
    }

    /// Statuses the enrichment callback may report
    pub fn is_enrichment_outcome(&self) -> bool {
        matches!(
            self,
            ProspectStatus::Inputted | ProspectStatus::Duplicate | ProspectStatus::Fail
        )
    }
}

/// Inferred cloud-provider preference
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudPreference {
    #[serde(default)]
    pub provider: Option<String>,

    #[serde(default, deserialize_with = "lenient_string")]
    pub confidence: Option<String>,

    #[serde(default, alias = "evidenceUrls", alias = "evidence")]
    pub evidence_urls: Vec<String>,
}

/// Structured stage-1 result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyResearchResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(
        default,
        alias = "companyStatus",
        deserialize_with = "lenient_company_status"
    )]
    pub company_status: Option<CompanyStatus>,

    #[serde(default, rename = "acquiredBy", alias = "acquired_by")]
    pub acquired_by: Option<String>,

    #[serde(default, rename = "effectiveDate", alias = "effective_date", deserialize_with = "lenient_string")]
    pub effective_date: Option<String>,

    #[serde(default, alias = "cloudPreference")]
    pub cloud_preference: Option<CloudPreference>,
}

impl CompanyResearchResult {
    /// Whether this result qualifies for stage two
    pub fn is_advanceable(&self) -> bool {
        self.company_status.map(|s| s.is_advanceable()).unwrap_or(false)
    }
}

/// One discovered contact
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default, alias = "firstName", deserialize_with = "lenient_text")]
    pub first_name: String,

    #[serde(default, alias = "lastName", deserialize_with = "lenient_text")]
    pub last_name: String,

    #[serde(default, alias = "jobTitle", alias = "title")]
    pub job_title: Option<String>,

    #[serde(default, alias = "pitchType")]
    pub pitch_type: Option<String>,

    #[serde(default, alias = "linkedin_url", alias = "linkedinUrl")]
    pub linkedin: Option<String>,

    #[serde(default, deserialize_with = "lenient_priority")]
    pub priority: Option<Priority>,

    #[serde(default, alias = "priorityReason")]
    pub priority_reason: Option<String>,
}

impl Contact {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name.trim(), self.last_name.trim())
            .trim()
            .to_string()
    }

    pub fn has_name(&self) -> bool {
        !self.first_name.trim().is_empty() || !self.last_name.trim().is_empty()
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::Bool(b)) => Some(b.to_string()),
        _ => None,
    })
}

fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_string(deserializer)?.unwrap_or_default())
}

fn lenient_company_status<'de, D>(deserializer: D) -> Result<Option<CompanyStatus>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.as_deref().and_then(CompanyStatus::parse))
}

fn lenient_priority<'de, D>(deserializer: D) -> Result<Option<Priority>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.as_deref().and_then(Priority::parse))
}
