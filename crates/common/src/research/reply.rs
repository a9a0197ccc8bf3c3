//! Classification of synchronous webhook replies
//!
//! A stage webhook may answer with the final result, with an "accepted"
//! acknowledgment (the result arrives later through a store write) or with
//! a failure. Parse failures keep the raw text for display.

use super::parse::{parse_research_payload, StructuredPayload};
use super::{dedupe_contacts, CompanyResearchResult, Contact};
use serde_json::Value;
use uuid::Uuid;

pub const COMPANY_PARSE_FAILURE: &str = "Could not parse company research response";
pub const PROSPECT_PARSE_FAILURE: &str = "Could not parse prospect research response";

#[derive(Debug, Clone, PartialEq)]
pub enum CompanyReply {
    /// Final stage-1 result with a usable operating status
    Completed {
        result: CompanyResearchResult,
        raw: Value,
    },
    /// Job accepted; result will be delivered by callback
    Accepted { company_research_id: Option<Uuid> },
    Failed {
        message: String,
        raw: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProspectReply {
    /// At least one contact, deduplicated
    Contacts(Vec<Contact>),
    /// Processing marker, empty body or empty contact list
    Accepted,
    Failed {
        message: String,
        raw: Option<String>,
    },
}

fn is_empty_body(raw: &Value) -> bool {
    match raw {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn raw_text(raw: &Value) -> String {
    match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_failure(payload: &StructuredPayload) -> bool {
    matches!(
        payload
            .str_field("status")
            .map(|s| s.to_ascii_lowercase())
            .as_deref(),
        Some("failed" | "failure" | "error")
    )
}

fn is_processing(payload: &StructuredPayload) -> bool {
    let processing = payload
        .str_field("status")
        .map(|s| s.eq_ignore_ascii_case("processing") || s.eq_ignore_ascii_case("accepted"))
        .unwrap_or(false);
    let received = payload.get("received").and_then(Value::as_bool).unwrap_or(false);
    processing || received
}

fn failure_message(payload: &StructuredPayload, default: &str) -> String {
    ["error_message", "error", "message"]
        .iter()
        .find_map(|key| payload.str_field(key))
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
        .to_string()
}

fn research_id(payload: &StructuredPayload) -> Option<Uuid> {
    payload
        .str_field("company_research_id")
        .and_then(|s| Uuid::parse_str(s).ok())
}

/// Classify the stage-1 webhook's synchronous reply
pub fn classify_company_reply(raw: &Value) -> CompanyReply {
    if is_empty_body(raw) {
        return CompanyReply::Accepted {
            company_research_id: None,
        };
    }

    let payload = match parse_research_payload(raw) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::debug!(error = %e, "Unparseable company research reply");
            return CompanyReply::Failed {
                message: COMPANY_PARSE_FAILURE.to_string(),
                raw: Some(raw_text(raw)),
            };
        }
    };

    if is_failure(&payload) {
        return CompanyReply::Failed {
            message: failure_message(&payload, "Company research failed"),
            raw: None,
        };
    }

    let has_status = payload.get("company_status").is_some() || payload.get("companyStatus").is_some();
    if !has_status && is_processing(&payload) {
        return CompanyReply::Accepted {
            company_research_id: research_id(&payload),
        };
    }

    let value = payload.into_value();
    let result: CompanyResearchResult = match serde_json::from_value(value.clone()) {
        Ok(result) => result,
        Err(e) => {
            tracing::debug!(error = %e, "Company research reply has unexpected fields");
            return CompanyReply::Failed {
                message: COMPANY_PARSE_FAILURE.to_string(),
                raw: Some(raw_text(raw)),
            };
        }
    };

    if result.company_status.is_none() {
        return CompanyReply::Failed {
            message: "Company research returned no usable status".to_string(),
            raw: Some(raw_text(raw)),
        };
    }

    CompanyReply::Completed { result, raw: value }
}

fn looks_like_contact(value: &Value) -> bool {
    value
        .as_object()
        .map(|o| {
            ["first_name", "firstName", "last_name", "lastName"]
                .iter()
                .any(|k| o.contains_key(*k))
        })
        .unwrap_or(false)
}

fn contacts_from(items: &Value) -> Option<Vec<Contact>> {
    let contacts: Vec<Contact> = serde_json::from_value(items.clone()).ok()?;
    Some(dedupe_contacts(
        contacts.into_iter().filter(Contact::has_name).collect(),
    ))
}

/// Classify the stage-2 webhook's synchronous reply
pub fn classify_prospect_reply(raw: &Value) -> ProspectReply {
    if is_empty_body(raw) {
        return ProspectReply::Accepted;
    }

    // A bare contact list
    if let Value::Array(items) = raw {
        if items.is_empty() {
            return ProspectReply::Accepted;
        }
        if items.iter().all(looks_like_contact) {
            return match contacts_from(raw) {
                Some(contacts) if !contacts.is_empty() => ProspectReply::Contacts(contacts),
                Some(_) => ProspectReply::Accepted,
                None => ProspectReply::Failed {
                    message: PROSPECT_PARSE_FAILURE.to_string(),
                    raw: Some(raw_text(raw)),
                },
            };
        }
    }

    let payload = match parse_research_payload(raw) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::debug!(error = %e, "Unparseable prospect research reply");
            return ProspectReply::Failed {
                message: PROSPECT_PARSE_FAILURE.to_string(),
                raw: Some(raw_text(raw)),
            };
        }
    };

    if is_failure(&payload) {
        return ProspectReply::Failed {
            message: failure_message(&payload, "Prospect research failed"),
            raw: None,
        };
    }

    match payload.get("contacts") {
        Some(items @ Value::Array(_)) => match contacts_from(items) {
            Some(contacts) if !contacts.is_empty() => ProspectReply::Contacts(contacts),
            Some(_) => ProspectReply::Accepted,
            None => ProspectReply::Failed {
                message: PROSPECT_PARSE_FAILURE.to_string(),
                raw: Some(raw_text(raw)),
            },
        },
        _ => ProspectReply::Accepted,
    }
}
