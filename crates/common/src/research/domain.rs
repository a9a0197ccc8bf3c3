//! Company domain and campaign text helpers

use crate::errors::{AppError, Result};
use regex_lite::Regex;
use std::sync::OnceLock;

/// Maximum accepted length of a company domain
pub const MAX_DOMAIN_LEN: usize = 255;

fn domain_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9.-]*[a-zA-Z0-9]$").expect("domain pattern is valid")
    })
}

/// Reduce a website or URL to a bare lowercase domain.
///
/// `https://www.Acme.com/about?x=1` becomes `acme.com`.
pub fn normalize_domain(input: &str) -> String {
    let mut rest = input.trim().to_ascii_lowercase();

    if let Some(idx) = rest.find("://") {
        rest = rest[idx + 3..].to_string();
    }

    // Cut path, query, fragment and credentials
    if let Some(idx) = rest.find(|c: char| c == '/' || c == '?' || c == '#') {
        rest.truncate(idx);
    }
    if let Some(idx) = rest.rfind('@') {
        rest = rest[idx + 1..].to_string();
    }
    if let Some(idx) = rest.find(':') {
        rest.truncate(idx);
    }

    let rest = rest.strip_prefix("www.").unwrap_or(&rest);
    rest.trim_end_matches('.').to_string()
}

/// Validate a company domain received at the callback boundary
pub fn validate_company_domain(domain: &str) -> Result<()> {
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN || !domain_pattern().is_match(domain) {
        return Err(AppError::InvalidDomain {
            domain: domain.chars().take(64).collect(),
        });
    }
    Ok(())
}

/// Split a free-text campaign field on newlines or commas into trimmed,
/// non-empty entries
pub fn split_list(text: &str) -> Vec<String> {
    text.split(|c: char| c == '\n' || c == ',')
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}
