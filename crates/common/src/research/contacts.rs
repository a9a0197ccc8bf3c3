//! Contact identity and read-side deduplication
//!
//! Prospect rows are not unique in storage; duplicates are collapsed on read
//! by (first name, last name, LinkedIn URL).

use super::Contact;
use sha2::{Digest, Sha256};
use std::collections::HashSet;

fn normalize_linkedin(url: &str) -> String {
    let lower = url.trim().to_ascii_lowercase();
    let without_scheme = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
        .unwrap_or(&lower);
    let without_www = without_scheme.strip_prefix("www.").unwrap_or(without_scheme);
    without_www.trim_end_matches('/').to_string()
}

/// Normalized identity key of a contact
pub fn contact_key(first_name: &str, last_name: &str, linkedin: Option<&str>) -> (String, String, String) {
    (
        first_name.trim().to_lowercase(),
        last_name.trim().to_lowercase(),
        linkedin.map(normalize_linkedin).unwrap_or_default(),
    )
}

/// Stable fingerprint of a contact's identity
pub fn prospect_fingerprint(contact: &Contact) -> String {
    let (first, last, linkedin) =
        contact_key(&contact.first_name, &contact.last_name, contact.linkedin.as_deref());

    let mut hasher = Sha256::new();
    hasher.update(first.as_bytes());
    hasher.update(b"\x00");
    hasher.update(last.as_bytes());
    hasher.update(b"\x00");
    hasher.update(linkedin.as_bytes());
    hex::encode(hasher.finalize())
}

/// Drop repeated contacts, keeping the first occurrence and input order
pub fn dedupe_contacts(contacts: Vec<Contact>) -> Vec<Contact> {
    let mut seen = HashSet::with_capacity(contacts.len());
    contacts
        .into_iter()
        .filter(|c| seen.insert(prospect_fingerprint(c)))
        .collect()
}

/// Union of two contact lists, existing entries first
pub fn merge_contacts(existing: &[Contact], incoming: Vec<Contact>) -> Vec<Contact> {
    let mut all = existing.to_vec();
    all.extend(incoming);
    dedupe_contacts(all)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(first: &str, last: &str, linkedin: Option<&str>) -> Contact {
        Contact {
            first_name: first.to_string(),
            last_name: last.to_string(),
            linkedin: linkedin.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_fingerprint_ignores_case_and_url_noise() {
        let a = contact("Ada", "Lovelace", Some("https://www.linkedin.com/in/ada/"));
        let b = contact(" ada", "LOVELACE ", Some("http://linkedin.com/in/ada"));
        assert_eq!(prospect_fingerprint(&a), prospect_fingerprint(&b));
    }

    #[test]
    fn test_same_name_different_profile_is_distinct() {
        let a = contact("John", "Smith", Some("https://linkedin.com/in/john-smith-1"));
        let b = contact("John", "Smith", Some("https://linkedin.com/in/john-smith-2"));
        assert_eq!(dedupe_contacts(vec![a, b]).len(), 2);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let first = vec![
            contact("Ada", "Lovelace", Some("linkedin.com/in/ada")),
            contact("Alan", "Turing", None),
        ];
        let merged = merge_contacts(&first, first.clone());
        assert_eq!(merged, first);

        let again = merge_contacts(&merged, vec![contact("Grace", "Hopper", None)]);
        assert_eq!(again.len(), 3);
        assert_eq!(again[2].first_name, "Grace");
    }
}
