//! Unwrapping of AI job output
//!
//! The research jobs return their JSON in a handful of wrappers. The accepted
//! shapes are, outermost first:
//! - a nested array (`[{"output": ...}]`), first element taken
//! - text holding a markdown-fenced block (```` ```json {...} ``` ````)
//! - a direct JSON object, possibly under a single wrapper key
//!   (`output`, `text`, `content`, `result`, `data`, `json`)
//! - a raw string holding JSON, possibly double-encoded or surrounded by prose
//!
//! Anything else is a [`ParseError`].

use regex_lite::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use thiserror::Error;

/// Unwrapping never recurses deeper than this
const MAX_DEPTH: usize = 8;

/// Keys that only ever wrap the real payload
const WRAPPER_KEYS: &[&str] = &["output", "text", "content", "result", "data", "json"];

/// Keys that mark an object as the payload itself
const PAYLOAD_KEYS: &[&str] = &[
    "company_status",
    "companyStatus",
    "contacts",
    "status",
    "received",
    "company_research_id",
    "first_name",
    "error",
];

/// Outermost shape the payload arrived in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    NestedArray,
    FencedText,
    DirectObject,
    RawString,
}

/// An unwrapped payload object
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredPayload {
    pub shape: PayloadShape,
    pub fields: Map<String, Value>,
}

impl StructuredPayload {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Trimmed string field
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str).map(str::trim)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("research output is empty")]
    Empty,

    #[error("research output is not valid JSON: {message}")]
    NotJson { message: String },

    #[error("research output is {found}, expected an object")]
    NotAnObject { found: &'static str },

    #[error("research output is nested too deeply")]
    TooDeep,

    #[error("research output has an unexpected structure: {message}")]
    Decode { message: String },
}

fn fence_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)```[a-zA-Z]*\s*(.*?)\s*```").expect("fence pattern is valid")
    })
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Unwrap raw job output into a structured payload
pub fn parse_research_payload(raw: &Value) -> Result<StructuredPayload, ParseError> {
    let shape = match raw {
        Value::Array(_) => PayloadShape::NestedArray,
        Value::String(text) if fence_pattern().is_match(text) => PayloadShape::FencedText,
        Value::String(_) => PayloadShape::RawString,
        _ => PayloadShape::DirectObject,
    };

    let fields = unwrap_value(raw, 0)?;
    Ok(StructuredPayload { shape, fields })
}

/// Unwrap raw job output delivered as text
pub fn parse_research_text(text: &str) -> Result<StructuredPayload, ParseError> {
    parse_research_payload(&Value::String(text.to_string()))
}

fn unwrap_value(value: &Value, depth: usize) -> Result<Map<String, Value>, ParseError> {
    if depth > MAX_DEPTH {
        return Err(ParseError::TooDeep);
    }

    match value {
        Value::Array(items) => match items.first() {
            Some(first) => unwrap_value(first, depth + 1),
            None => Err(ParseError::Empty),
        },
        Value::String(text) => {
            let inner = decode_text(text)?;
            unwrap_value(&inner, depth + 1)
        }
        Value::Object(map) => match wrapped_inner(map) {
            Some(inner) => unwrap_value(inner, depth + 1),
            None => Ok(map.clone()),
        },
        other => Err(ParseError::NotAnObject {
            found: kind_of(other),
        }),
    }
}

/// The wrapped value, when `map` is only a wrapper around the payload
fn wrapped_inner(map: &Map<String, Value>) -> Option<&Value> {
    if PAYLOAD_KEYS.iter().any(|key| map.contains_key(*key)) {
        return None;
    }

    WRAPPER_KEYS
        .iter()
        .filter_map(|key| map.get(*key))
        .find(|inner| matches!(inner, Value::String(_) | Value::Array(_) | Value::Object(_)))
}

/// Text to JSON, stripping a markdown fence or surrounding prose
fn decode_text(text: &str) -> Result<Value, ParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }

    let candidate = fence_pattern()
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed);

    match serde_json::from_str::<Value>(candidate) {
        Ok(value) => Ok(value),
        Err(first_err) => {
            // Prose around an object: take the outermost braces
            let start = candidate.find('{');
            let end = candidate.rfind('}');
            match (start, end) {
                (Some(start), Some(end)) if end > start => {
                    serde_json::from_str::<Value>(&candidate[start..=end]).map_err(|e| {
                        ParseError::NotJson {
                            message: e.to_string(),
                        }
                    })
                }
                _ => Err(ParseError::NotJson {
                    message: first_err.to_string(),
                }),
            }
        }
    }
}
