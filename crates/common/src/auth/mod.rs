//! Request identity utilities
//!
//! Provides:
//! - The acting-user extractor (`X-User-ID` header, no authentication)
//! - Shared-secret checks for callbacks from the research job runner

use crate::config::AuthConfig;
use crate::errors::{AppError, Result};
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Header carrying the job runner's shared secret
pub const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";

/// Identity of the user a request acts for
#[derive(Debug, Clone)]
pub struct UserContext {
    pub user_id: Uuid,

    /// Request ID for tracing
    pub request_id: String,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl UserContext {
    /// Read the user context from request headers
    pub fn from_headers(headers: &HeaderMap, config: &AuthConfig) -> Result<Self> {
        let request_id = header_str(headers, &config.request_id_header)
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let raw = header_str(headers, &config.user_header).ok_or_else(|| AppError::MissingField {
            field: config.user_header.clone(),
        })?;

        let user_id = Uuid::parse_str(raw).map_err(|_| AppError::Validation {
            message: format!("{} must be a UUID", config.user_header),
            field: Some(config.user_header.clone()),
        })?;

        Ok(Self { user_id, request_id })
    }
}

/// Axum extractor for UserContext
impl<S> FromRequestParts<S> for UserContext
where
    S: Send + Sync,
    AuthConfig: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        let config = AuthConfig::from_ref(state);
        UserContext::from_headers(&parts.headers, &config)
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

/// Check the callback shared secret, when one is configured
pub fn verify_webhook_secret(headers: &HeaderMap, expected: Option<&str>) -> Result<()> {
    let Some(expected) = expected else {
        return Ok(());
    };

    // Compare digests so the comparison time does not depend on the prefix match
    let provided = header_str(headers, WEBHOOK_SECRET_HEADER).unwrap_or_default();
    if digest(provided) == digest(expected) {
        Ok(())
    } else {
        Err(AppError::Forbidden {
            message: "Invalid webhook secret".to_string(),
        })
    }
}
