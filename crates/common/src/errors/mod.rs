//! Error types for ProspectForge services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    MissingField,
    InvalidFormat,
    InvalidDomain,
    UnknownUser,

    // Authorization errors (3xxx)
    Forbidden,

    // Resource errors (4xxx)
    CampaignNotFound,
    CompanyNotFound,
    ResearchNotFound,
    ProspectNotFound,

    // Conflict errors (5xxx)
    BatchAlreadyRunning,
    StageInFlight,
    PreconditionFailed,

    // Rate limiting (6xxx)
    RateLimited,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // External service errors (8xxx)
    UpstreamError,
    WebhookError,
    WebhookTimeout,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,

    // Service unavailable
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::MissingField => 1002,
            ErrorCode::InvalidFormat => 1003,
            ErrorCode::InvalidDomain => 1004,
            ErrorCode::UnknownUser => 1005,

            // Authz (3xxx)
            ErrorCode::Forbidden => 3001,

            // Resources (4xxx)
            ErrorCode::CampaignNotFound => 4002,
            ErrorCode::CompanyNotFound => 4003,
            ErrorCode::ResearchNotFound => 4004,
            ErrorCode::ProspectNotFound => 4005,

            // Conflicts (5xxx)
            ErrorCode::BatchAlreadyRunning => 5002,
            ErrorCode::StageInFlight => 5003,
            ErrorCode::PreconditionFailed => 5004,

            // Rate limits (6xxx)
            ErrorCode::RateLimited => 6001,

            // Database (7xxx)
            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            // External (8xxx)
            ErrorCode::UpstreamError => 8001,
            ErrorCode::WebhookError => 8002,
            ErrorCode::WebhookTimeout => 8003,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,

            ErrorCode::ServiceUnavailable => 9999,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Required field missing: {field}")]
    MissingField { field: String },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    #[error("Invalid company domain: {domain}")]
    InvalidDomain { domain: String },

    #[error("Unknown user: {id}")]
    UnknownUser { id: String },

    // Authorization errors
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    // Resource errors
    #[error("Campaign not found: {id}")]
    CampaignNotFound { id: String },

    #[error("Company not found: {id}")]
    CompanyNotFound { id: String },

    #[error("Company research not found: {id}")]
    ResearchNotFound { id: String },

    #[error("Prospect not found: {id}")]
    ProspectNotFound { id: String },

    // Conflict errors
    #[error("A research batch is already running")]
    BatchAlreadyRunning,

    #[error("Research stage already in flight for company {company_id}")]
    StageInFlight { company_id: String },

    #[error("Precondition failed: {message}")]
    Precondition { message: String },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // External service errors
    #[error("{stage} webhook failed: {message}")]
    Webhook { stage: String, message: String },

    #[error("{stage} webhook timed out after {timeout_secs}s")]
    WebhookTimeout { stage: String, timeout_secs: u64 },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Service unavailable: {message}")]
    ServiceUnavailable { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::MissingField { .. } => ErrorCode::MissingField,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::InvalidDomain { .. } => ErrorCode::InvalidDomain,
            AppError::UnknownUser { .. } => ErrorCode::UnknownUser,
            AppError::Forbidden { .. } => ErrorCode::Forbidden,
            AppError::CampaignNotFound { .. } => ErrorCode::CampaignNotFound,
            AppError::CompanyNotFound { .. } => ErrorCode::CompanyNotFound,
            AppError::ResearchNotFound { .. } => ErrorCode::ResearchNotFound,
            AppError::ProspectNotFound { .. } => ErrorCode::ProspectNotFound,
            AppError::BatchAlreadyRunning => ErrorCode::BatchAlreadyRunning,
            AppError::StageInFlight { .. } => ErrorCode::StageInFlight,
            AppError::Precondition { .. } => ErrorCode::PreconditionFailed,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Webhook { .. } => ErrorCode::WebhookError,
            AppError::WebhookTimeout { .. } => ErrorCode::WebhookTimeout,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::ServiceUnavailable { .. } => ErrorCode::ServiceUnavailable,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. }
            | AppError::MissingField { .. }
            | AppError::InvalidFormat { .. }
            | AppError::InvalidDomain { .. }
            | AppError::UnknownUser { .. } => StatusCode::BAD_REQUEST,

            // 403 Forbidden
            AppError::Forbidden { .. } => StatusCode::FORBIDDEN,

            // 404 Not Found
            AppError::CampaignNotFound { .. }
            | AppError::CompanyNotFound { .. }
            | AppError::ResearchNotFound { .. }
            | AppError::ProspectNotFound { .. } => StatusCode::NOT_FOUND,

            // 409 Conflict
            AppError::BatchAlreadyRunning
            | AppError::StageInFlight { .. } => StatusCode::CONFLICT,

            // 412 Precondition Failed
            AppError::Precondition { .. } => StatusCode::PRECONDITION_FAILED,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::Webhook { .. }
            | AppError::WebhookTimeout { .. }
            | AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();
        let field = match &self {
            AppError::Validation { field, .. } => field.clone(),
            AppError::MissingField { field } => Some(field.clone()),
            _ => None,
        };

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                field,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseConnection {
            message: err.to_string(),
        }
    }
}
