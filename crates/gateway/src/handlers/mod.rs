//! API handlers module

pub mod callbacks;
pub mod enrichment;
pub mod health;
pub mod research;

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use prospectforge_common::errors::AppError;
use serde::de::DeserializeOwned;
use validator::Validate;

/// JSON body extractor that reports malformed bodies as 400 in the common
/// error envelope, then runs the body's `validator` rules
pub struct ApiJson<T>(pub T);

impl<S, T> FromRequest<S> for ApiJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection: JsonRejection| AppError::InvalidFormat {
                message: rejection.body_text(),
            })?;

        value.validate().map_err(|e| AppError::Validation {
            message: e.to_string(),
            field: e.field_errors().keys().next().map(|f| f.to_string()),
        })?;

        Ok(ApiJson(value))
    }
}
