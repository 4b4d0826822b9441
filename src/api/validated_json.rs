//! JSON body extraction with request validation.

use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationErrors};

/// Extractor that deserializes a JSON body and runs the payload's
/// `validator` rules before the handler sees it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedJson<T>(pub T);

#[derive(Debug, thiserror::Error)]
pub enum JsonError {
    #[error("Invalid JSON format")]
    InvalidJson(#[from] JsonRejection),
    #[error("Validation error")]
    ValidationError(ValidationErrors),
}

impl IntoResponse for JsonError {
    fn into_response(self) -> Response {
        let detail = match self {
            Self::InvalidJson(rejection) => serde_json::json!(rejection.body_text()),
            Self::ValidationError(errors) => serde_json::json!(errors),
        };
        (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "detail": detail })),
        )
            .into_response()
    }
}

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = JsonError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(JsonError::InvalidJson)?;

        value.validate().map_err(JsonError::ValidationError)?;

        Ok(Self(value))
    }
}
