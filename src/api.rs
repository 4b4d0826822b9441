pub mod health_checks;
pub mod jobs;
pub mod upload;
pub mod validated_json;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::executor::RunError;
use crate::schedule::ScheduleError;
use crate::store::StoreError;

/// Handler-level errors mapped onto HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Job with name '{0}' already exists")]
    NameInUse(String),
    #[error("Job '{0}' not found")]
    NotFound(String),
    #[error("Job '{0}' is currently running")]
    Busy(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Schedule(#[from] ScheduleError),
    #[error("storage failure: {0}")]
    Storage(StoreError),
    #[error("{0}")]
    Run(#[from] RunError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NameInUse(name) => Self::NameInUse(name),
            StoreError::NotFound(name) => Self::NotFound(name),
            other => Self::Storage(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NameInUse(_) | Self::Validation(_) | Self::Schedule(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Busy(_) => StatusCode::CONFLICT,
            Self::Storage(_) | Self::Run(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "detail": self.to_string() }));
        (status, body).into_response()
    }
}
