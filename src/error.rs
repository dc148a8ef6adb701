//! Error taxonomy shared by the link registry, analytics and HTTP layers.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum AppError {
    /// Missing, or owned by someone else
    #[error("Link not found")]
    NotFound,

    #[error("This link has been disabled")]
    Disabled,

    #[error("This link has expired")]
    Expired,

    #[error("Short code '{0}' is already taken")]
    CodeConflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("Invalid or missing credentials")]
    Unauthorized,

    #[error("Could not allocate a unique short code after {0} attempts")]
    CodeSpaceExhausted(usize),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Disabled | AppError::Expired => StatusCode::GONE,
            AppError::CodeConflict(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::CodeSpaceExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            // Callers that can conflict handle it before converting
            StorageError::Conflict => {
                AppError::Internal(anyhow::anyhow!("unexpected short code conflict"))
            }
            StorageError::Other(e) => AppError::Internal(e),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            AppError::Internal(e) => {
                tracing::error!(error = ?e, "request failed");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
