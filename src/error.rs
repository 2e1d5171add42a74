use axum::Json;
use axum::response::{IntoResponse, Response};
use hyper::StatusCode;
use serde::Serialize;

/// Errors surfaced by the use case and rendered by the web layer.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Malformed input, rejected before any I/O.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not authenticated")]
    NotAuthenticated,

    /// A referenced record is missing from the repository.
    #[error("not found: {0}")]
    NotFound(String),

    /// A GitHub call failed or returned something unusable.
    #[error("upstream error: {0:#}")]
    Upstream(anyhow::Error),

    /// `prchecklist.yml` could not be parsed.
    #[error("failed to parse prchecklist.yml: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),

    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotAuthenticated => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::ConfigParse(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Storage(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> ErrorType {
        match self {
            AppError::Validation(_) => ErrorType::Validation,
            AppError::NotAuthenticated => ErrorType::NotAuthed,
            AppError::NotFound(_) => ErrorType::NotFound,
            AppError::Upstream(_) => ErrorType::Upstream,
            AppError::ConfigParse(_) => ErrorType::Config,
            AppError::Storage(_) | AppError::Internal(_) => ErrorType::Internal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    NotAuthed,
    Validation,
    NotFound,
    Upstream,
    Config,
    Internal,
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    #[serde(rename = "Type")]
    pub kind: ErrorType,
    #[serde(rename = "Message", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "request rejected");
        }

        let message = match self {
            AppError::NotAuthenticated => None,
            ref other => Some(other.to_string()),
        };
        let body = ErrorResponse {
            kind: self.kind(),
            message,
        };
        (status, Json(body)).into_response()
    }
}
