use std::io::Error as IoError;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use streamr_coordinator::CoordinatorError;
use streamr_coordinator::config::ConfigError;
use thiserror::Error;
use tracing::error;

/// Fatal startup errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0:#}")]
    Io(#[from] IoError),
    #[error("Address parsing error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0:#}")]
    Startup(#[from] anyhow::Error),
}

/// Errors returned by request handlers, rendered as `{"detail": ...}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
    /// Well-formed request whose content cannot be processed
    #[error("{0}")]
    Unprocessable(String),
}

impl ApiError {
    /// Report validation failures as 422 instead of 400
    pub fn unprocessable(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::Validation(msg) => Self::Unprocessable(msg),
            other => Self::Coordinator(other),
        }
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Coordinator(CoordinatorError::StreamNotFound(_) | CoordinatorError::NodeNotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Coordinator(CoordinatorError::InvalidTransition { .. } | CoordinatorError::Validation(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Coordinator(CoordinatorError::Store(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        HttpResponse::build(status).json(json!({ "detail": self.to_string() }))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use streamr_coordinator::database::models::StreamStatus;

    #[test]
    fn test_status_codes() {
        let cases = [
            (ApiError::from(CoordinatorError::StreamNotFound("s".into())), StatusCode::NOT_FOUND),
            (ApiError::from(CoordinatorError::NodeNotFound("n".into())), StatusCode::NOT_FOUND),
            (
                ApiError::from(CoordinatorError::InvalidTransition { from: StreamStatus::Live, to: StreamStatus::Ready }),
                StatusCode::BAD_REQUEST,
            ),
            (ApiError::from(CoordinatorError::validation("bad")), StatusCode::BAD_REQUEST),
            (ApiError::unprocessable(CoordinatorError::validation("bad")), StatusCode::UNPROCESSABLE_ENTITY),
            (ApiError::from(CoordinatorError::from(anyhow::anyhow!("locked"))), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            assert_eq!(err.status_code(), expected, "{err}");
        }
    }

    #[test]
    fn test_unprocessable_keeps_other_errors() {
        let err = ApiError::unprocessable(CoordinatorError::StreamNotFound("s".into()));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }
}
