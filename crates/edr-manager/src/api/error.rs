//! API error types and responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

use edr_refresh::TokenErrorResponse;

use crate::core::IssuerError;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, "invalid_request", msg),
            ApiError::UnsupportedGrantType(grant) => (
                StatusCode::BAD_REQUEST,
                "unsupported_grant_type",
                format!("Grant type '{}' is not supported", grant),
            ),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "invalid_client", msg),
            ApiError::Internal(msg) => {
                error!(error = %msg, "Token request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "server_error",
                    "Internal error".to_string(),
                )
            }
        };

        (status, Json(TokenErrorResponse::new(code, message))).into_response()
    }
}

impl From<IssuerError> for ApiError {
    fn from(err: IssuerError) -> Self {
        match err {
            IssuerError::InvalidAssertion(msg) => ApiError::Unauthorized(msg),
            IssuerError::Rejected(rule) if rule.is_internal() => ApiError::Internal(rule.to_string()),
            IssuerError::Rejected(rule) => ApiError::Unauthorized(rule.to_string()),
            IssuerError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}
