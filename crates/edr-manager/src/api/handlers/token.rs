//! Refresh-token grant handler

use axum::{
    extract::{Query, State},
    http::{header::AUTHORIZATION, HeaderMap},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use edr_refresh::TokenResponse;

use super::AppState;
use crate::api::error::ApiError;

const REFRESH_GRANT_TYPE: &str = "refresh_token";

/// Query parameters of the token endpoint
#[derive(Debug, Default, Deserialize)]
pub struct TokenParams {
    pub grant_type: Option<String>,
    pub refresh_token: Option<String>,
}

/// Bearer credential from the Authorization header
fn bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    (!token.is_empty()).then_some(token)
}

/// Exchange a refresh token for a new token pair
///
/// POST /token?grant_type=refresh_token&refresh_token=...
///
/// The caller authenticates with a self-signed assertion in the
/// Authorization header.
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TokenParams>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>, ApiError> {
    let grant_type = params
        .grant_type
        .ok_or_else(|| ApiError::InvalidRequest("Missing grant_type".into()))?;
    if grant_type != REFRESH_GRANT_TYPE {
        return Err(ApiError::UnsupportedGrantType(grant_type));
    }
    let refresh_token = params
        .refresh_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::InvalidRequest("Missing refresh_token".into()))?;
    let assertion = bearer(&headers)
        .ok_or_else(|| ApiError::Unauthorized("Missing bearer assertion".into()))?;

    debug!("Processing refresh token request");
    let response = state.issuer.refresh(assertion, &refresh_token).await?;
    Ok(Json(response))
}
