//! Refresh-token grant client
//!
//! Renews a cached credential against the provider's refresh endpoint. The
//! request is authenticated with a self-signed assertion binding the token id
//! and the current access token to this participant.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use edr_core::credential::{AUTHORIZATION, REFRESH_AUDIENCE, REFRESH_ENDPOINT, REFRESH_TOKEN};
use edr_core::token::claims;
use edr_core::{ClaimToken, Credential};

use crate::error::{RefreshError, Result};
use crate::sts::SecureTokenService;
use crate::types::TokenResponse;

/// Grant type sent with every refresh request
pub const REFRESH_GRANT_TYPE: &str = "refresh_token";

/// Path suffix of the token endpoint
const TOKEN_PATH: &str = "/token";

/// Default request timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Refreshes a credential for a token id
#[async_trait]
pub trait TokenRefreshClient: Send + Sync {
    /// Exchange the refresh token in `credential` for a new access token.
    ///
    /// Returns a copy of `credential` with `authorization`, `refreshToken`
    /// and `expiresIn` replaced; every other property is preserved.
    async fn refresh_token(&self, token_id: &str, credential: &Credential) -> Result<Credential>;
}

/// HTTP implementation of [`TokenRefreshClient`]
pub struct HttpTokenRefreshClient {
    http: reqwest::Client,
    sts: Arc<dyn SecureTokenService>,
    own_id: String,
    timeout: Duration,
}

impl HttpTokenRefreshClient {
    /// Create a client acting as participant `own_id`
    pub fn new(own_id: impl Into<String>, sts: Arc<dyn SecureTokenService>) -> Self {
        Self {
            http: reqwest::Client::new(),
            sts,
            own_id: own_id.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Use a preconfigured HTTP client
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn own_id(&self) -> &str {
        &self.own_id
    }

    fn assertion_claims(&self, token_id: &str, audience: &str, access_token: &str) -> ClaimToken {
        ClaimToken::new()
            .with_claim(claims::JWT_ID, token_id)
            .with_claim(claims::ISSUER, self.own_id.as_str())
            .with_claim(claims::SUBJECT, self.own_id.as_str())
            .with_claim(claims::AUDIENCE, audience)
            .with_claim(claims::TOKEN, access_token)
    }
}

/// Value of a required property, rejecting absent and blank values
fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(RefreshError::MissingProperty(name)),
    }
}

/// Token endpoint URL for a refresh endpoint
pub fn token_url(refresh_endpoint: &str) -> String {
    let trimmed = refresh_endpoint.trim_end_matches('/');
    if trimmed.ends_with(TOKEN_PATH) {
        trimmed.to_string()
    } else {
        format!("{}{}", trimmed, TOKEN_PATH)
    }
}

fn status_error(status: StatusCode, body: String) -> RefreshError {
    let message = if body.trim().is_empty() {
        status.canonical_reason().unwrap_or("no message").to_string()
    } else {
        body
    };
    match status {
        StatusCode::UNAUTHORIZED => RefreshError::Unauthorized(message),
        StatusCode::CONFLICT => RefreshError::Conflict(message),
        StatusCode::NOT_FOUND => RefreshError::NotFound(message),
        other => RefreshError::Remote {
            status: other.as_u16(),
            message,
        },
    }
}

#[async_trait]
impl TokenRefreshClient for HttpTokenRefreshClient {
    async fn refresh_token(&self, token_id: &str, credential: &Credential) -> Result<Credential> {
        let access_token = required(&credential.authorization, AUTHORIZATION)?;
        let refresh_token = required(&credential.refresh_token, REFRESH_TOKEN)?;
        let refresh_endpoint = required(&credential.refresh_endpoint, REFRESH_ENDPOINT)?;
        let audience = required(&credential.refresh_audience, REFRESH_AUDIENCE)?;

        let assertion = self
            .sts
            .create_token(self.assertion_claims(token_id, audience, access_token), None)
            .await?;

        let url = token_url(refresh_endpoint);
        debug!(token_id = %token_id, url = %url, "Sending refresh-token grant");

        let response = self
            .http
            .post(&url)
            .query(&[
                ("grant_type", REFRESH_GRANT_TYPE),
                ("refresh_token", refresh_token),
            ])
            .bearer_auth(&assertion.token)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .timeout(self.timeout)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let err = status_error(status, body);
            warn!(token_id = %token_id, status = status.as_u16(), error = %err, "Refresh rejected");
            return Err(err);
        }

        if body.trim().is_empty() {
            return Err(RefreshError::InvalidResponse("Empty response body".into()));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

        info!(token_id = %token_id, expires_in = token.expires_in, "Credential refreshed");

        Ok(credential.refreshed(token.access_token, token.refresh_token, token.expires_in))
    }
}
