//! Cached credential payload of an EDR
//!
//! Property names follow the data-address vocabulary used on the wire
//! (`authorization`, `refreshToken`, `refreshEndpoint`, ...). Unknown
//! properties are kept in [`Credential::properties`] and survive a refresh.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Property name of the access token
pub const AUTHORIZATION: &str = "authorization";
/// Property name of the refresh token
pub const REFRESH_TOKEN: &str = "refreshToken";
/// Property name of the refresh endpoint
pub const REFRESH_ENDPOINT: &str = "refreshEndpoint";
/// Property name of the refresh audience
pub const REFRESH_AUDIENCE: &str = "refreshAudience";

/// Default credential type
pub const DEFAULT_CREDENTIAL_TYPE: &str = "https://w3id.org/idsa/v4.1/HTTP";

/// Short-lived data-access credential plus the material needed to renew it
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Endpoint type
    #[serde(rename = "type")]
    pub kind: String,
    /// Data endpoint URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Access token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_audience: Option<String>,
    /// Access token validity in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    /// Epoch ms at which the credential was first cached
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    /// Any further properties
    #[serde(flatten)]
    pub properties: BTreeMap<String, serde_json::Value>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("authorization", &self.authorization.as_ref().map(|_| "[redacted]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[redacted]"))
            .field("refresh_endpoint", &self.refresh_endpoint)
            .field("refresh_audience", &self.refresh_audience)
            .field("expires_in", &self.expires_in)
            .field("created_at", &self.created_at)
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Credential {
    fn default() -> Self {
        Self::new(DEFAULT_CREDENTIAL_TYPE)
    }
}

impl Credential {
    /// Create an empty credential of the given type
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            endpoint: None,
            authorization: None,
            refresh_token: None,
            refresh_endpoint: None,
            refresh_audience: None,
            expires_in: None,
            created_at: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_authorization(mut self, token: impl Into<String>) -> Self {
        self.authorization = Some(token.into());
        self
    }

    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    pub fn with_refresh_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.refresh_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_refresh_audience(mut self, audience: impl Into<String>) -> Self {
        self.refresh_audience = Some(audience.into());
        self
    }

    pub fn with_expires_in(mut self, seconds: u64) -> Self {
        self.expires_in = Some(seconds);
        self
    }

    pub fn with_created_at(mut self, epoch_ms: i64) -> Self {
        self.created_at = Some(epoch_ms);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Whether everything needed for a refresh-token grant is present
    pub fn is_refreshable(&self) -> bool {
        [
            &self.authorization,
            &self.refresh_token,
            &self.refresh_endpoint,
            &self.refresh_audience,
        ]
        .iter()
        .all(|v| v.as_deref().is_some_and(|s| !s.trim().is_empty()))
    }

    /// Copy with the token fields replaced by a refresh result
    pub fn refreshed(&self, access_token: String, refresh_token: String, expires_in: u64) -> Self {
        let mut next = self.clone();
        next.authorization = Some(access_token);
        next.refresh_token = Some(refresh_token);
        next.expires_in = Some(expires_in);
        next
    }
}
