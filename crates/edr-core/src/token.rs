//! Claim sets and issuer-side access token records

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Registered and protocol claim names
pub mod claims {
    pub const ISSUER: &str = "iss";
    pub const SUBJECT: &str = "sub";
    pub const AUDIENCE: &str = "aud";
    pub const JWT_ID: &str = "jti";
    pub const EXPIRATION_TIME: &str = "exp";
    pub const ISSUED_AT: &str = "iat";
    /// The access token being refreshed, carried inside the assertion
    pub const TOKEN: &str = "token";
}

/// Additional-property key holding the audience a token was issued to
pub const AUDIENCE_PROPERTY: &str = "audience";
/// Additional-property key holding the refresh token bound to an access token
pub const REFRESH_TOKEN_PROPERTY: &str = "refreshToken";

/// A decoded claim set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimToken {
    claims: Map<String, Value>,
}

impl ClaimToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(claims: Map<String, Value>) -> Self {
        Self { claims }
    }

    pub fn with_claim(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.claims.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.claims.insert(name.into(), value.into());
    }

    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.claims.contains_key(name)
    }

    /// String value of a claim, `None` when absent or not a string
    pub fn string_claim(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }

    pub fn issuer(&self) -> Option<&str> {
        self.string_claim(claims::ISSUER)
    }

    pub fn subject(&self) -> Option<&str> {
        self.string_claim(claims::SUBJECT)
    }

    /// Audience; a single-element array is accepted as well
    pub fn audience(&self) -> Option<&str> {
        match self.claims.get(claims::AUDIENCE)? {
            Value::String(s) => Some(s.as_str()),
            Value::Array(values) if values.len() == 1 => values[0].as_str(),
            _ => None,
        }
    }

    pub fn token_id(&self) -> Option<&str> {
        self.string_claim(claims::JWT_ID)
    }

    /// Expiration in epoch seconds
    pub fn expires_at(&self) -> Option<i64> {
        self.claims.get(claims::EXPIRATION_TIME).and_then(Value::as_i64)
    }

    /// Issued-at in epoch seconds
    pub fn issued_at(&self) -> Option<i64> {
        self.claims.get(claims::ISSUED_AT).and_then(Value::as_i64)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.claims
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.claims
    }
}

/// Record of an access token minted by this system as issuer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenRecord {
    /// Token id (the `jti` of the access token)
    pub token_id: String,
    /// Data address the token grants access to
    pub data_address: Value,
    /// Must carry `audience` and `refreshToken` strings
    #[serde(default)]
    pub additional_properties: HashMap<String, Value>,
    /// Epoch ms after which the access token is no longer honored
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl AccessTokenRecord {
    pub fn new(token_id: impl Into<String>, data_address: Value) -> Self {
        Self {
            token_id: token_id.into(),
            data_address,
            additional_properties: HashMap::new(),
            expires_at: None,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.additional_properties.insert(key.into(), value.into());
        self
    }

    pub fn with_audience(self, audience: impl Into<String>) -> Self {
        self.with_property(AUDIENCE_PROPERTY, audience.into())
    }

    pub fn with_refresh_token(self, refresh_token: impl Into<String>) -> Self {
        self.with_property(REFRESH_TOKEN_PROPERTY, refresh_token.into())
    }

    pub fn with_expires_at(mut self, epoch_ms: i64) -> Self {
        self.expires_at = Some(epoch_ms);
        self
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.additional_properties.get(key)
    }
}
