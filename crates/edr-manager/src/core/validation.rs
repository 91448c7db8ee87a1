//! Validation rules for incoming refresh assertions
//!
//! Rules run in order over the verified claims of a refresh assertion and the
//! first failure stops the chain. Every failure is a security event: it is
//! logged and never retried.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

use edr_core::token::{claims, AUDIENCE_PROPERTY, REFRESH_TOKEN_PROPERTY};
use edr_core::{AccessTokenRecord, ClaimToken};

use crate::collaborators::AccessTokenStore;

/// Why an assertion was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required claim '{0}' not present on token")]
    MissingClaim(String),

    #[error("Issuer '{issuer}' does not match subject '{subject}'")]
    IssuerSubjectMismatch { issuer: String, subject: String },

    #[error("Token audience '{actual}' does not match participant '{expected}'")]
    AudienceMismatch { expected: String, actual: String },

    #[error("Token expired at {0}")]
    Expired(i64),

    #[error("Token issued in the future at {0}")]
    IssuedInFuture(i64),

    #[error("No access token found for token ID '{0}'")]
    UnknownToken(String),

    #[error("Property '{property}' was expected to be a string but was {found}")]
    InvalidProperty { property: String, found: String },

    #[error("Principal '{0}' is not authorized to refresh this token")]
    NotAuthorized(String),

    #[error("Provided refresh token does not match the stored refresh token")]
    RefreshTokenMismatch,

    #[error("Access token store unavailable: {0}")]
    Store(String),
}

impl ValidationError {
    /// Whether the failure is the issuer's fault rather than the caller's
    pub fn is_internal(&self) -> bool {
        matches!(self, ValidationError::Store(_))
    }
}

/// Request data the claims are checked against
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    /// Refresh token sent alongside the assertion
    pub refresh_token: Option<&'a str>,
    /// Epoch seconds
    pub now_secs: i64,
}

/// One read-only check in a [`RuleChain`]
#[async_trait]
pub trait TokenValidationRule: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(
        &self,
        token: &ClaimToken,
        context: &ValidationContext<'_>,
    ) -> Result<(), ValidationError>;
}

fn required<'t>(token: &'t ClaimToken, name: &str) -> Result<&'t str, ValidationError> {
    token
        .string_claim(name)
        .ok_or_else(|| ValidationError::MissingClaim(name.to_string()))
}

fn json_type(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// String property of a token record
fn string_property<'r>(record: &'r AccessTokenRecord, property: &str) -> Result<&'r str, ValidationError> {
    match record.property(property) {
        Some(serde_json::Value::String(s)) => Ok(s),
        other => Err(ValidationError::InvalidProperty {
            property: property.to_string(),
            found: other.map_or("null", json_type).to_string(),
        }),
    }
}

async fn lookup_record(
    store: &dyn AccessTokenStore,
    token_id: &str,
) -> Result<AccessTokenRecord, ValidationError> {
    store
        .get_by_id(token_id)
        .await
        .map_err(|e| ValidationError::Store(e.to_string()))?
        .ok_or_else(|| ValidationError::UnknownToken(token_id.to_string()))
}

/// Fails naming the first absent claim
pub struct ClaimPresenceRule {
    claims: Vec<String>,
}

impl ClaimPresenceRule {
    pub fn new<I, S>(claims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            claims: claims.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl TokenValidationRule for ClaimPresenceRule {
    fn name(&self) -> &'static str {
        "claim-presence"
    }

    async fn check(&self, token: &ClaimToken, _context: &ValidationContext<'_>) -> Result<(), ValidationError> {
        match self.claims.iter().find(|c| !token.contains(c)) {
            Some(missing) => Err(ValidationError::MissingClaim(missing.clone())),
            None => Ok(()),
        }
    }
}

/// Assertion must be self-issued: `iss == sub`
pub struct IssuerEqualsSubjectRule;

#[async_trait]
impl TokenValidationRule for IssuerEqualsSubjectRule {
    fn name(&self) -> &'static str {
        "issuer-equals-subject"
    }

    async fn check(&self, token: &ClaimToken, _context: &ValidationContext<'_>) -> Result<(), ValidationError> {
        let issuer = required(token, claims::ISSUER)?;
        let subject = required(token, claims::SUBJECT)?;
        if issuer != subject {
            return Err(ValidationError::IssuerSubjectMismatch {
                issuer: issuer.to_string(),
                subject: subject.to_string(),
            });
        }
        Ok(())
    }
}

/// Assertion must be addressed to this participant
pub struct AudienceMatchesParticipantRule {
    participant_id: String,
}

impl AudienceMatchesParticipantRule {
    pub fn new(participant_id: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
        }
    }
}

#[async_trait]
impl TokenValidationRule for AudienceMatchesParticipantRule {
    fn name(&self) -> &'static str {
        "audience-matches-participant"
    }

    async fn check(&self, token: &ClaimToken, _context: &ValidationContext<'_>) -> Result<(), ValidationError> {
        let audience = token
            .audience()
            .ok_or_else(|| ValidationError::MissingClaim(claims::AUDIENCE.to_string()))?;
        if audience != self.participant_id {
            return Err(ValidationError::AudienceMismatch {
                expected: self.participant_id.clone(),
                actual: audience.to_string(),
            });
        }
        Ok(())
    }
}

/// `exp` must lie ahead and `iat` must not lie ahead, within leeway
pub struct NotExpiredRule {
    leeway_secs: i64,
}

impl NotExpiredRule {
    pub fn new(leeway_secs: i64) -> Self {
        Self { leeway_secs }
    }
}

#[async_trait]
impl TokenValidationRule for NotExpiredRule {
    fn name(&self) -> &'static str {
        "not-expired"
    }

    async fn check(&self, token: &ClaimToken, context: &ValidationContext<'_>) -> Result<(), ValidationError> {
        if let Some(exp) = token.expires_at() {
            if exp.saturating_add(self.leeway_secs) <= context.now_secs {
                return Err(ValidationError::Expired(exp));
            }
        }
        if let Some(iat) = token.issued_at() {
            if iat > context.now_secs.saturating_add(self.leeway_secs) {
                return Err(ValidationError::IssuedInFuture(iat));
            }
        }
        Ok(())
    }
}

/// The token record's audience must be the assertion issuer
pub struct AuthTokenAudienceRule {
    store: Arc<dyn AccessTokenStore>,
}

impl AuthTokenAudienceRule {
    pub fn new(store: Arc<dyn AccessTokenStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TokenValidationRule for AuthTokenAudienceRule {
    fn name(&self) -> &'static str {
        "auth-token-audience"
    }

    async fn check(&self, token: &ClaimToken, _context: &ValidationContext<'_>) -> Result<(), ValidationError> {
        let issuer = required(token, claims::ISSUER)?;
        let token_id = required(token, claims::JWT_ID)?;

        let record = lookup_record(self.store.as_ref(), token_id).await?;
        let audience = string_property(&record, AUDIENCE_PROPERTY)?;
        if audience != issuer {
            return Err(ValidationError::NotAuthorized(issuer.to_string()));
        }
        Ok(())
    }
}

/// The presented refresh token must match the one stored for the token id
pub struct RefreshTokenMustExistRule {
    store: Arc<dyn AccessTokenStore>,
}

impl RefreshTokenMustExistRule {
    pub fn new(store: Arc<dyn AccessTokenStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TokenValidationRule for RefreshTokenMustExistRule {
    fn name(&self) -> &'static str {
        "refresh-token-must-exist"
    }

    async fn check(&self, token: &ClaimToken, context: &ValidationContext<'_>) -> Result<(), ValidationError> {
        let token_id = required(token, claims::JWT_ID)?;
        let record = lookup_record(self.store.as_ref(), token_id).await?;

        let stored = record
            .property(REFRESH_TOKEN_PROPERTY)
            .and_then(serde_json::Value::as_str);
        match (stored, context.refresh_token) {
            (Some(stored), Some(presented)) if stored == presented => {}
            _ => return Err(ValidationError::RefreshTokenMismatch),
        }

        let issuer = required(token, claims::ISSUER)?;
        let audience = string_property(&record, AUDIENCE_PROPERTY)?;
        if audience != issuer {
            return Err(ValidationError::NotAuthorized(issuer.to_string()));
        }
        Ok(())
    }
}

/// Ordered, fail-fast sequence of rules
#[derive(Default, Clone)]
pub struct RuleChain {
    rules: Vec<Arc<dyn TokenValidationRule>>,
}

impl RuleChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(mut self, rule: impl TokenValidationRule + 'static) -> Self {
        self.rules.push(Arc::new(rule));
        self
    }

    /// Rules guarding the refresh-token grant of `participant_id`
    pub fn refresh_rules(
        participant_id: impl Into<String>,
        store: Arc<dyn AccessTokenStore>,
        leeway_secs: i64,
    ) -> Self {
        Self::new()
            .with_rule(ClaimPresenceRule::new([
                claims::ISSUER,
                claims::SUBJECT,
                claims::AUDIENCE,
                claims::JWT_ID,
                claims::TOKEN,
            ]))
            .with_rule(IssuerEqualsSubjectRule)
            .with_rule(AudienceMatchesParticipantRule::new(participant_id))
            .with_rule(NotExpiredRule::new(leeway_secs))
            .with_rule(AuthTokenAudienceRule::new(store.clone()))
            .with_rule(RefreshTokenMustExistRule::new(store))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run every rule in order, stopping at the first failure
    pub async fn validate(
        &self,
        token: &ClaimToken,
        context: &ValidationContext<'_>,
    ) -> Result<(), ValidationError> {
        for rule in &self.rules {
            if let Err(e) = rule.check(token, context).await {
                warn!(
                    rule = rule.name(),
                    issuer = ?token.issuer(),
                    jti = ?token.token_id(),
                    error = %e,
                    "SECURITY: Refresh assertion rejected"
                );
                return Err(e);
            }
        }
        Ok(())
    }
}
