//! Refresh-token grant issuer
//!
//! Verifies a refresh assertion, runs it through the [`RuleChain`] and mints a
//! replacement access token and refresh token for the same token id.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use edr_core::crypto::decode_claims;
use edr_core::token::claims;
use edr_core::{AccessTokenRecord, ClaimToken};
use edr_refresh::TokenResponse;

use super::validation::{RuleChain, ValidationContext, ValidationError};
use crate::clock::Clock;
use crate::collaborators::AccessTokenStore;
use crate::config::TokenIssuerConfig;
use crate::keys::ParticipantKeyRegistry;

/// Why a token request was refused
#[derive(Error, Debug)]
pub enum IssuerError {
    /// Assertion missing, malformed, from an unknown participant or badly signed
    #[error("Invalid assertion: {0}")]
    InvalidAssertion(String),

    #[error("Token request rejected: {0}")]
    Rejected(#[from] ValidationError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Mints and refreshes access tokens for data this participant serves
pub struct TokenIssuer {
    participant_id: String,
    registry: Arc<ParticipantKeyRegistry>,
    tokens: Arc<dyn AccessTokenStore>,
    chain: RuleChain,
    config: TokenIssuerConfig,
    clock: Arc<dyn Clock>,
}

impl TokenIssuer {
    pub fn new(
        participant_id: impl Into<String>,
        registry: Arc<ParticipantKeyRegistry>,
        tokens: Arc<dyn AccessTokenStore>,
        config: TokenIssuerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let participant_id = participant_id.into();
        let chain = RuleChain::refresh_rules(participant_id.clone(), tokens.clone(), config.leeway_secs);
        Self {
            participant_id,
            registry,
            tokens,
            chain,
            config,
            clock,
        }
    }

    /// Replace the refresh validation rules
    pub fn with_chain(mut self, chain: RuleChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn registry(&self) -> &ParticipantKeyRegistry {
        &self.registry
    }

    /// Mint the first access token for `token_id`, bound to `audience`
    pub async fn issue(
        &self,
        token_id: &str,
        data_address: serde_json::Value,
        audience: &str,
    ) -> Result<TokenResponse, IssuerError> {
        let (record, response) = self.mint(AccessTokenRecord::new(token_id, data_address), audience)?;
        self.tokens
            .store(record)
            .await
            .map_err(|e| IssuerError::Internal(e.to_string()))?;
        info!(jti = %token_id, audience = %audience, "Issued access token");
        Ok(response)
    }

    /// Exchange `refresh_token` for a new token pair.
    ///
    /// `assertion` is the caller's self-signed compact JWS.
    pub async fn refresh(&self, assertion: &str, refresh_token: &str) -> Result<TokenResponse, IssuerError> {
        let token = self.verify_assertion(assertion)?;

        let context = ValidationContext {
            refresh_token: Some(refresh_token),
            now_secs: self.clock.now_millis() / 1_000,
        };
        self.chain.validate(&token, &context).await?;

        // The chain guarantees jti and iss are present
        let (token_id, audience) = match (token.token_id(), token.issuer()) {
            (Some(jti), Some(iss)) => (jti, iss),
            _ => return Err(IssuerError::Internal("Validated assertion lost its claims".into())),
        };
        let record = self
            .tokens
            .get_by_id(token_id)
            .await
            .map_err(|e| IssuerError::Internal(e.to_string()))?
            .ok_or_else(|| ValidationError::UnknownToken(token_id.to_string()))?;

        // A concurrent refresh may have spent the token since validation
        let (record, response) = self.mint(record, audience)?;
        let replaced = self
            .tokens
            .replace_if_refresh_token(refresh_token, record)
            .await
            .map_err(|e| IssuerError::Internal(e.to_string()))?;
        if !replaced {
            warn!(jti = %token_id, issuer = %audience, "SECURITY: Refresh token redeemed concurrently");
            return Err(ValidationError::RefreshTokenMismatch.into());
        }
        info!(jti = %token_id, participant = %audience, "Refreshed access token");
        Ok(response)
    }

    /// Check the assertion signature against the key of its issuer
    fn verify_assertion(&self, assertion: &str) -> Result<ClaimToken, IssuerError> {
        let unverified = decode_claims(assertion).map_err(|e| IssuerError::InvalidAssertion(e.to_string()))?;
        let issuer = unverified
            .issuer()
            .ok_or_else(|| IssuerError::InvalidAssertion("Assertion carries no issuer".into()))?;

        let key = self.registry.participant_key(issuer).ok_or_else(|| {
            warn!(issuer = %issuer, "SECURITY: Assertion from unknown participant");
            IssuerError::InvalidAssertion(format!("Unknown participant '{}'", issuer))
        })?;

        key.verify_jwt(assertion).map_err(|e| {
            warn!(issuer = %issuer, error = %e, "SECURITY: Assertion signature rejected");
            IssuerError::InvalidAssertion(e.to_string())
        })
    }

    /// Sign a new token pair and the record that binds it
    fn mint(
        &self,
        record: AccessTokenRecord,
        audience: &str,
    ) -> Result<(AccessTokenRecord, TokenResponse), IssuerError> {
        let now_ms = self.clock.now_millis();
        let now_secs = now_ms / 1_000;
        let validity = self.config.token_validity_secs;

        let claims = ClaimToken::new()
            .with_claim(claims::ISSUER, self.participant_id.as_str())
            .with_claim(claims::SUBJECT, self.participant_id.as_str())
            .with_claim(claims::AUDIENCE, audience)
            .with_claim(claims::JWT_ID, record.token_id.as_str())
            .with_claim(claims::ISSUED_AT, now_secs)
            .with_claim(claims::EXPIRATION_TIME, now_secs.saturating_add(validity as i64));
        let access_token = self
            .registry
            .sign(&claims)
            .map_err(|e| IssuerError::Internal(format!("Failed to sign access token: {}", e)))?;
        let refresh_token = generate_refresh_token();

        let record = record
            .with_audience(audience)
            .with_refresh_token(refresh_token.as_str())
            .with_expires_at(now_ms.saturating_add((validity as i64).saturating_mul(1_000)));

        Ok((record, TokenResponse::bearer(access_token, refresh_token, validity)))
    }
}

/// 256 random bits, base64url encoded
fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
