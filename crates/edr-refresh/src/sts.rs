//! Secure Token Service
//!
//! Mints the self-signed assertions that authenticate refresh requests. The
//! embedded implementation signs with an Ed25519 key whose seed lives in the
//! [`Vault`](crate::vault::Vault).

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use edr_core::token::claims;
use edr_core::{ClaimToken, KeyPair};

use crate::error::StsError;
use crate::vault::Vault;

/// Claim carrying the requested scope
pub const SCOPE_CLAIM: &str = "scope";

/// A signed token plus its validity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRepresentation {
    pub token: String,
    /// Validity in seconds
    pub expires_in: u64,
}

/// Creates signed tokens from a claim set
#[async_trait]
pub trait SecureTokenService: Send + Sync {
    async fn create_token(
        &self,
        claims: ClaimToken,
        scope: Option<&str>,
    ) -> Result<TokenRepresentation, StsError>;
}

/// Ed25519 STS running inside this process
pub struct EmbeddedSecureTokenService {
    vault: Arc<dyn Vault>,
    owner: String,
    private_key_alias: String,
    kid: String,
    validity_secs: u64,
}

impl EmbeddedSecureTokenService {
    /// Create an STS signing with the key stored under `private_key_alias`.
    ///
    /// The vault entry holds the base64 encoded 32 byte seed.
    pub fn new(
        vault: Arc<dyn Vault>,
        owner: impl Into<String>,
        private_key_alias: impl Into<String>,
        kid: impl Into<String>,
    ) -> Self {
        Self {
            vault,
            owner: owner.into(),
            private_key_alias: private_key_alias.into(),
            kid: kid.into(),
            validity_secs: 300,
        }
    }

    /// Set how long minted tokens stay valid
    pub fn with_validity(mut self, seconds: u64) -> Self {
        self.validity_secs = seconds;
        self
    }

    async fn signing_key(&self) -> Result<KeyPair, StsError> {
        let seed = self
            .vault
            .resolve_secret(&self.owner, &self.private_key_alias)
            .await?
            .ok_or_else(|| StsError::KeyNotFound(self.private_key_alias.clone()))?;
        Ok(KeyPair::from_base64(self.kid.clone(), &seed)?)
    }
}

#[async_trait]
impl SecureTokenService for EmbeddedSecureTokenService {
    async fn create_token(
        &self,
        mut claims: ClaimToken,
        scope: Option<&str>,
    ) -> Result<TokenRepresentation, StsError> {
        let key = self.signing_key().await?;

        let now = Utc::now().timestamp();
        if !claims.contains(claims::ISSUED_AT) {
            claims.insert(claims::ISSUED_AT, now);
        }
        if !claims.contains(claims::EXPIRATION_TIME) {
            claims.insert(claims::EXPIRATION_TIME, now + self.validity_secs as i64);
        }
        if let Some(scope) = scope {
            claims.insert(SCOPE_CLAIM, scope);
        }

        let token = key.sign_jwt(&claims)?;
        debug!(kid = %self.kid, jti = ?claims.token_id(), "Created self-signed token");

        Ok(TokenRepresentation {
            token,
            expires_in: self.validity_secs,
        })
    }
}
