//! Ed25519 signing of compact JWS assertions
//!
//! Assertions and access tokens are compact JWS (`header.payload.signature`)
//! with `alg = EdDSA`. The header names the signing key in `kid`.
//!
//! Key types:
//! - `KeyPair`: Ed25519 key pair for signing
//! - `PublicKey`: Ed25519 public key for verification

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use jsonwebtoken::Algorithm;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::{EdrError, Result};
use crate::token::ClaimToken;

/// JOSE header of the tokens we produce
#[derive(Debug, Serialize)]
struct JwsHeader<'a> {
    alg: &'static str,
    typ: &'static str,
    kid: &'a str,
}

/// Ed25519 key pair for signing assertions and access tokens
#[derive(Clone)]
pub struct KeyPair {
    /// Key identifier
    kid: String,
    /// Ed25519 signing key (private)
    signing_key: SigningKey,
    /// Ed25519 verifying key (public)
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("kid", &self.kid)
            .field("verifying_key", &"[redacted]")
            .finish()
    }
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate(kid: impl Into<String>) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(kid, signing_key)
    }

    /// Create a key pair from an existing signing key
    pub fn from_signing_key(kid: impl Into<String>, signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self {
            kid: kid.into(),
            signing_key,
            verifying_key,
        }
    }

    /// Create a key pair from a raw 32-byte seed
    pub fn from_bytes(kid: impl Into<String>, bytes: &[u8; 32]) -> Self {
        Self::from_signing_key(kid, SigningKey::from_bytes(bytes))
    }

    /// Create a key pair from a standard-base64 seed, as kept in a vault
    pub fn from_base64(kid: impl Into<String>, encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| EdrError::CryptoError(format!("Invalid key encoding: {}", e)))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| EdrError::CryptoError("Invalid key length, expected 32".into()))?;
        Ok(Self::from_bytes(kid, &bytes))
    }

    /// Standard-base64 encoding of the seed
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.signing_key.to_bytes())
    }

    /// Get the key identifier
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Get the public key
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            kid: self.kid.clone(),
            verifying_key: self.verifying_key,
        }
    }

    /// Sign a claim set as a compact JWS
    pub fn sign_jwt(&self, claims: &ClaimToken) -> Result<String> {
        let header = JwsHeader {
            alg: "EdDSA",
            typ: "JWT",
            kid: &self.kid,
        };
        let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
        let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
        let signing_input = format!("{}.{}", header_b64, payload_b64);

        let signature = self.signing_key.sign(signing_input.as_bytes());
        let signature_b64 = URL_SAFE_NO_PAD.encode(signature.to_bytes());

        Ok(format!("{}.{}", signing_input, signature_b64))
    }
}

/// Ed25519 public key for verification
#[derive(Clone)]
pub struct PublicKey {
    /// Key identifier
    kid: String,
    /// Ed25519 verifying key
    verifying_key: VerifyingKey,
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey").field("kid", &self.kid).finish()
    }
}

impl PublicKey {
    /// Create a public key from raw bytes
    pub fn from_bytes(kid: impl Into<String>, bytes: &[u8; 32]) -> Result<Self> {
        let verifying_key = VerifyingKey::from_bytes(bytes)
            .map_err(|e| EdrError::CryptoError(e.to_string()))?;
        Ok(Self {
            kid: kid.into(),
            verifying_key,
        })
    }

    /// Get the key identifier
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Get the raw verifying key bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Verify a compact JWS and return its claims.
    ///
    /// Rejects any algorithm other than EdDSA and any `kid` that names a
    /// different key. Temporal claims are not checked here.
    pub fn verify_jwt(&self, token: &str) -> Result<ClaimToken> {
        let header = jsonwebtoken::decode_header(token)?;
        if header.alg != Algorithm::EdDSA {
            return Err(EdrError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }
        if let Some(kid) = header.kid.as_deref() {
            if kid != self.kid {
                return Err(EdrError::CryptoError(format!(
                    "Key ID mismatch: expected '{}', got '{}'",
                    self.kid, kid
                )));
            }
        }

        let (signing_input, signature_b64) = token
            .rsplit_once('.')
            .ok_or_else(|| EdrError::InvalidToken("Missing signature segment".into()))?;

        let signature_bytes: [u8; 64] = URL_SAFE_NO_PAD
            .decode(signature_b64)?
            .try_into()
            .map_err(|_| EdrError::CryptoError("Invalid signature length".into()))?;
        let signature = Signature::from_bytes(&signature_bytes);

        self.verifying_key
            .verify(signing_input.as_bytes(), &signature)
            .map_err(|e| EdrError::CryptoError(e.to_string()))?;

        decode_claims(token)
    }
}

/// Decode the claims of a compact JWS without verifying it.
///
/// Only for routing decisions such as choosing the verification key by
/// issuer; never trust the result before [`PublicKey::verify_jwt`].
pub fn decode_claims(token: &str) -> Result<ClaimToken> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(EdrError::InvalidToken("Expected three JWS segments".into()));
    }
    let payload = URL_SAFE_NO_PAD.decode(parts[1])?;
    let claims: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(&payload)
        .map_err(|e| EdrError::InvalidToken(format!("Invalid claims JSON: {}", e)))?;
    Ok(ClaimToken::from_map(claims))
}

/// Serializable public key for storage/transmission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializablePublicKey {
    /// Key identifier
    pub kid: String,
    /// Base64-encoded public key bytes
    pub key: String,
}

impl From<&PublicKey> for SerializablePublicKey {
    fn from(pk: &PublicKey) -> Self {
        Self {
            kid: pk.kid.clone(),
            key: STANDARD.encode(pk.to_bytes()),
        }
    }
}

impl TryFrom<SerializablePublicKey> for PublicKey {
    type Error = EdrError;

    fn try_from(spk: SerializablePublicKey) -> Result<Self> {
        let bytes = STANDARD
            .decode(&spk.key)
            .map_err(|e| EdrError::CryptoError(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| EdrError::CryptoError("Invalid key length".into()))?;
        PublicKey::from_bytes(spk.kid, &bytes)
    }
}
