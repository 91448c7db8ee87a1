//! Error types for the EDR core

use thiserror::Error;

use crate::types::EdrState;

/// Result type alias using EdrError
pub type Result<T> = std::result::Result<T, EdrError>;

/// Errors raised by the core data model and assertion handling
#[derive(Error, Debug)]
pub enum EdrError {
    /// A required field was not supplied to a builder
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// The requested lifecycle transition is not allowed
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: EdrState, to: EdrState },

    /// Unknown state name
    #[error("Unknown EDR state: {0}")]
    UnknownState(String),

    /// Malformed compact JWS or claim set
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Algorithm in the token header is not EdDSA
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Signature or key material error
    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<ed25519_dalek::SignatureError> for EdrError {
    fn from(err: ed25519_dalek::SignatureError) -> Self {
        EdrError::CryptoError(err.to_string())
    }
}

impl From<serde_json::Error> for EdrError {
    fn from(err: serde_json::Error) -> Self {
        EdrError::SerializationError(err.to_string())
    }
}

impl From<base64::DecodeError> for EdrError {
    fn from(err: base64::DecodeError) -> Self {
        EdrError::InvalidToken(format!("Invalid base64url segment: {}", err))
    }
}

impl From<jsonwebtoken::errors::Error> for EdrError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                EdrError::UnsupportedAlgorithm(err.to_string())
            }
            ErrorKind::InvalidSignature => EdrError::CryptoError(err.to_string()),
            _ => EdrError::InvalidToken(err.to_string()),
        }
    }
}
