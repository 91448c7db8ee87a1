//! Error types for the refresh client and its collaborators

use thiserror::Error;

/// Result type for refresh operations
pub type Result<T> = std::result::Result<T, RefreshError>;

/// Errors from a refresh-token grant
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// A property needed for the grant is missing or blank
    #[error("Missing required property: {0}")]
    MissingProperty(&'static str),

    /// The self-signed assertion could not be built
    #[error("Failed to create assertion: {0}")]
    Assertion(String),

    /// Remote answered 401
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Remote answered 409
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Remote answered 404
    #[error("Not found: {0}")]
    NotFound(String),

    /// Any other non-2xx answer
    #[error("Refresh failed with status {status}: {message}")]
    Remote { status: u16, message: String },

    /// Connection, timeout or other I/O failure
    #[error("Refresh request failed: {0}")]
    Transport(String),

    /// 2xx answer with an empty or unparseable body
    #[error("Invalid refresh response: {0}")]
    InvalidResponse(String),
}

impl RefreshError {
    /// Whether retrying the same request later may succeed.
    ///
    /// Missing properties and explicit 401/404/409 rejections are final.
    pub fn is_transient(&self) -> bool {
        match self {
            RefreshError::MissingProperty(_)
            | RefreshError::Unauthorized(_)
            | RefreshError::Conflict(_)
            | RefreshError::NotFound(_) => false,
            RefreshError::Assertion(_)
            | RefreshError::Transport(_)
            | RefreshError::InvalidResponse(_) => true,
            RefreshError::Remote { status, .. } => {
                *status == 400 || *status == 408 || *status == 429 || *status >= 500
            }
        }
    }
}

impl From<reqwest::Error> for RefreshError {
    fn from(err: reqwest::Error) -> Self {
        RefreshError::Transport(err.to_string())
    }
}

impl From<StsError> for RefreshError {
    fn from(err: StsError) -> Self {
        RefreshError::Assertion(err.to_string())
    }
}

/// Errors from the secure token service
#[derive(Error, Debug)]
pub enum StsError {
    /// No signing key under the configured alias
    #[error("Signing key not found: {0}")]
    KeyNotFound(String),

    /// Signing failed
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Vault lookup failed
    #[error(transparent)]
    Vault(#[from] VaultError),
}

impl From<edr_core::EdrError> for StsError {
    fn from(err: edr_core::EdrError) -> Self {
        StsError::Signing(err.to_string())
    }
}

/// Errors from a secret store
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Vault unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_property_names_field() {
        let err = RefreshError::MissingProperty("refreshEndpoint");
        assert_eq!(err.to_string(), "Missing required property: refreshEndpoint");
    }

    #[test]
    fn test_transient_classification() {
        assert!(RefreshError::Transport("connection refused".into()).is_transient());
        assert!(RefreshError::Remote { status: 503, message: "busy".into() }.is_transient());
        assert!(RefreshError::Remote { status: 400, message: "bad".into() }.is_transient());
        assert!(!RefreshError::Remote { status: 403, message: "no".into() }.is_transient());
        assert!(!RefreshError::Unauthorized("revoked".into()).is_transient());
        assert!(!RefreshError::NotFound("gone".into()).is_transient());
        assert!(!RefreshError::MissingProperty("authorization").is_transient());
    }

    #[test]
    fn test_sts_error_becomes_assertion_failure() {
        let err: RefreshError = StsError::KeyNotFound("consumer-key".into()).into();
        assert!(matches!(err, RefreshError::Assertion(msg) if msg.contains("consumer-key")));
    }
}
