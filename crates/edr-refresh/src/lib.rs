//! EDR Refresh
//!
//! Consumer side of the refresh-token protocol for cached Endpoint Data
//! References.
//!
//! ## Architecture
//!
//! - **SecureTokenService**: mints the self-signed EdDSA assertion that
//!   authenticates a refresh request; the embedded implementation keeps its
//!   signing seed in a [`Vault`]
//! - **TokenRefreshClient**: POSTs the refresh-token grant to the provider's
//!   refresh endpoint and turns the response into a renewed [`Credential`]
//!
//! ## Usage
//!
//! ```ignore
//! use edr_refresh::{EmbeddedSecureTokenService, HttpTokenRefreshClient, MemoryVault};
//!
//! let vault = Arc::new(MemoryVault::new());
//! let sts = Arc::new(EmbeddedSecureTokenService::new(vault, "did:web:consumer", "signing-key", "key-1"));
//! let client = HttpTokenRefreshClient::new("did:web:consumer", sts);
//!
//! let renewed = client.refresh_token("tp-1", &credential).await?;
//! ```
//!
//! [`Credential`]: edr_core::Credential

pub mod client;
pub mod error;
pub mod sts;
pub mod types;
pub mod vault;

pub use client::{HttpTokenRefreshClient, TokenRefreshClient};
pub use error::{RefreshError, Result, StsError, VaultError};
pub use sts::{EmbeddedSecureTokenService, SecureTokenService, TokenRepresentation};
pub use types::{TokenErrorResponse, TokenResponse};
pub use vault::{MemoryVault, Vault};
