//! # EDR Core
//!
//! Data model and pure logic for caching Endpoint Data References (EDRs):
//! short-lived data-access credentials obtained through a dataspace
//! negotiation and kept valid through refresh-token grants.
//!
//! ## Key Concepts
//!
//! - **EdrEntry**: queryable metadata of a cached EDR, lease-coordinated
//! - **Credential**: the sensitive token payload, stored 1:1 with an entry
//! - **Lifecycle**: `NEGOTIATED → REFRESHING → NEGOTIATED`, with `ERROR`,
//!   `EXPIRED` and deletion on the failure and ageing paths
//! - **Assertion**: self-signed EdDSA JWS authenticating a refresh request

pub mod credential;
pub mod crypto;
pub mod error;
pub mod lifecycle;
pub mod token;
pub mod types;

pub use credential::Credential;
pub use crypto::{KeyPair, PublicKey};
pub use error::{EdrError, Result};
pub use lifecycle::{evaluate, Decision, LifecyclePolicy};
pub use token::{AccessTokenRecord, ClaimToken};
pub use types::{EdrEntry, EdrEntryBuilder, EdrState, Lease};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
