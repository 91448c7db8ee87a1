//! EDR Manager
//!
//! Keeps cached Endpoint Data References usable for as long as their contract
//! allows:
//! - Polls each lifecycle state and renews entries nearing expiry
//! - Coordinates several instances through store leases
//! - Deletes expired entries after a retention period
//! - Serves the refresh-token grant when this participant is the issuer
//!
//! ## Lifecycle
//!
//! ```text
//! NEGOTIATED --lead time--> REFRESHING --renewed--> NEGOTIATED
//!      |                        |
//!      +--------expired---------+--> EXPIRED --retention--> deleted
//!                               |
//!                               +--hard failure--> ERROR --expired--> EXPIRED
//! ```
//!
//! ## API Endpoints
//!
//! - `GET /health` - Liveness check
//! - `POST /token` - Refresh-token grant (issuer side)

pub mod api;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod core;
pub mod error;
pub mod keys;
pub mod manager;
pub mod service;
pub mod storage;

pub use api::create_router;
pub use api::handlers::AppState;
pub use clock::{Clock, MockClock, SystemClock};
pub use config::{ConfigError, LoopConfig, ManagerConfig, TokenIssuerConfig};
pub use crate::core::{IssuerError, RuleChain, TokenIssuer, ValidationError};
pub use error::{Result, ServiceError};
pub use keys::ParticipantKeyRegistry;
pub use manager::{EdrManager, ManagerHandle, RenewalOutcome, Renewer};
pub use service::EdrService;
pub use storage::{EdrStore, EntryQuery, MemoryStore, StorageError};
#[cfg(feature = "postgres")]
pub use storage::PostgresStore;
