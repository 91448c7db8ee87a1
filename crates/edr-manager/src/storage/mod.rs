//! Storage abstraction for cached EDRs
//!
//! Entries and their credentials live in the same store under the transfer
//! process id, so an entry and its credential are always written and deleted
//! together. Two backends are provided: in-memory (default) and PostgreSQL
//! (feature `postgres`), which lets several manager instances share state.
//!
//! # Leasing
//!
//! [`EdrStore::next_not_leased`] claims a batch of entries for one holder in
//! a single atomic step. A claim lasts for the store's lease duration;
//! [`EdrStore::update`] and [`EdrStore::break_lease`] release it early.
//!
//! # Concurrency
//!
//! Every entry write bumps `version`. `update`, `update_with_credential` and
//! `delete_if_current` only succeed when the caller's version is current and
//! no other holder has a live lease. [`EdrStore::install_credential`] skips
//! both checks and clears the lease, which invalidates any write still in
//! flight for the old state.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

use async_trait::async_trait;
use edr_core::{Credential, EdrEntry, EdrState};
use std::fmt::Debug;

/// Default lease duration
pub const DEFAULT_LEASE_DURATION_MS: i64 = 60_000;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Entry not found: {0}")]
    NotFound(String),

    #[error("Entry already exists: {0}")]
    AlreadyExists(String),

    #[error("Concurrent modification of entry {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Selection criteria over entries
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryQuery {
    pub state: Option<EdrState>,
    pub asset_id: Option<String>,
    pub agreement_id: Option<String>,
    pub transfer_process_id: Option<String>,
    pub contract_negotiation_id: Option<String>,
    pub provider_id: Option<String>,
    /// Only entries with an expiration at or before this instant
    pub expires_before: Option<i64>,
    /// Only entries whose state changed at or before this instant
    pub state_changed_before: Option<i64>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl EntryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_state(state: EdrState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }

    pub fn with_asset_id(mut self, asset_id: impl Into<String>) -> Self {
        self.asset_id = Some(asset_id.into());
        self
    }

    pub fn with_agreement_id(mut self, agreement_id: impl Into<String>) -> Self {
        self.agreement_id = Some(agreement_id.into());
        self
    }

    pub fn with_transfer_process_id(mut self, id: impl Into<String>) -> Self {
        self.transfer_process_id = Some(id.into());
        self
    }

    pub fn with_contract_negotiation_id(mut self, id: impl Into<String>) -> Self {
        self.contract_negotiation_id = Some(id.into());
        self
    }

    pub fn with_provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    pub fn expiring_before(mut self, epoch_ms: i64) -> Self {
        self.expires_before = Some(epoch_ms);
        self
    }

    pub fn state_changed_before(mut self, epoch_ms: i64) -> Self {
        self.state_changed_before = Some(epoch_ms);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `entry` satisfies every set criterion (paging excluded)
    pub fn matches(&self, entry: &EdrEntry) -> bool {
        fn eq(expected: &Option<String>, actual: &str) -> bool {
            expected.as_deref().map_or(true, |e| e == actual)
        }

        self.state.map_or(true, |s| s == entry.state)
            && eq(&self.asset_id, &entry.asset_id)
            && eq(&self.agreement_id, &entry.agreement_id)
            && eq(&self.transfer_process_id, &entry.transfer_process_id)
            && eq(&self.provider_id, &entry.provider_id)
            && self.contract_negotiation_id.as_deref().map_or(true, |id| {
                entry.contract_negotiation_id.as_deref() == Some(id)
            })
            && self.expires_before.map_or(true, |t| {
                entry.expiration_timestamp.is_some_and(|exp| exp <= t)
            })
            && self
                .state_changed_before
                .map_or(true, |t| entry.state_timestamp <= t)
    }
}

/// Storage backend for EDR entries and credentials
///
/// Implementations must be thread-safe and support concurrent access from
/// several schedulers and request handlers.
#[async_trait]
pub trait EdrStore: Send + Sync + Debug {
    /// Store a new entry with its credential
    async fn create(&self, entry: EdrEntry, credential: Credential) -> Result<EdrEntry, StorageError>;

    /// Persist entry fields and release the caller's lease
    async fn update(&self, entry: &EdrEntry) -> Result<EdrEntry, StorageError>;

    /// Persist entry fields and the credential in one write
    async fn update_with_credential(
        &self,
        entry: &EdrEntry,
        credential: Credential,
    ) -> Result<EdrEntry, StorageError>;

    /// Install a credential from a completed negotiation or refresh.
    ///
    /// Moves the entry back to `NEGOTIATED`, sets its expiration, clears any
    /// error and lease.
    async fn install_credential(
        &self,
        transfer_process_id: &str,
        credential: Credential,
        expiration_timestamp: Option<i64>,
    ) -> Result<EdrEntry, StorageError>;

    /// Remove an entry and its credential
    async fn delete(&self, id: &str) -> Result<EdrEntry, StorageError>;

    /// Remove an entry and its credential if `entry.version` is current and no
    /// other holder has a live lease, like [`EdrStore::update`]
    async fn delete_if_current(&self, entry: &EdrEntry) -> Result<EdrEntry, StorageError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<EdrEntry>, StorageError>;

    async fn find_by_transfer_process_id(
        &self,
        transfer_process_id: &str,
    ) -> Result<Option<EdrEntry>, StorageError>;

    async fn query(&self, query: &EntryQuery) -> Result<Vec<EdrEntry>, StorageError>;

    async fn get_credential(
        &self,
        transfer_process_id: &str,
    ) -> Result<Option<Credential>, StorageError>;

    /// Claim up to `batch_size` matching entries that carry no live lease.
    ///
    /// Oldest state changes come first.
    async fn next_not_leased(
        &self,
        holder: &str,
        batch_size: usize,
        query: &EntryQuery,
    ) -> Result<Vec<EdrEntry>, StorageError>;

    /// Release a lease held by `holder` without touching other fields.
    ///
    /// A no-op when the lease is gone or held by someone else.
    async fn break_lease(&self, id: &str, holder: &str) -> Result<(), StorageError>;
}
