//! Secret store abstraction
//!
//! Only the contract is defined here; production deployments plug in their
//! own vault. [`MemoryVault`] backs tests and single-instance setups.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use crate::error::VaultError;

/// Secret store keyed by owner and key
#[async_trait]
pub trait Vault: Send + Sync {
    /// Resolve a secret, `None` if absent
    async fn resolve_secret(&self, owner: &str, key: &str) -> Result<Option<String>, VaultError>;

    /// Store or replace a secret
    async fn store_secret(&self, owner: &str, key: &str, value: String) -> Result<(), VaultError>;

    /// Delete a secret, returning whether it existed
    async fn delete_secret(&self, owner: &str, key: &str) -> Result<bool, VaultError>;
}

/// In-memory vault
#[derive(Default)]
pub struct MemoryVault {
    secrets: RwLock<HashMap<(String, String), String>>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Vault for MemoryVault {
    async fn resolve_secret(&self, owner: &str, key: &str) -> Result<Option<String>, VaultError> {
        let secrets = self.secrets.read();
        Ok(secrets.get(&(owner.to_string(), key.to_string())).cloned())
    }

    async fn store_secret(&self, owner: &str, key: &str, value: String) -> Result<(), VaultError> {
        debug!(owner = %owner, key = %key, "Storing secret");
        self.secrets
            .write()
            .insert((owner.to_string(), key.to_string()), value);
        Ok(())
    }

    async fn delete_secret(&self, owner: &str, key: &str) -> Result<bool, VaultError> {
        let removed = self
            .secrets
            .write()
            .remove(&(owner.to_string(), key.to_string()))
            .is_some();
        Ok(removed)
    }
}
