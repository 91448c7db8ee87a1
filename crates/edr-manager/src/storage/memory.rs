//! In-memory storage backend
//!
//! Default storage implementation. Entries and credentials sit behind a
//! single mutex, so claiming a batch is one critical section. Suitable for
//! development and single-instance deployments; data is lost on restart.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use edr_core::{Credential, EdrEntry, EdrState, Lease};

use super::{EdrStore, EntryQuery, StorageError, DEFAULT_LEASE_DURATION_MS};
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, EdrEntry>,
    /// transfer process id -> entry id
    by_transfer_process: HashMap<String, String>,
    /// transfer process id -> credential
    credentials: HashMap<String, Credential>,
}

/// In-memory EDR store
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    lease_duration_ms: i64,
}

impl MemoryStore {
    /// Create a store on the system clock with the default lease duration
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
            lease_duration_ms: DEFAULT_LEASE_DURATION_MS,
        }
    }

    pub fn with_lease_duration(mut self, lease_duration_ms: i64) -> Self {
        self.lease_duration_ms = lease_duration_ms;
        self
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Reject writes based on a stale version or against someone else's live lease
fn check_writable(stored: &EdrEntry, entry: &EdrEntry, now: i64) -> Result<(), StorageError> {
    if stored.version != entry.version {
        debug!(
            id = %entry.id,
            stored_version = stored.version,
            caller_version = entry.version,
            "Rejecting stale write"
        );
        return Err(StorageError::Conflict(entry.id.clone()));
    }
    if let Some(lease) = stored.lease.as_ref().filter(|l| !l.is_expired(now)) {
        let caller = entry.lease.as_ref().map(|l| l.holder.as_str());
        if caller != Some(lease.holder.as_str()) {
            debug!(id = %entry.id, holder = %lease.holder, "Rejecting write against foreign lease");
            return Err(StorageError::Conflict(entry.id.clone()));
        }
    }
    Ok(())
}

impl Inner {
    fn remove(&mut self, id: &str) -> Result<EdrEntry, StorageError> {
        let removed = self
            .entries
            .remove(id)
            .ok_or_else(|| StorageError::NotFound(id.to_string()))?;
        self.by_transfer_process.remove(&removed.transfer_process_id);
        self.credentials.remove(&removed.transfer_process_id);
        Ok(removed)
    }

    fn write_entry(&mut self, entry: &EdrEntry, now: i64) -> Result<EdrEntry, StorageError> {
        let stored = self
            .entries
            .get_mut(&entry.id)
            .ok_or_else(|| StorageError::NotFound(entry.id.clone()))?;
        check_writable(stored, entry, now)?;

        let mut next = entry.clone();
        next.transfer_process_id = stored.transfer_process_id.clone();
        next.lease = None;
        next.version = stored.version + 1;
        *stored = next.clone();
        Ok(next)
    }
}

#[async_trait]
impl EdrStore for MemoryStore {
    async fn create(&self, mut entry: EdrEntry, credential: Credential) -> Result<EdrEntry, StorageError> {
        let mut inner = self.inner.lock();
        if inner.entries.contains_key(&entry.id) {
            return Err(StorageError::AlreadyExists(entry.id));
        }
        if inner.by_transfer_process.contains_key(&entry.transfer_process_id) {
            return Err(StorageError::AlreadyExists(entry.transfer_process_id));
        }

        entry.lease = None;
        entry.version = 1;
        info!(id = %entry.id, tp_id = %entry.transfer_process_id, "Storing EDR entry");

        inner
            .by_transfer_process
            .insert(entry.transfer_process_id.clone(), entry.id.clone());
        inner
            .credentials
            .insert(entry.transfer_process_id.clone(), credential);
        inner.entries.insert(entry.id.clone(), entry.clone());
        Ok(entry)
    }

    async fn update(&self, entry: &EdrEntry) -> Result<EdrEntry, StorageError> {
        let now = self.clock.now_millis();
        self.inner.lock().write_entry(entry, now)
    }

    async fn update_with_credential(
        &self,
        entry: &EdrEntry,
        credential: Credential,
    ) -> Result<EdrEntry, StorageError> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        let written = inner.write_entry(entry, now)?;
        inner
            .credentials
            .insert(written.transfer_process_id.clone(), credential);
        Ok(written)
    }

    async fn install_credential(
        &self,
        transfer_process_id: &str,
        credential: Credential,
        expiration_timestamp: Option<i64>,
    ) -> Result<EdrEntry, StorageError> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        let id = inner
            .by_transfer_process
            .get(transfer_process_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(transfer_process_id.to_string()))?;
        let stored = inner
            .entries
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(id.clone()))?;

        // Every state may return to NEGOTIATED
        stored.state = EdrState::Negotiated;
        stored.state_timestamp = now;
        stored.error_detail = None;
        stored.expiration_timestamp = expiration_timestamp;
        stored.lease = None;
        stored.version += 1;
        let installed = stored.clone();

        inner
            .credentials
            .insert(transfer_process_id.to_string(), credential);
        info!(tp_id = %transfer_process_id, version = installed.version, "Installed credential");
        Ok(installed)
    }

    async fn delete(&self, id: &str) -> Result<EdrEntry, StorageError> {
        let removed = self.inner.lock().remove(id)?;
        info!(id = %id, tp_id = %removed.transfer_process_id, "Deleted EDR entry");
        Ok(removed)
    }

    async fn delete_if_current(&self, entry: &EdrEntry) -> Result<EdrEntry, StorageError> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        let stored = inner
            .entries
            .get(&entry.id)
            .ok_or_else(|| StorageError::NotFound(entry.id.clone()))?;
        check_writable(stored, entry, now)?;

        let removed = inner.remove(&entry.id)?;
        info!(id = %entry.id, tp_id = %removed.transfer_process_id, "Deleted EDR entry");
        Ok(removed)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<EdrEntry>, StorageError> {
        Ok(self.inner.lock().entries.get(id).cloned())
    }

    async fn find_by_transfer_process_id(
        &self,
        transfer_process_id: &str,
    ) -> Result<Option<EdrEntry>, StorageError> {
        let inner = self.inner.lock();
        Ok(inner
            .by_transfer_process
            .get(transfer_process_id)
            .and_then(|id| inner.entries.get(id))
            .cloned())
    }

    async fn query(&self, query: &EntryQuery) -> Result<Vec<EdrEntry>, StorageError> {
        let inner = self.inner.lock();
        let mut matching: Vec<EdrEntry> = inner
            .entries
            .values()
            .filter(|e| query.matches(e))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        Ok(matching
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect())
    }

    async fn get_credential(
        &self,
        transfer_process_id: &str,
    ) -> Result<Option<Credential>, StorageError> {
        Ok(self.inner.lock().credentials.get(transfer_process_id).cloned())
    }

    async fn next_not_leased(
        &self,
        holder: &str,
        batch_size: usize,
        query: &EntryQuery,
    ) -> Result<Vec<EdrEntry>, StorageError> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();

        let mut candidates: Vec<(i64, String)> = inner
            .entries
            .values()
            .filter(|e| query.matches(e) && !e.is_leased(now))
            .map(|e| (e.state_timestamp, e.id.clone()))
            .collect();
        candidates.sort();
        candidates.truncate(batch_size);

        let mut claimed = Vec::with_capacity(candidates.len());
        for (_, id) in candidates {
            if let Some(entry) = inner.entries.get_mut(&id) {
                entry.lease = Some(Lease::new(holder, now, self.lease_duration_ms));
                entry.version += 1;
                claimed.push(entry.clone());
            }
        }

        if !claimed.is_empty() {
            debug!(holder = %holder, count = claimed.len(), "Leased entries");
        }
        Ok(claimed)
    }

    async fn break_lease(&self, id: &str, holder: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(id) {
            if entry.lease.as_ref().is_some_and(|l| l.is_held_by(holder)) {
                entry.lease = None;
                entry.version += 1;
            }
        }
        Ok(())
    }
}
