//! Shared fixtures for scheduler and store tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use edr_core::{Credential, EdrEntry, EdrState, LifecyclePolicy};
use edr_manager::collaborators::{
    ContractAgreement, MemoryNegotiationService, MemoryTransferProcessService, TransferProcess,
    TransferProcessState,
};
use edr_manager::storage::EdrStore;
use edr_manager::{EntryQuery, ManagerConfig, MemoryStore, MockClock, RenewalOutcome, Renewer, StorageError};

pub const T0: i64 = 1_700_000_000_000;
pub const LEAD: i64 = 60_000;
pub const DEADLINE: i64 = 120_000;
pub const RETENTION: i64 = 600_000;

pub fn policy() -> LifecyclePolicy {
    LifecyclePolicy {
        lead_time_ms: LEAD,
        refresh_deadline_ms: DEADLINE,
        retention_period_ms: RETENTION,
    }
}

pub fn config() -> ManagerConfig {
    ManagerConfig {
        participant_id: "did:web:consumer".into(),
        policy: policy(),
        ..ManagerConfig::default()
    }
}

pub fn entry(tp_id: &str, expiration: i64) -> EdrEntry {
    EdrEntry::builder()
        .transfer_process_id(tp_id)
        .asset_id("asset-1")
        .agreement_id("agreement-1")
        .provider_id("did:web:provider")
        .expiration_timestamp(expiration)
        .created_at(T0 - 1_000)
        .build()
        .unwrap()
}

/// Create `entry` and move it to `state` at `state_timestamp`
pub async fn seed(store: &dyn EdrStore, entry: EdrEntry, state: EdrState, state_timestamp: i64) -> EdrEntry {
    let created = store
        .create(entry, Credential::new("HttpData").with_authorization("token"))
        .await
        .unwrap();
    if state == EdrState::Negotiated {
        return created;
    }
    let mut moved = created;
    moved.state = state;
    moved.state_timestamp = state_timestamp;
    store.update(&moved).await.unwrap()
}

pub fn transfer_services(tp_id: &str) -> (Arc<MemoryTransferProcessService>, Arc<MemoryNegotiationService>) {
    let transfers = Arc::new(MemoryTransferProcessService::new());
    transfers.add_process(TransferProcess {
        id: tp_id.into(),
        asset_id: "asset-1".into(),
        contract_id: "agreement-1".into(),
        counter_party_address: "http://provider/protocol".into(),
        protocol: "dataspace-protocol-http".into(),
        transfer_type: "HttpData-PULL".into(),
        data_destination: None,
        state: TransferProcessState::Started,
    });
    let negotiations = Arc::new(MemoryNegotiationService::new());
    negotiations.add_agreement(ContractAgreement {
        id: "agreement-1".into(),
        asset_id: "asset-1".into(),
        provider_id: "did:web:provider".into(),
        consumer_id: "did:web:consumer".into(),
        signing_date: 0,
    });
    (transfers, negotiations)
}

/// Write made through a [`RecordingStore`]
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    Update(String, EdrState),
    Delete(String),
}

/// Credential delivered by a negotiation callback
#[derive(Debug, Clone)]
pub struct PendingInstall {
    pub transfer_process_id: String,
    pub credential: Credential,
    pub expiration_timestamp: Option<i64>,
}

/// Memory store that records entry writes made by the scheduler
#[derive(Debug)]
pub struct RecordingStore {
    inner: MemoryStore,
    writes: Mutex<Vec<Write>>,
    install_after_claim: Mutex<Option<PendingInstall>>,
}

impl RecordingStore {
    pub fn new(clock: Arc<MockClock>) -> Self {
        Self {
            inner: MemoryStore::with_clock(clock),
            writes: Mutex::new(Vec::new()),
            install_after_claim: Mutex::new(None),
        }
    }

    /// Install `install` right after the next claim returns, as a callback
    /// racing the scheduler would
    pub fn install_after_next_claim(&self, install: PendingInstall) {
        *self.install_after_claim.lock() = Some(install);
    }

    pub fn writes(&self) -> Vec<Write> {
        self.writes.lock().clone()
    }

    pub fn clear(&self) {
        self.writes.lock().clear();
    }

    pub fn updates_to(&self, state: EdrState) -> usize {
        self.writes
            .lock()
            .iter()
            .filter(|w| matches!(w, Write::Update(_, s) if *s == state))
            .count()
    }

    pub fn deletes(&self) -> usize {
        self.writes
            .lock()
            .iter()
            .filter(|w| matches!(w, Write::Delete(_)))
            .count()
    }

    pub async fn state_of(&self, id: &str) -> Option<EdrState> {
        self.inner.find_by_id(id).await.unwrap().map(|e| e.state)
    }
}

#[async_trait]
impl EdrStore for RecordingStore {
    async fn create(&self, entry: EdrEntry, credential: Credential) -> Result<EdrEntry, StorageError> {
        self.inner.create(entry, credential).await
    }

    async fn update(&self, entry: &EdrEntry) -> Result<EdrEntry, StorageError> {
        let written = self.inner.update(entry).await?;
        self.writes.lock().push(Write::Update(written.id.clone(), written.state));
        Ok(written)
    }

    async fn update_with_credential(
        &self,
        entry: &EdrEntry,
        credential: Credential,
    ) -> Result<EdrEntry, StorageError> {
        let written = self.inner.update_with_credential(entry, credential).await?;
        self.writes.lock().push(Write::Update(written.id.clone(), written.state));
        Ok(written)
    }

    async fn install_credential(
        &self,
        transfer_process_id: &str,
        credential: Credential,
        expiration_timestamp: Option<i64>,
    ) -> Result<EdrEntry, StorageError> {
        self.inner
            .install_credential(transfer_process_id, credential, expiration_timestamp)
            .await
    }

    async fn delete(&self, id: &str) -> Result<EdrEntry, StorageError> {
        let removed = self.inner.delete(id).await?;
        self.writes.lock().push(Write::Delete(id.to_string()));
        Ok(removed)
    }

    async fn delete_if_current(&self, entry: &EdrEntry) -> Result<EdrEntry, StorageError> {
        let removed = self.inner.delete_if_current(entry).await?;
        self.writes.lock().push(Write::Delete(entry.id.clone()));
        Ok(removed)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<EdrEntry>, StorageError> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_transfer_process_id(
        &self,
        transfer_process_id: &str,
    ) -> Result<Option<EdrEntry>, StorageError> {
        self.inner.find_by_transfer_process_id(transfer_process_id).await
    }

    async fn query(&self, query: &EntryQuery) -> Result<Vec<EdrEntry>, StorageError> {
        self.inner.query(query).await
    }

    async fn get_credential(&self, transfer_process_id: &str) -> Result<Option<Credential>, StorageError> {
        self.inner.get_credential(transfer_process_id).await
    }

    async fn next_not_leased(
        &self,
        holder: &str,
        batch_size: usize,
        query: &EntryQuery,
    ) -> Result<Vec<EdrEntry>, StorageError> {
        let claimed = self.inner.next_not_leased(holder, batch_size, query).await?;
        let install = self.install_after_claim.lock().take();
        if let Some(install) = install {
            self.inner
                .install_credential(
                    &install.transfer_process_id,
                    install.credential,
                    install.expiration_timestamp,
                )
                .await?;
        }
        Ok(claimed)
    }

    async fn break_lease(&self, id: &str, holder: &str) -> Result<(), StorageError> {
        self.inner.break_lease(id, holder).await
    }
}

/// Renewer answering from a script, then `Pending` once the script runs out
#[derive(Default)]
pub struct ScriptedRenewer {
    outcomes: Mutex<VecDeque<RenewalOutcome>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRenewer {
    pub fn new(outcomes: impl IntoIterator<Item = RenewalOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Renewer for ScriptedRenewer {
    async fn renew(&self, entry: &EdrEntry, _credential: Option<&Credential>) -> RenewalOutcome {
        self.calls.lock().push(entry.transfer_process_id.clone());
        self.outcomes.lock().pop_front().unwrap_or(RenewalOutcome::Pending)
    }
}
