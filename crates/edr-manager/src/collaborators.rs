//! Services this manager consumes but does not own
//!
//! Contract negotiation, transfer process initiation and issuer-side token
//! records belong to other components of a connector. They are reached
//! through these traits; the in-memory implementations back tests and
//! standalone deployments.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;

use edr_core::token::REFRESH_TOKEN_PROPERTY;
use edr_core::AccessTokenRecord;

/// Errors reported by collaborating services
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl CollaboratorError {
    /// Whether the same call may succeed later
    ///
    /// A rejected request is retried on the next poll like an outage.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CollaboratorError::BadRequest(_) | CollaboratorError::Unavailable(_)
        )
    }
}

/// Finalized contract agreement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractAgreement {
    pub id: String,
    pub asset_id: String,
    pub provider_id: String,
    pub consumer_id: String,
    /// Epoch seconds
    pub signing_date: i64,
}

/// Lifecycle of a transfer process as seen by this manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferProcessState {
    Requested,
    Started,
    Suspended,
    Completed,
    Terminated,
}

impl TransferProcessState {
    /// Whether the process ended without delivering data
    pub fn is_failed(&self) -> bool {
        matches!(self, TransferProcessState::Terminated)
    }
}

/// Transfer process record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProcess {
    pub id: String,
    pub asset_id: String,
    pub contract_id: String,
    pub counter_party_address: String,
    pub protocol: String,
    pub transfer_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_destination: Option<serde_json::Value>,
    pub state: TransferProcessState,
}

/// Request to start a new transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub contract_id: String,
    pub asset_id: String,
    pub counter_party_address: String,
    pub protocol: String,
    pub transfer_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_destination: Option<serde_json::Value>,
    /// Transfer process whose cached EDR receives the resulting credential
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl TransferRequest {
    /// Request repeating `process` for the same contract and destination
    pub fn renewal_of(process: &TransferProcess) -> Self {
        Self {
            contract_id: process.contract_id.clone(),
            asset_id: process.asset_id.clone(),
            counter_party_address: process.counter_party_address.clone(),
            protocol: process.protocol.clone(),
            transfer_type: process.transfer_type.clone(),
            data_destination: process.data_destination.clone(),
            correlation_id: Some(process.id.clone()),
        }
    }
}

#[async_trait]
pub trait NegotiationService: Send + Sync {
    async fn find_agreement(
        &self,
        agreement_id: &str,
    ) -> Result<Option<ContractAgreement>, CollaboratorError>;
}

#[async_trait]
pub trait TransferProcessService: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<TransferProcess>, CollaboratorError>;

    async fn initiate_transfer(
        &self,
        request: TransferRequest,
    ) -> Result<TransferProcess, CollaboratorError>;
}

/// Issuer-side records of issued access tokens
#[async_trait]
pub trait AccessTokenStore: Send + Sync {
    async fn get_by_id(&self, token_id: &str) -> Result<Option<AccessTokenRecord>, CollaboratorError>;

    /// Store or replace a record
    async fn store(&self, record: AccessTokenRecord) -> Result<(), CollaboratorError>;

    /// Replace the record only while it still carries `expected_refresh_token`.
    ///
    /// Returns false when the record is gone or its refresh token changed.
    async fn replace_if_refresh_token(
        &self,
        expected_refresh_token: &str,
        record: AccessTokenRecord,
    ) -> Result<bool, CollaboratorError>;

    async fn delete(&self, token_id: &str) -> Result<bool, CollaboratorError>;
}

/// In-memory negotiation service
#[derive(Default)]
pub struct MemoryNegotiationService {
    agreements: RwLock<HashMap<String, ContractAgreement>>,
}

impl MemoryNegotiationService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_agreement(&self, agreement: ContractAgreement) {
        self.agreements.write().insert(agreement.id.clone(), agreement);
    }
}

#[async_trait]
impl NegotiationService for MemoryNegotiationService {
    async fn find_agreement(
        &self,
        agreement_id: &str,
    ) -> Result<Option<ContractAgreement>, CollaboratorError> {
        Ok(self.agreements.read().get(agreement_id).cloned())
    }
}

/// In-memory transfer process service
///
/// Initiated transfers are recorded and start in `REQUESTED`.
#[derive(Default)]
pub struct MemoryTransferProcessService {
    processes: RwLock<HashMap<String, TransferProcess>>,
    initiated: RwLock<Vec<TransferRequest>>,
}

impl MemoryTransferProcessService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_process(&self, process: TransferProcess) {
        self.processes.write().insert(process.id.clone(), process);
    }

    /// Requests passed to `initiate_transfer`, oldest first
    pub fn initiated(&self) -> Vec<TransferRequest> {
        self.initiated.read().clone()
    }
}

#[async_trait]
impl TransferProcessService for MemoryTransferProcessService {
    async fn find_by_id(&self, id: &str) -> Result<Option<TransferProcess>, CollaboratorError> {
        Ok(self.processes.read().get(id).cloned())
    }

    async fn initiate_transfer(
        &self,
        request: TransferRequest,
    ) -> Result<TransferProcess, CollaboratorError> {
        let process = TransferProcess {
            id: uuid::Uuid::new_v4().to_string(),
            asset_id: request.asset_id.clone(),
            contract_id: request.contract_id.clone(),
            counter_party_address: request.counter_party_address.clone(),
            protocol: request.protocol.clone(),
            transfer_type: request.transfer_type.clone(),
            data_destination: request.data_destination.clone(),
            state: TransferProcessState::Requested,
        };
        info!(
            tp_id = %process.id,
            correlation_id = ?request.correlation_id,
            "Initiated transfer"
        );
        self.initiated.write().push(request);
        self.processes.write().insert(process.id.clone(), process.clone());
        Ok(process)
    }
}

/// In-memory access token store
#[derive(Default)]
pub struct MemoryAccessTokenStore {
    records: RwLock<HashMap<String, AccessTokenRecord>>,
}

impl MemoryAccessTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccessTokenStore for MemoryAccessTokenStore {
    async fn get_by_id(&self, token_id: &str) -> Result<Option<AccessTokenRecord>, CollaboratorError> {
        Ok(self.records.read().get(token_id).cloned())
    }

    async fn store(&self, record: AccessTokenRecord) -> Result<(), CollaboratorError> {
        self.records.write().insert(record.token_id.clone(), record);
        Ok(())
    }

    async fn replace_if_refresh_token(
        &self,
        expected_refresh_token: &str,
        record: AccessTokenRecord,
    ) -> Result<bool, CollaboratorError> {
        let mut records = self.records.write();
        let current = records
            .get(&record.token_id)
            .and_then(|r| r.property(REFRESH_TOKEN_PROPERTY))
            .and_then(|v| v.as_str());
        if current != Some(expected_refresh_token) {
            return Ok(false);
        }
        records.insert(record.token_id.clone(), record);
        Ok(true)
    }

    async fn delete(&self, token_id: &str) -> Result<bool, CollaboratorError> {
        Ok(self.records.write().remove(token_id).is_some())
    }
}
