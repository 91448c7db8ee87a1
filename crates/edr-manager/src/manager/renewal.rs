//! Renewal strategies
//!
//! A renewal either re-runs the transfer process, with the new credential
//! arriving later through [`EdrStore::install_credential`], or exchanges the
//! cached refresh token synchronously. Strategies never fail across the
//! scheduler boundary; every result is a [`RenewalOutcome`].
//!
//! [`EdrStore::install_credential`]: crate::storage::EdrStore::install_credential

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use edr_core::{Credential, EdrEntry};
use edr_refresh::TokenRefreshClient;

use crate::collaborators::{
    CollaboratorError, NegotiationService, TransferProcessService, TransferRequest,
};

/// Result of one renewal attempt
#[derive(Debug, Clone, PartialEq)]
pub enum RenewalOutcome {
    /// Renewal started; the credential arrives asynchronously
    Pending,
    /// Renewal completed with a new credential
    Renewed(Credential),
    /// Retry on a later poll without changing state
    Transient(String),
    /// Give up; the entry moves to `ERROR`
    Failed(String),
}

/// Renews the credential of a cached entry
#[async_trait]
pub trait Renewer: Send + Sync {
    /// Renew `entry`; `credential` is the currently cached one, if any
    async fn renew(&self, entry: &EdrEntry, credential: Option<&Credential>) -> RenewalOutcome;
}

fn classify(err: CollaboratorError) -> RenewalOutcome {
    if err.is_transient() {
        RenewalOutcome::Transient(err.to_string())
    } else {
        RenewalOutcome::Failed(err.to_string())
    }
}

/// Renews by starting a fresh transfer for the same agreement
pub struct TransferRenewal {
    transfers: Arc<dyn TransferProcessService>,
    negotiations: Arc<dyn NegotiationService>,
}

impl TransferRenewal {
    pub fn new(
        transfers: Arc<dyn TransferProcessService>,
        negotiations: Arc<dyn NegotiationService>,
    ) -> Self {
        Self {
            transfers,
            negotiations,
        }
    }
}

#[async_trait]
impl Renewer for TransferRenewal {
    async fn renew(&self, entry: &EdrEntry, _credential: Option<&Credential>) -> RenewalOutcome {
        let process = match self.transfers.find_by_id(&entry.transfer_process_id).await {
            Ok(Some(process)) => process,
            Ok(None) => {
                return RenewalOutcome::Failed(format!(
                    "Transfer process {} not found",
                    entry.transfer_process_id
                ))
            }
            Err(e) => return classify(e),
        };
        if process.state.is_failed() {
            return RenewalOutcome::Failed(format!(
                "Transfer process {} is {:?}",
                process.id, process.state
            ));
        }

        match self.negotiations.find_agreement(&entry.agreement_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                return RenewalOutcome::Failed(format!(
                    "Contract agreement {} not found",
                    entry.agreement_id
                ))
            }
            Err(e) => return classify(e),
        }

        match self
            .transfers
            .initiate_transfer(TransferRequest::renewal_of(&process))
            .await
        {
            Ok(started) => {
                info!(
                    tp_id = %entry.transfer_process_id,
                    new_tp_id = %started.id,
                    "Renewal transfer initiated"
                );
                RenewalOutcome::Pending
            }
            Err(e) => {
                warn!(tp_id = %entry.transfer_process_id, error = %e, "Renewal transfer rejected");
                classify(e)
            }
        }
    }
}

/// Renews through the refresh-token grant
pub struct TokenRefreshRenewal {
    client: Arc<dyn TokenRefreshClient>,
}

impl TokenRefreshRenewal {
    pub fn new(client: Arc<dyn TokenRefreshClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Renewer for TokenRefreshRenewal {
    async fn renew(&self, entry: &EdrEntry, credential: Option<&Credential>) -> RenewalOutcome {
        let Some(credential) = credential else {
            return RenewalOutcome::Failed(format!(
                "No credential cached for {}",
                entry.transfer_process_id
            ));
        };

        match self
            .client
            .refresh_token(&entry.transfer_process_id, credential)
            .await
        {
            Ok(renewed) => RenewalOutcome::Renewed(renewed),
            Err(e) if e.is_transient() => RenewalOutcome::Transient(e.to_string()),
            Err(e) => RenewalOutcome::Failed(e.to_string()),
        }
    }
}

/// Uses the refresh-token grant when the credential supports it and the
/// transfer process otherwise
pub struct CompositeRenewal {
    refresh: TokenRefreshRenewal,
    transfer: TransferRenewal,
}

impl CompositeRenewal {
    pub fn new(refresh: TokenRefreshRenewal, transfer: TransferRenewal) -> Self {
        Self { refresh, transfer }
    }
}

#[async_trait]
impl Renewer for CompositeRenewal {
    async fn renew(&self, entry: &EdrEntry, credential: Option<&Credential>) -> RenewalOutcome {
        match credential {
            Some(c) if c.is_refreshable() => {
                debug!(tp_id = %entry.transfer_process_id, "Renewing through refresh token");
                self.refresh.renew(entry, credential).await
            }
            _ => {
                debug!(tp_id = %entry.transfer_process_id, "Renewing through transfer process");
                self.transfer.renew(entry, credential).await
            }
        }
    }
}
