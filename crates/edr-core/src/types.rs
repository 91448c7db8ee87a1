//! EDR entry, lifecycle state and lease types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{EdrError, Result};

/// Lifecycle state of a cached Endpoint Data Reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdrState {
    /// A valid credential is cached (initial state)
    Negotiated,
    /// Renewal is in flight; the old credential is still usable
    Refreshing,
    /// The validity window elapsed without a completed renewal
    Expired,
    /// Renewal failed for a non-transient reason
    Error,
}

impl EdrState {
    /// All states, in lifecycle order
    pub const ALL: [EdrState; 4] = [
        EdrState::Negotiated,
        EdrState::Refreshing,
        EdrState::Expired,
        EdrState::Error,
    ];

    /// Canonical upper-case name, as persisted
    pub fn as_str(&self) -> &'static str {
        match self {
            EdrState::Negotiated => "NEGOTIATED",
            EdrState::Refreshing => "REFRESHING",
            EdrState::Expired => "EXPIRED",
            EdrState::Error => "ERROR",
        }
    }

    /// Whether a write may move an entry from `self` to `next`.
    ///
    /// `NEGOTIATED -> NEGOTIATED` is a synchronous renewal. Transitions back to
    /// `NEGOTIATED` from `REFRESHING`, `ERROR` or `EXPIRED` only happen through
    /// credential installation.
    pub fn can_transition_to(&self, next: EdrState) -> bool {
        use EdrState::*;
        matches!(
            (self, next),
            (Negotiated, Negotiated)
                | (Negotiated, Refreshing)
                | (Negotiated, Expired)
                | (Negotiated, Error)
                | (Refreshing, Negotiated)
                | (Refreshing, Error)
                | (Error, Negotiated)
                | (Error, Expired)
                | (Expired, Negotiated)
        )
    }
}

impl fmt::Display for EdrState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdrState {
    type Err = EdrError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "NEGOTIATED" => Ok(EdrState::Negotiated),
            "REFRESHING" => Ok(EdrState::Refreshing),
            "EXPIRED" => Ok(EdrState::Expired),
            "ERROR" => Ok(EdrState::Error),
            _ => Err(EdrError::UnknownState(s.to_string())),
        }
    }
}

/// Time-bounded claim on an entry by one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    /// Identity of the worker holding the lease
    pub holder: String,
    /// When the lease was taken (epoch ms)
    pub leased_at: i64,
    /// Lease duration in milliseconds
    pub duration_ms: i64,
}

impl Lease {
    pub fn new(holder: impl Into<String>, leased_at: i64, duration_ms: i64) -> Self {
        Self {
            holder: holder.into(),
            leased_at,
            duration_ms,
        }
    }

    /// Epoch ms after which the lease may be reclaimed
    pub fn expires_at(&self) -> i64 {
        self.leased_at.saturating_add(self.duration_ms)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at()
    }

    pub fn is_held_by(&self, holder: &str) -> bool {
        self.holder == holder
    }
}

/// Metadata of a cached Endpoint Data Reference.
///
/// The sensitive token payload lives in a separate [`Credential`](crate::Credential)
/// record keyed by the same `transfer_process_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdrEntry {
    /// Entry identifier
    pub id: String,
    /// Correlation key, unique across entries
    pub transfer_process_id: String,
    pub asset_id: String,
    pub agreement_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contract_negotiation_id: Option<String>,
    pub provider_id: String,
    pub state: EdrState,
    /// Epoch ms of the last state transition
    pub state_timestamp: i64,
    /// Epoch ms at which the cached credential stops being valid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease: Option<Lease>,
    /// Epoch ms of creation
    pub created_at: i64,
    /// Optimistic-concurrency counter, bumped by every successful write
    #[serde(default)]
    pub version: u64,
}

impl EdrEntry {
    /// Start building a new entry in the `NEGOTIATED` state
    pub fn builder() -> EdrEntryBuilder {
        EdrEntryBuilder::default()
    }

    /// Move to `next`, stamping `now` as the transition time.
    ///
    /// Clears `error_detail` unless the target is `ERROR`.
    pub fn transition_to(&mut self, next: EdrState, now: i64) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(EdrError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.state_timestamp = now;
        if next != EdrState::Error {
            self.error_detail = None;
        }
        Ok(())
    }

    /// Move to `ERROR`, recording why
    pub fn transition_to_error(&mut self, detail: impl Into<String>, now: i64) -> Result<()> {
        self.transition_to(EdrState::Error, now)?;
        self.error_detail = Some(detail.into());
        Ok(())
    }

    /// Whether some worker holds an unexpired lease at `now`
    pub fn is_leased(&self, now: i64) -> bool {
        self.lease.as_ref().is_some_and(|l| !l.is_expired(now))
    }

    /// Whether `holder` holds an unexpired lease at `now`
    pub fn is_leased_by(&self, holder: &str, now: i64) -> bool {
        self.lease
            .as_ref()
            .is_some_and(|l| l.is_held_by(holder) && !l.is_expired(now))
    }
}

/// Builder for [`EdrEntry`]
#[derive(Debug, Default)]
pub struct EdrEntryBuilder {
    id: Option<String>,
    transfer_process_id: Option<String>,
    asset_id: Option<String>,
    agreement_id: Option<String>,
    contract_negotiation_id: Option<String>,
    provider_id: Option<String>,
    expiration_timestamp: Option<i64>,
    created_at: Option<i64>,
}

impl EdrEntryBuilder {
    /// Set the entry id (defaults to the transfer process id)
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn transfer_process_id(mut self, id: impl Into<String>) -> Self {
        self.transfer_process_id = Some(id.into());
        self
    }

    pub fn asset_id(mut self, id: impl Into<String>) -> Self {
        self.asset_id = Some(id.into());
        self
    }

    pub fn agreement_id(mut self, id: impl Into<String>) -> Self {
        self.agreement_id = Some(id.into());
        self
    }

    pub fn contract_negotiation_id(mut self, id: impl Into<String>) -> Self {
        self.contract_negotiation_id = Some(id.into());
        self
    }

    pub fn provider_id(mut self, id: impl Into<String>) -> Self {
        self.provider_id = Some(id.into());
        self
    }

    pub fn expiration_timestamp(mut self, epoch_ms: i64) -> Self {
        self.expiration_timestamp = Some(epoch_ms);
        self
    }

    /// Creation time; also the initial state timestamp
    pub fn created_at(mut self, epoch_ms: i64) -> Self {
        self.created_at = Some(epoch_ms);
        self
    }

    pub fn build(self) -> Result<EdrEntry> {
        let transfer_process_id = require(self.transfer_process_id, "transferProcessId")?;
        let asset_id = require(self.asset_id, "assetId")?;
        let agreement_id = require(self.agreement_id, "agreementId")?;
        let provider_id = require(self.provider_id, "providerId")?;
        let created_at = self
            .created_at
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

        Ok(EdrEntry {
            id: self.id.unwrap_or_else(|| transfer_process_id.clone()),
            transfer_process_id,
            asset_id,
            agreement_id,
            contract_negotiation_id: self.contract_negotiation_id,
            provider_id,
            state: EdrState::Negotiated,
            state_timestamp: created_at,
            expiration_timestamp: self.expiration_timestamp,
            error_detail: None,
            lease: None,
            created_at,
            version: 0,
        })
    }
}

fn require(value: Option<String>, name: &str) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(EdrError::MissingField(name.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> EdrEntry {
        EdrEntry::builder()
            .transfer_process_id("tp-1")
            .asset_id("asset-1")
            .agreement_id("agreement-1")
            .provider_id("provider")
            .expiration_timestamp(10_000)
            .created_at(1_000)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_defaults() {
        let e = entry();
        assert_eq!(e.id, "tp-1");
        assert_eq!(e.state, EdrState::Negotiated);
        assert_eq!(e.state_timestamp, 1_000);
        assert_eq!(e.version, 0);
        assert!(e.lease.is_none());
    }

    #[test]
    fn test_builder_missing_field() {
        let result = EdrEntry::builder()
            .transfer_process_id("tp-1")
            .asset_id("asset-1")
            .provider_id("provider")
            .build();

        match result {
            Err(EdrError::MissingField(name)) => assert_eq!(name, "agreementId"),
            other => panic!("Expected MissingField, got {:?}", other),
        }
    }

    #[test]
    fn test_transition_stamps_time() {
        let mut e = entry();
        e.transition_to(EdrState::Refreshing, 5_000).unwrap();
        assert_eq!(e.state, EdrState::Refreshing);
        assert_eq!(e.state_timestamp, 5_000);
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut e = entry();
        e.transition_to(EdrState::Expired, 5_000).unwrap();
        let err = e.transition_to(EdrState::Refreshing, 6_000).unwrap_err();
        assert!(matches!(err, EdrError::InvalidTransition { .. }));
        assert_eq!(e.state, EdrState::Expired);
        assert_eq!(e.state_timestamp, 5_000);
    }

    #[test]
    fn test_error_detail_cleared_on_recovery() {
        let mut e = entry();
        e.transition_to_error("transfer process not found", 2_000).unwrap();
        assert_eq!(e.error_detail.as_deref(), Some("transfer process not found"));

        e.transition_to(EdrState::Negotiated, 3_000).unwrap();
        assert!(e.error_detail.is_none());
    }

    #[test]
    fn test_lease_expiry() {
        let lease = Lease::new("worker-a", 1_000, 500);
        assert_eq!(lease.expires_at(), 1_500);
        assert!(!lease.is_expired(1_499));
        assert!(lease.is_expired(1_500));

        let mut e = entry();
        e.lease = Some(lease);
        assert!(e.is_leased_by("worker-a", 1_200));
        assert!(!e.is_leased_by("worker-b", 1_200));
        assert!(!e.is_leased(2_000));
    }

    #[test]
    fn test_state_parsing() {
        for state in EdrState::ALL {
            assert_eq!(state.as_str().parse::<EdrState>().unwrap(), state);
        }
        assert_eq!("refreshing".parse::<EdrState>().unwrap(), EdrState::Refreshing);
        assert!("DELETED".parse::<EdrState>().is_err());
    }
}
