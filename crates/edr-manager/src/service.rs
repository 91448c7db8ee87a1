//! EDR service
//!
//! Entry point for negotiation callbacks and data-plane callers: caches new
//! EDRs, installs credentials, answers queries and refreshes tokens on demand.

use std::sync::Arc;
use tracing::{info, warn};

use edr_core::{Credential, EdrEntry, EdrState};
use edr_refresh::TokenRefreshClient;

use crate::clock::Clock;
use crate::error::{Result, ServiceError};
use crate::storage::{EdrStore, EntryQuery};

pub struct EdrService {
    store: Arc<dyn EdrStore>,
    refresh_client: Arc<dyn TokenRefreshClient>,
    clock: Arc<dyn Clock>,
}

impl EdrService {
    pub fn new(
        store: Arc<dyn EdrStore>,
        refresh_client: Arc<dyn TokenRefreshClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            refresh_client,
            clock,
        }
    }

    /// Expiration instant for a credential received at `now`
    fn expiration_for(&self, credential: &Credential, now: i64) -> Option<i64> {
        credential
            .expires_in
            .map(|secs| now.saturating_add((secs as i64).saturating_mul(1_000)))
    }

    /// Cache a newly negotiated EDR.
    ///
    /// When the entry carries no expiration it is derived from the
    /// credential's `expiresIn`.
    pub async fn create_entry(&self, mut entry: EdrEntry, mut credential: Credential) -> Result<EdrEntry> {
        let now = self.clock.now_millis();
        if entry.expiration_timestamp.is_none() {
            entry.expiration_timestamp = self.expiration_for(&credential, now);
        }
        if credential.created_at.is_none() {
            credential.created_at = Some(now);
        }

        let created = self.store.create(entry, credential).await?;
        info!(
            tp_id = %created.transfer_process_id,
            asset_id = %created.asset_id,
            expiration = ?created.expiration_timestamp,
            "Cached EDR"
        );
        Ok(created)
    }

    /// Install a credential delivered for an existing entry
    pub async fn install_credential(
        &self,
        transfer_process_id: &str,
        credential: Credential,
    ) -> Result<EdrEntry> {
        let expiration = self.expiration_for(&credential, self.clock.now_millis());
        Ok(self
            .store
            .install_credential(transfer_process_id, credential, expiration)
            .await?)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<EdrEntry>> {
        Ok(self.store.find_by_id(id).await?)
    }

    pub async fn find_by_transfer_process_id(&self, transfer_process_id: &str) -> Result<Option<EdrEntry>> {
        Ok(self.store.find_by_transfer_process_id(transfer_process_id).await?)
    }

    pub async fn query(&self, query: &EntryQuery) -> Result<Vec<EdrEntry>> {
        Ok(self.store.query(query).await?)
    }

    /// Cached credential for a transfer process
    pub async fn credential(&self, transfer_process_id: &str) -> Result<Credential> {
        self.store
            .get_credential(transfer_process_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Credential for {}", transfer_process_id)))
    }

    /// Remove an entry and its credential
    pub async fn delete(&self, id: &str) -> Result<EdrEntry> {
        Ok(self.store.delete(id).await?)
    }

    /// Refresh the credential cached for `token_id` now.
    ///
    /// The token id is the transfer process id. On success the new credential
    /// is written against the entry version read before the exchange, which
    /// also moves an `ERROR` entry back to `NEGOTIATED`. A credential
    /// installed in the meantime wins and the refresh fails with a conflict.
    pub async fn refresh_token(&self, token_id: &str) -> Result<Credential> {
        let mut entry = self
            .store
            .find_by_transfer_process_id(token_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("EDR {}", token_id)))?;
        let credential = self.credential(token_id).await?;

        let renewed = self.refresh_client.refresh_token(token_id, &credential).await?;

        let now = self.clock.now_millis();
        entry.transition_to(EdrState::Negotiated, now)?;
        if let Some(expiration) = self.expiration_for(&renewed, now) {
            entry.expiration_timestamp = Some(expiration);
        }
        self.store
            .update_with_credential(&entry, renewed.clone())
            .await
            .map_err(|e| {
                warn!(tp_id = %token_id, error = %e, "Discarding refreshed credential");
                e
            })?;

        info!(tp_id = %token_id, "Credential refreshed on demand");
        Ok(renewed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use edr_refresh::RefreshError;
    use parking_lot::Mutex;

    /// Returns a scripted result and records the token ids it saw
    struct ScriptedClient {
        result: std::result::Result<Credential, RefreshError>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TokenRefreshClient for ScriptedClient {
        async fn refresh_token(
            &self,
            token_id: &str,
            _credential: &Credential,
        ) -> edr_refresh::Result<Credential> {
            self.calls.lock().push(token_id.to_string());
            self.result.clone()
        }
    }

    fn service(
        result: std::result::Result<Credential, RefreshError>,
    ) -> (EdrService, Arc<MemoryStore>, Arc<ScriptedClient>) {
        let clock = Arc::new(MockClock::new(1_000_000));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let client = Arc::new(ScriptedClient {
            result,
            calls: Mutex::new(Vec::new()),
        });
        (EdrService::new(store.clone(), client.clone(), clock), store, client)
    }

    fn entry() -> EdrEntry {
        EdrEntry::builder()
            .transfer_process_id("tp-1")
            .asset_id("asset-1")
            .agreement_id("agreement-1")
            .provider_id("did:web:provider")
            .created_at(1_000_000)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_derives_expiration() {
        let (service, _, _) = service(Err(RefreshError::Transport("unused".into())));
        let created = service
            .create_entry(entry(), Credential::default().with_expires_in(300))
            .await
            .unwrap();

        assert_eq!(created.expiration_timestamp, Some(1_300_000));
        assert_eq!(service.credential("tp-1").await.unwrap().created_at, Some(1_000_000));
    }

    #[tokio::test]
    async fn test_refresh_installs_and_recovers_error_entry() {
        let renewed = Credential::default().with_authorization("new").with_expires_in(60);
        let (service, store, client) = service(Ok(renewed.clone()));
        let created = service
            .create_entry(entry(), Credential::default().with_authorization("old"))
            .await
            .unwrap();

        let mut failed = created.clone();
        failed.transition_to_error("renewal rejected", 1_000_000).unwrap();
        store.update(&failed).await.unwrap();

        let result = service.refresh_token("tp-1").await.unwrap();
        assert_eq!(result, renewed);
        assert_eq!(client.calls.lock().as_slice(), ["tp-1".to_string()]);

        let stored = store.find_by_id("tp-1").await.unwrap().unwrap();
        assert_eq!(stored.state, EdrState::Negotiated);
        assert!(stored.error_detail.is_none());
        assert_eq!(stored.expiration_timestamp, Some(1_060_000));
        assert_eq!(service.credential("tp-1").await.unwrap().authorization.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_refresh_failure_leaves_credential() {
        let (service, _, _) = service(Err(RefreshError::Unauthorized("revoked".into())));
        service
            .create_entry(entry(), Credential::default().with_authorization("old"))
            .await
            .unwrap();

        let err = service.refresh_token("tp-1").await.unwrap_err();
        assert!(matches!(err, ServiceError::Refresh(RefreshError::Unauthorized(_))));
        assert_eq!(service.credential("tp-1").await.unwrap().authorization.as_deref(), Some("old"));
    }

    /// Lets a negotiation callback install a credential while the exchange
    /// is in flight
    struct RacingClient {
        store: Arc<MemoryStore>,
    }

    #[async_trait]
    impl TokenRefreshClient for RacingClient {
        async fn refresh_token(
            &self,
            token_id: &str,
            _credential: &Credential,
        ) -> edr_refresh::Result<Credential> {
            self.store
                .install_credential(token_id, Credential::default().with_authorization("callback"), None)
                .await
                .unwrap();
            Ok(Credential::default().with_authorization("refreshed"))
        }
    }

    #[tokio::test]
    async fn test_refresh_loses_to_concurrent_install() {
        let clock = Arc::new(MockClock::new(1_000_000));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let client = Arc::new(RacingClient { store: store.clone() });
        let service = EdrService::new(store.clone(), client, clock);
        service
            .create_entry(entry(), Credential::default().with_authorization("old"))
            .await
            .unwrap();

        let err = service.refresh_token("tp-1").await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(
            service.credential("tp-1").await.unwrap().authorization.as_deref(),
            Some("callback")
        );
    }

    #[tokio::test]
    async fn test_refresh_unknown_token() {
        let (service, _, client) = service(Err(RefreshError::Transport("unused".into())));
        assert!(matches!(
            service.refresh_token("missing").await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
        assert!(client.calls.lock().is_empty());
    }
}
