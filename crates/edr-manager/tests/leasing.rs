//! Lease coordination and optimistic concurrency across workers

mod common;

use async_trait::async_trait;
use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

use common::{
    config, entry, seed, PendingInstall, RecordingStore, ScriptedRenewer, LEAD, RETENTION, T0,
};
use edr_core::{Credential, EdrEntry, EdrState};
use edr_manager::storage::EdrStore;
use edr_manager::{EdrManager, EntryQuery, MemoryStore, MockClock, RenewalOutcome, Renewer, StorageError};

const LEASE_MS: i64 = 60_000;

fn store(clock: &Arc<MockClock>) -> Arc<MemoryStore> {
    Arc::new(MemoryStore::with_clock(clock.clone()).with_lease_duration(LEASE_MS))
}

fn due() -> EntryQuery {
    EntryQuery::by_state(EdrState::Negotiated).expiring_before(T0 + LEAD)
}

#[tokio::test]
async fn test_two_managers_never_process_the_same_entry() {
    let clock = Arc::new(MockClock::new(T0));
    let store = store(&clock);
    for i in 0..40 {
        seed(&*store, entry(&format!("tp-{:02}", i), T0 + LEAD / 2), EdrState::Negotiated, T0).await;
    }

    let mut config = config();
    config.negotiated.batch_size = 3;
    let renewer_a = Arc::new(ScriptedRenewer::default());
    let renewer_b = Arc::new(ScriptedRenewer::default());
    let a = Arc::new(
        EdrManager::new(&config, store.clone(), renewer_a.clone(), clock.clone()).with_holder("holder-a"),
    );
    let b = Arc::new(
        EdrManager::new(&config, store.clone(), renewer_b.clone(), clock.clone()).with_holder("holder-b"),
    );

    let run = |manager: Arc<EdrManager>| async move {
        for _ in 0..20 {
            manager.process_state(EdrState::Negotiated).await.unwrap();
            tokio::task::yield_now().await;
        }
    };
    let (done_a, done_b) = tokio::join!(tokio::spawn(run(a)), tokio::spawn(run(b)));
    done_a.unwrap();
    done_b.unwrap();

    let mut seen = renewer_a.calls();
    seen.extend(renewer_b.calls());
    let unique: HashSet<_> = seen.iter().cloned().collect();
    assert_eq!(seen.len(), 40);
    assert_eq!(unique.len(), 40);

    let refreshing = store
        .query(&EntryQuery::by_state(EdrState::Refreshing))
        .await
        .unwrap();
    assert_eq!(refreshing.len(), 40);
}

#[tokio::test]
async fn test_stale_update_conflicts() {
    let clock = Arc::new(MockClock::new(T0));
    let store = store(&clock);
    let created = seed(&*store, entry("tp-1", T0 + 600_000), EdrState::Negotiated, T0).await;

    let mut first = created.clone();
    first.transition_to(EdrState::Refreshing, T0).unwrap();
    let written = store.update(&first).await.unwrap();
    assert_eq!(written.version, created.version + 1);

    let mut second = created;
    second.transition_to(EdrState::Expired, T0).unwrap();
    assert!(matches!(
        store.update(&second).await,
        Err(StorageError::Conflict(_))
    ));
    assert_eq!(
        store.find_by_id("tp-1").await.unwrap().unwrap().state,
        EdrState::Refreshing
    );
}

#[tokio::test]
async fn test_live_lease_blocks_other_claims_until_expiry() {
    let clock = Arc::new(MockClock::new(T0));
    let store = store(&clock);
    seed(&*store, entry("tp-1", T0 + LEAD / 2), EdrState::Negotiated, T0).await;

    let claimed = store.next_not_leased("holder-a", 10, &due()).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert!(store.next_not_leased("holder-b", 10, &due()).await.unwrap().is_empty());

    clock.advance(LEASE_MS);
    let reclaimed = store.next_not_leased("holder-b", 10, &due()).await.unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert!(reclaimed[0].is_leased_by("holder-b", T0 + LEASE_MS));

    // The expired holder's write is now stale
    let mut late = claimed[0].clone();
    late.transition_to(EdrState::Refreshing, T0).unwrap();
    assert!(matches!(store.update(&late).await, Err(StorageError::Conflict(_))));
}

#[tokio::test]
async fn test_break_lease_only_by_holder() {
    let clock = Arc::new(MockClock::new(T0));
    let store = store(&clock);
    seed(&*store, entry("tp-1", T0 + LEAD / 2), EdrState::Negotiated, T0).await;
    store.next_not_leased("holder-a", 10, &due()).await.unwrap();

    store.break_lease("tp-1", "holder-b").await.unwrap();
    assert!(store.next_not_leased("holder-b", 10, &due()).await.unwrap().is_empty());

    store.break_lease("tp-1", "holder-a").await.unwrap();
    assert_eq!(store.next_not_leased("holder-b", 10, &due()).await.unwrap().len(), 1);
}

/// Installs a credential for the entry while its renewal is in flight
struct InstallingRenewer {
    store: Arc<MemoryStore>,
}

#[async_trait]
impl Renewer for InstallingRenewer {
    async fn renew(&self, entry: &EdrEntry, _credential: Option<&Credential>) -> RenewalOutcome {
        self.store
            .install_credential(
                &entry.transfer_process_id,
                Credential::new("HttpData").with_authorization("installed"),
                Some(T0 + 3_600_000),
            )
            .await
            .unwrap();
        RenewalOutcome::Pending
    }
}

#[tokio::test]
async fn test_install_during_lease_wins_over_scheduler_write() {
    let clock = Arc::new(MockClock::new(T0));
    let store = store(&clock);
    seed(&*store, entry("tp-1", T0 + LEAD / 2), EdrState::Negotiated, T0).await;

    let renewer = Arc::new(InstallingRenewer { store: store.clone() });
    let manager = Arc::new(
        EdrManager::new(&config(), store.clone(), renewer, clock.clone()).with_holder("holder-a"),
    );

    assert_eq!(manager.process_state(EdrState::Negotiated).await.unwrap(), 0);

    let stored = store.find_by_id("tp-1").await.unwrap().unwrap();
    assert_eq!(stored.state, EdrState::Negotiated);
    assert_eq!(stored.expiration_timestamp, Some(T0 + 3_600_000));
    assert!(stored.lease.is_none());
    assert_eq!(
        store.get_credential("tp-1").await.unwrap().unwrap().authorization.as_deref(),
        Some("installed")
    );
}

#[tokio::test]
async fn test_install_during_retention_sweep_keeps_entry() {
    let clock = Arc::new(MockClock::new(T0));
    let store = Arc::new(RecordingStore::new(clock.clone()));
    seed(&*store, entry("tp-1", T0 - RETENTION - 1), EdrState::Expired, T0 - RETENTION).await;
    store.clear();
    store.install_after_next_claim(PendingInstall {
        transfer_process_id: "tp-1".into(),
        credential: Credential::new("HttpData").with_authorization("installed"),
        expiration_timestamp: Some(T0 + 3_600_000),
    });

    let manager = Arc::new(
        EdrManager::new(&config(), store.clone(), Arc::new(ScriptedRenewer::default()), clock.clone())
            .with_holder("holder-a"),
    );
    assert_eq!(manager.process_state(EdrState::Expired).await.unwrap(), 0);

    assert!(store.writes().is_empty());
    let stored = store.find_by_id("tp-1").await.unwrap().unwrap();
    assert_eq!(stored.state, EdrState::Negotiated);
    assert_eq!(stored.expiration_timestamp, Some(T0 + 3_600_000));
    assert_eq!(
        store.get_credential("tp-1").await.unwrap().unwrap().authorization.as_deref(),
        Some("installed")
    );
}

#[tokio::test]
async fn test_install_recovers_error_entry() {
    let clock = Arc::new(MockClock::new(T0));
    let store = store(&clock);
    seed(&*store, entry("tp-1", T0 + 600_000), EdrState::Error, T0).await;

    let installed = store
        .install_credential("tp-1", Credential::new("HttpData"), Some(T0 + 900_000))
        .await
        .unwrap();

    assert_eq!(installed.state, EdrState::Negotiated);
    assert_eq!(installed.state_timestamp, T0);
    assert!(installed.error_detail.is_none());
}

proptest! {
    #[test]
    fn prop_claims_are_disjoint(entries in 1usize..30, batch_a in 1usize..8, batch_b in 1usize..8) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let clock = Arc::new(MockClock::new(T0));
            let store = store(&clock);
            for i in 0..entries {
                seed(&*store, entry(&format!("tp-{}", i), T0 + LEAD / 2), EdrState::Negotiated, T0).await;
            }

            let mut claimed_a = HashSet::new();
            let mut claimed_b = HashSet::new();
            loop {
                let a = store.next_not_leased("holder-a", batch_a, &due()).await.unwrap();
                let b = store.next_not_leased("holder-b", batch_b, &due()).await.unwrap();
                if a.is_empty() && b.is_empty() {
                    break;
                }
                claimed_a.extend(a.into_iter().map(|e| e.id));
                claimed_b.extend(b.into_iter().map(|e| e.id));
            }

            prop_assert!(claimed_a.is_disjoint(&claimed_b));
            prop_assert_eq!(claimed_a.len() + claimed_b.len(), entries);
            Ok(())
        })?;
    }
}
