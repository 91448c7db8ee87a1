//! Lease-based EDR scheduler
//!
//! One polling loop per monitored state. Each tick claims a batch of entries
//! with [`EdrStore::next_not_leased`], evaluates each against the lifecycle
//! policy and applies exactly one of: release the lease, `update`, or
//! `delete_if_current`. Handler errors and panics stay inside the loop; the
//! lease is released best-effort and otherwise expires on its own.

pub mod renewal;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use edr_core::{evaluate, Decision, EdrEntry, EdrState, LifecyclePolicy};

use crate::clock::Clock;
use crate::config::{LoopConfig, ManagerConfig};
use crate::error::Result;
use crate::storage::{EdrStore, EntryQuery, StorageError};

pub use renewal::{CompositeRenewal, RenewalOutcome, Renewer, TokenRefreshRenewal, TransferRenewal};

/// States the scheduler polls
pub const MONITORED_STATES: [EdrState; 4] = [
    EdrState::Negotiated,
    EdrState::Refreshing,
    EdrState::Error,
    EdrState::Expired,
];

/// Drives cached entries through their lifecycle
pub struct EdrManager {
    store: Arc<dyn EdrStore>,
    renewer: Arc<dyn Renewer>,
    clock: Arc<dyn Clock>,
    policy: LifecyclePolicy,
    loops: HashMap<EdrState, LoopConfig>,
    holder: String,
}

impl EdrManager {
    pub fn new(
        config: &ManagerConfig,
        store: Arc<dyn EdrStore>,
        renewer: Arc<dyn Renewer>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let loops = MONITORED_STATES
            .iter()
            .map(|s| (*s, config.loop_config(*s).clone()))
            .collect();
        Self {
            store,
            renewer,
            clock,
            policy: config.policy,
            loops,
            holder: config.lease_holder(),
        }
    }

    /// Use a fixed lease holder id
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    /// Lease holder id of this instance
    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    /// Claim criteria for a state's loop at `now`
    fn claim_query(&self, state: EdrState, now: i64) -> EntryQuery {
        let query = EntryQuery::by_state(state);
        match state {
            EdrState::Negotiated => {
                query.expiring_before(now.saturating_add(self.policy.lead_time_ms))
            }
            EdrState::Refreshing => {
                query.state_changed_before(now.saturating_sub(self.policy.refresh_deadline_ms))
            }
            EdrState::Error => query.expiring_before(now),
            EdrState::Expired => {
                query.expiring_before(now.saturating_sub(self.policy.retention_period_ms))
            }
        }
    }

    /// Run one tick of the loop for `state`, returning how many entries were
    /// handled without error
    pub async fn process_state(self: &Arc<Self>, state: EdrState) -> std::result::Result<usize, StorageError> {
        let batch_size = self.loops.get(&state).map_or(0, |l| l.batch_size);
        let now = self.clock.now_millis();
        let query = self.claim_query(state, now);

        let entries = self
            .store
            .next_not_leased(&self.holder, batch_size, &query)
            .await?;
        if entries.is_empty() {
            return Ok(0);
        }
        debug!(state = %state, count = entries.len(), holder = %self.holder, "Claimed entries");

        let mut handled = 0;
        for entry in entries {
            let id = entry.id.clone();
            let tp_id = entry.transfer_process_id.clone();
            let this = Arc::clone(self);
            match tokio::spawn(async move { this.process_entry(entry).await }).await {
                Ok(Ok(())) => handled += 1,
                Ok(Err(e)) if e.is_conflict() => {
                    info!(tp_id = %tp_id, "Entry changed concurrently, skipping");
                    self.release(&id).await;
                }
                Ok(Err(e)) => {
                    error!(tp_id = %tp_id, state = %state, error = %e, "Failed to process entry");
                    self.release(&id).await;
                }
                Err(e) => {
                    error!(tp_id = %tp_id, state = %state, error = %e, "Entry handler panicked");
                    self.release(&id).await;
                }
            }
        }
        Ok(handled)
    }

    /// Apply the lifecycle decision for one claimed entry
    async fn process_entry(&self, mut entry: EdrEntry) -> Result<()> {
        let now = self.clock.now_millis();

        match evaluate(&entry, now, &self.policy) {
            Decision::Keep => {
                self.store.break_lease(&entry.id, &self.holder).await?;
            }
            Decision::Expire => {
                entry.transition_to(EdrState::Expired, now)?;
                self.store.update(&entry).await?;
                info!(tp_id = %entry.transfer_process_id, "EDR expired");
            }
            Decision::Fail(detail) => {
                warn!(tp_id = %entry.transfer_process_id, detail = %detail, "EDR moved to ERROR");
                entry.transition_to_error(detail, now)?;
                self.store.update(&entry).await?;
            }
            Decision::Delete => {
                self.store.delete_if_current(&entry).await?;
                info!(tp_id = %entry.transfer_process_id, "Expired EDR deleted");
            }
            Decision::Renew => self.renew(entry, now).await?,
        }
        Ok(())
    }

    async fn renew(&self, mut entry: EdrEntry, now: i64) -> Result<()> {
        let credential = self
            .store
            .get_credential(&entry.transfer_process_id)
            .await?;

        match self.renewer.renew(&entry, credential.as_ref()).await {
            RenewalOutcome::Pending => {
                entry.transition_to(EdrState::Refreshing, now)?;
                self.store.update(&entry).await?;
                info!(tp_id = %entry.transfer_process_id, "EDR renewal in flight");
            }
            RenewalOutcome::Renewed(renewed) => {
                entry.transition_to(EdrState::Negotiated, now)?;
                // Without a lifetime the old expiration still bounds the entry
                if let Some(secs) = renewed.expires_in {
                    entry.expiration_timestamp =
                        Some(now.saturating_add((secs as i64).saturating_mul(1_000)));
                }
                self.store.update_with_credential(&entry, renewed).await?;
                info!(
                    tp_id = %entry.transfer_process_id,
                    expiration = ?entry.expiration_timestamp,
                    "EDR renewed"
                );
            }
            RenewalOutcome::Transient(reason) => {
                warn!(tp_id = %entry.transfer_process_id, reason = %reason, "Renewal failed, will retry");
                self.store.break_lease(&entry.id, &self.holder).await?;
            }
            RenewalOutcome::Failed(reason) => {
                warn!(tp_id = %entry.transfer_process_id, reason = %reason, "Renewal failed permanently");
                entry.transition_to_error(reason, now)?;
                self.store.update(&entry).await?;
            }
        }
        Ok(())
    }

    async fn release(&self, id: &str) {
        if let Err(e) = self.store.break_lease(id, &self.holder).await {
            debug!(id = %id, error = %e, "Could not release lease, it will expire");
        }
    }

    /// Spawn one polling task per enabled state
    pub fn start(self: Arc<Self>) -> ManagerHandle {
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        for state in MONITORED_STATES {
            let Some(loop_config) = self.loops.get(&state).filter(|l| l.enabled) else {
                info!(state = %state, "Polling loop disabled");
                continue;
            };
            let interval = loop_config.poll_interval();
            let manager = Arc::clone(&self);
            let token = cancel.clone();

            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = token.cancelled() => {
                            info!(state = %state, "Polling loop shutting down");
                            break;
                        }
                        _ = ticker.tick() => {
                            if let Err(e) = manager.process_state(state).await {
                                error!(state = %state, error = %e, "Failed to lease entries");
                            }
                        }
                    }
                }
            }));
        }

        info!(holder = %self.holder, loops = tasks.len(), "EDR manager started");
        ManagerHandle { cancel, tasks }
    }
}

/// Running polling loops
pub struct ManagerHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl ManagerHandle {
    /// Token that stops every loop when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop all loops and wait for in-flight ticks to finish
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Polling loop ended abnormally");
            }
        }
        info!("EDR manager stopped");
    }
}
