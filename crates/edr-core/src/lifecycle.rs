//! EDR lifecycle decisions
//!
//! Pure evaluation of an entry against the clock. The scheduler claims
//! entries, asks [`evaluate`] what to do, and turns the answer into exactly one
//! store operation.
//!
//! ```text
//!   NEGOTIATED ──(now ≥ exp − lead)──▶ REFRESHING ──(deadline)──▶ ERROR
//!       │  ▲                               │                        │
//!       │  └──────(credential installed)───┘                        │
//!       └──────────────(exp passed)──────────▶ EXPIRED ◀──(exp)─────┘
//!                                                 │
//!                                    (exp + retention passed)
//!                                                 ▼
//!                                              deleted
//! ```
//!
//! `ERROR` entries are never renewed automatically; they age into `EXPIRED`.

use serde::{Deserialize, Serialize};

use crate::types::{EdrEntry, EdrState};

/// Business timeouts of the lifecycle, all in milliseconds.
///
/// These are distinct from lease durations, which only bound how long a worker
/// may hold a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecyclePolicy {
    /// How long before expiry a renewal starts
    pub lead_time_ms: i64,
    /// How long a renewal may stay in flight before the entry errors
    pub refresh_deadline_ms: i64,
    /// How long expired entries are kept before deletion
    pub retention_period_ms: i64,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            lead_time_ms: 60_000,
            refresh_deadline_ms: 300_000,
            retention_period_ms: 86_400_000,
        }
    }
}

/// What the scheduler should do with a claimed entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Nothing to do; release the lease
    Keep,
    /// Start a renewal of the credential
    Renew,
    /// Mark the entry `EXPIRED`
    Expire,
    /// Mark the entry `ERROR` with the given detail
    Fail(String),
    /// Remove entry and credential
    Delete,
}

impl Decision {
    /// State written by this decision, if it writes one directly.
    ///
    /// `Renew` depends on the renewal outcome and `Delete` removes the entry.
    pub fn target_state(&self) -> Option<EdrState> {
        match self {
            Decision::Expire => Some(EdrState::Expired),
            Decision::Fail(_) => Some(EdrState::Error),
            Decision::Keep | Decision::Renew | Decision::Delete => None,
        }
    }
}

/// Decide what happens to `entry` at `now` (epoch ms).
///
/// Entries without an expiration timestamp are never renewed, expired or
/// swept.
pub fn evaluate(entry: &EdrEntry, now: i64, policy: &LifecyclePolicy) -> Decision {
    match entry.state {
        EdrState::Negotiated => match entry.expiration_timestamp {
            Some(exp) if now >= exp => Decision::Expire,
            Some(exp) if now >= exp.saturating_sub(policy.lead_time_ms) => Decision::Renew,
            _ => Decision::Keep,
        },
        EdrState::Refreshing => {
            if now.saturating_sub(entry.state_timestamp) > policy.refresh_deadline_ms {
                Decision::Fail(format!(
                    "Renewal did not complete within {} ms",
                    policy.refresh_deadline_ms
                ))
            } else {
                Decision::Keep
            }
        }
        EdrState::Error => match entry.expiration_timestamp {
            Some(exp) if now >= exp => Decision::Expire,
            _ => Decision::Keep,
        },
        EdrState::Expired => match entry.expiration_timestamp {
            Some(exp) if now.saturating_sub(exp) > policy.retention_period_ms => Decision::Delete,
            _ => Decision::Keep,
        },
    }
}
