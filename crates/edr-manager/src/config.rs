//! Manager configuration
//!
//! Defaults suit a single local instance. [`ManagerConfig::from_env`] applies
//! `EDR_*` environment overrides on top of them.

use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use edr_core::{EdrState, LifecyclePolicy};

use crate::storage::DEFAULT_LEASE_DURATION_MS;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: '{value}'")]
    InvalidValue { name: String, value: String },
}

/// Settings of one per-state polling loop
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    pub enabled: bool,
    /// Entries claimed per tick
    pub batch_size: usize,
    pub poll_interval_ms: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            batch_size: 20,
            poll_interval_ms: 5_000,
        }
    }
}

impl LoopConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Settings of the issuer-side `/token` endpoint
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TokenIssuerConfig {
    /// Validity of minted access tokens in seconds
    pub token_validity_secs: u64,
    /// Allowed clock skew when checking assertion times
    pub leeway_secs: i64,
}

impl Default for TokenIssuerConfig {
    fn default() -> Self {
        Self {
            token_validity_secs: 300,
            leeway_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Identity of this participant, used as assertion issuer and lease prefix
    pub participant_id: String,
    pub port: u16,
    pub lease_duration_ms: i64,
    pub policy: LifecyclePolicy,
    pub negotiated: LoopConfig,
    pub refreshing: LoopConfig,
    pub error: LoopConfig,
    pub expired: LoopConfig,
    pub issuer: TokenIssuerConfig,
    pub database_url: Option<String>,
    pub log_level: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            participant_id: "did:web:localhost".into(),
            port: 8080,
            lease_duration_ms: DEFAULT_LEASE_DURATION_MS,
            policy: LifecyclePolicy::default(),
            negotiated: LoopConfig::default(),
            refreshing: LoopConfig::default(),
            error: LoopConfig::default(),
            expired: LoopConfig {
                poll_interval_ms: 60_000,
                ..LoopConfig::default()
            },
            issuer: TokenIssuerConfig::default(),
            database_url: None,
            log_level: "info".into(),
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

impl ManagerConfig {
    /// Defaults overridden by `EDR_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(id) = env::var("EDR_PARTICIPANT_ID") {
            config.participant_id = id;
        }
        if let Some(port) = parse_var("EDR_PORT")? {
            config.port = port;
        }
        if let Some(secs) = parse_var::<i64>("EDR_LEAD_TIME_SECS")? {
            config.policy.lead_time_ms = secs * 1_000;
        }
        if let Some(secs) = parse_var::<i64>("EDR_REFRESH_DEADLINE_SECS")? {
            config.policy.refresh_deadline_ms = secs * 1_000;
        }
        if let Some(secs) = parse_var::<i64>("EDR_RETENTION_SECS")? {
            config.policy.retention_period_ms = secs * 1_000;
        }
        if let Some(secs) = parse_var::<i64>("EDR_LEASE_SECS")? {
            config.lease_duration_ms = secs * 1_000;
        }
        if let Some(batch) = parse_var::<usize>("EDR_BATCH_SIZE")? {
            for l in config.loops_mut() {
                l.batch_size = batch;
            }
        }
        if let Some(interval) = parse_var::<u64>("EDR_POLL_INTERVAL_MS")? {
            for l in config.loops_mut() {
                l.poll_interval_ms = interval;
            }
        }
        if let Some(secs) = parse_var("EDR_TOKEN_VALIDITY_SECS")? {
            config.issuer.token_validity_secs = secs;
        }
        config.database_url = env::var("EDR_DATABASE_URL").ok().filter(|s| !s.is_empty());
        if let Ok(level) = env::var("EDR_LOG_LEVEL") {
            config.log_level = level;
        }

        Ok(config)
    }

    /// Loop settings for a monitored state
    pub fn loop_config(&self, state: EdrState) -> &LoopConfig {
        match state {
            EdrState::Negotiated => &self.negotiated,
            EdrState::Refreshing => &self.refreshing,
            EdrState::Error => &self.error,
            EdrState::Expired => &self.expired,
        }
    }

    fn loops_mut(&mut self) -> [&mut LoopConfig; 4] {
        [
            &mut self.negotiated,
            &mut self.refreshing,
            &mut self.error,
            &mut self.expired,
        ]
    }

    /// Fresh lease holder id for one manager instance
    pub fn lease_holder(&self) -> String {
        format!("{}-{}", self.participant_id, uuid::Uuid::new_v4())
    }
}
