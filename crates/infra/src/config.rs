//! Workflow configuration, read from the environment.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use scf_financing::DEFAULT_OFFER_TTL_HOURS;

use crate::jobs::RetryPolicy;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got '{value}'")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub offer_ttl_hours: i64,
    pub offer_sweep_interval_secs: u64,
    pub bid_sweep_interval_secs: u64,
    pub repayment_sweep_interval_secs: u64,
    pub contract_retry_max_attempts: u32,
    pub contract_retry_base_delay_ms: u64,
    pub contract_worker_poll_ms: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            offer_ttl_hours: DEFAULT_OFFER_TTL_HOURS,
            offer_sweep_interval_secs: 300,
            bid_sweep_interval_secs: 300,
            repayment_sweep_interval_secs: 3600,
            contract_retry_max_attempts: 5,
            contract_retry_base_delay_ms: 500,
            contract_worker_poll_ms: 1000,
        }
    }
}

impl WorkflowConfig {
    /// Defaults overridden by `SCF_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            offer_ttl_hours: read(&lookup, "SCF_OFFER_TTL_HOURS", defaults.offer_ttl_hours)?,
            offer_sweep_interval_secs: read(
                &lookup,
                "SCF_OFFER_SWEEP_SECS",
                defaults.offer_sweep_interval_secs,
            )?,
            bid_sweep_interval_secs: read(
                &lookup,
                "SCF_BID_SWEEP_SECS",
                defaults.bid_sweep_interval_secs,
            )?,
            repayment_sweep_interval_secs: read(
                &lookup,
                "SCF_REPAYMENT_SWEEP_SECS",
                defaults.repayment_sweep_interval_secs,
            )?,
            contract_retry_max_attempts: read(
                &lookup,
                "SCF_CONTRACT_RETRY_ATTEMPTS",
                defaults.contract_retry_max_attempts,
            )?,
            contract_retry_base_delay_ms: read(
                &lookup,
                "SCF_CONTRACT_RETRY_BASE_MS",
                defaults.contract_retry_base_delay_ms,
            )?,
            contract_worker_poll_ms: read(
                &lookup,
                "SCF_CONTRACT_WORKER_POLL_MS",
                defaults.contract_worker_poll_ms,
            )?,
        })
    }

    pub fn offer_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.offer_ttl_hours)
    }

    pub fn contract_retry_policy(&self) -> RetryPolicy {
        let base = Duration::from_millis(self.contract_retry_base_delay_ms);
        RetryPolicy::exponential(self.contract_retry_max_attempts, base, base * 64)
    }

    pub fn contract_worker_poll(&self) -> Duration {
        Duration::from_millis(self.contract_worker_poll_ms)
    }
}

fn read<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Default,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) if value > T::default() => Ok(value),
            _ => Err(ConfigError::Invalid { var, value: raw }),
        },
    }
}
