use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, Result};
use crate::path::DerivationPath;

pub const DEFAULT_DERIVATION_PATH: &str = "44'/60'/0'/0";
pub const DEFAULT_WARMUP_MS: u64 = 3000;
pub const DEFAULT_ACQUIRE_DELAY_MS: u64 = 1000;

const ENV_PREFIX: &str = "TREZOR_PROVIDER_";

/// Provider settings. Missing fields take their defaults when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderConfig {
    pub derivation_path: String,
    /// Delay before the first address lookup; 0 disables it.
    pub warmup_ms: u64,
    /// Delay before auto-approving the takeover of a held device.
    pub acquire_delay_ms: u64,
    /// Give up on a queued or running device operation after this long.
    pub operation_timeout_ms: Option<u64>,
    /// Sent with transactions for replay protection.
    pub chain_id: Option<u32>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            derivation_path: DEFAULT_DERIVATION_PATH.to_string(),
            warmup_ms: DEFAULT_WARMUP_MS,
            acquire_delay_ms: DEFAULT_ACQUIRE_DELAY_MS,
            operation_timeout_ms: None,
            chain_id: None,
        }
    }
}

impl ProviderConfig {
    /// Defaults overridden by `TREZOR_PROVIDER_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(&format!("{}{}", ENV_PREFIX, key));
        let mut config = Self::default();

        if let Some(path) = var("DERIVATION_PATH") {
            config.derivation_path = path;
        }
        if let Some(ms) = var("WARMUP_MS") {
            config.warmup_ms = parse_var("WARMUP_MS", &ms)?;
        }
        if let Some(ms) = var("ACQUIRE_DELAY_MS") {
            config.acquire_delay_ms = parse_var("ACQUIRE_DELAY_MS", &ms)?;
        }
        if let Some(ms) = var("OPERATION_TIMEOUT_MS") {
            config.operation_timeout_ms = Some(parse_var("OPERATION_TIMEOUT_MS", &ms)?);
        }
        if let Some(id) = var("CHAIN_ID") {
            config.chain_id = Some(parse_var("CHAIN_ID", &id)?);
        }

        Ok(config)
    }

    /// Check every field and return the parsed derivation path.
    pub fn validate(&self) -> Result<DerivationPath> {
        if self.operation_timeout_ms == Some(0) {
            return Err(ProviderError::Configuration(
                "operation timeout must be greater than zero".to_string(),
            ));
        }
        DerivationPath::parse(&self.derivation_path)
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn acquire_delay(&self) -> Duration {
        Duration::from_millis(self.acquire_delay_ms)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        ProviderError::Configuration(format!("{}{} has invalid value '{}'", ENV_PREFIX, key, value))
    })
}
