//! JSON run configuration.
//!
//! ```json
//! {
//!   "backends": [
//!     { "provider": "echo", "model_id": "dry-run", "rate_limit": 4.0 }
//!   ],
//!   "start_index": 0,
//!   "custom_prompt": "Keep product names in English.",
//!   "chunk_budget": 4096,
//!   "retry": { "chunk_attempts": 6, "record_credits": 3 }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::pipeline::retry::{CreditPolicy, RetryPolicy};

pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(alias = "models")]
    pub backends: Vec<BackendConfig>,
    /// Records before this index are skipped (resume support).
    pub start_index: u64,
    pub custom_prompt: Option<String>,
    pub chunk_budget: Option<usize>,
    pub retry: RetryConfig,
}

/// One backend entry. Connection and sampling fields are for provider
/// integrations; `echo` ignores them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub provider: String,
    pub model_id: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub location: Option<String>,
    pub project: Option<String>,
    pub temperature: Option<f32>,
    /// Calls per second.
    pub rate_limit: Option<f64>,
    pub burst: Option<u32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub chunk_attempts: u32,
    pub capacity_waits: u32,
    pub capacity_delay_ms: u64,
    pub capacity_jitter_ms: u64,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub record_credits: u32,
    pub record_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            chunk_attempts: 6,
            capacity_waits: 32,
            capacity_delay_ms: 5_000,
            capacity_jitter_ms: 5_000,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            record_credits: 3,
            record_backoff_ms: 10_000,
        }
    }
}

impl RetryConfig {
    /// Zero delays everywhere; keeps the attempt and credit counts.
    pub fn immediate(mut self) -> Self {
        self.capacity_delay_ms = 0;
        self.capacity_jitter_ms = 0;
        self.base_delay_ms = 0;
        self.max_delay_ms = 0;
        self.record_backoff_ms = 0;
        self
    }

    pub fn chunk_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.chunk_attempts)
            .base_delay(Duration::from_millis(self.base_delay_ms))
            .max_delay(Duration::from_millis(self.max_delay_ms))
            .capacity_delay(
                Duration::from_millis(self.capacity_delay_ms),
                Duration::from_millis(self.capacity_jitter_ms),
            )
            .max_capacity_waits(self.capacity_waits)
    }

    pub fn credit_policy(&self) -> CreditPolicy {
        CreditPolicy::new(self.record_credits)
            .max_backoff(Duration::from_millis(self.record_backoff_ms))
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|err| {
            Error::config(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_slice(&data)
            .map_err(|err| Error::config(format!("{}: {err}", path.display())))
    }

    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let config: Config = serde_json::from_slice(data)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `$CONFIG_PATH`, falling back to `config.json`.
    pub fn from_env() -> Result<(PathBuf, Self)> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        let path = std::path::absolute(&path).unwrap_or(path);
        let config = Self::load(&path)?;
        Ok((path, config))
    }

    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(Error::config("no backends configured"));
        }
        for (index, def) in self.backends.iter().enumerate() {
            if def.provider.is_empty() {
                return Err(Error::config(format!("backend #{index}: missing provider")));
            }
            if let Some(rate) = def.rate_limit {
                if !rate.is_finite() || rate <= 0.0 {
                    return Err(Error::config(format!(
                        "backend #{index}: rate_limit must be positive, got {rate}"
                    )));
                }
            }
        }
        if self.chunk_budget == Some(0) {
            return Err(Error::InvalidBudget(0));
        }
        Ok(())
    }
}
