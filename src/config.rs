//! Configuration file support.
//!
//! Configuration is read from TOML; every field has a default so a missing
//! file or a partial file is fine. A few values can also be overridden from
//! the environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_STORE_DIR: &str = ".rollup-store";
const DEFAULT_MAX_VOTES_PER_ROLLUP: usize = 4096;
const DEFAULT_MAX_VOTES_FILE_SIZE: u64 = 10 * 1024 * 1024;
const DEFAULT_MAX_PROOF_FILE_SIZE: u64 = 16 * 1024 * 1024;

/// Environment variable holding the aggregator private key (hex).
pub const AGGREGATOR_KEY_ENV: &str = "ROLLUP_AGGREGATOR_KEY";
/// Environment override for [`LimitsConfig::max_proof_file_size`].
pub const MAX_PROOF_FILE_SIZE_ENV: &str = "ROLLUP_MAX_PROOF_FILE_SIZE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,
    /// When false the binaries keep everything in memory.
    #[serde(default = "default_enable_persistence")]
    pub enable_persistence: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Hex private key used to sign step attestations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_votes_per_rollup")]
    pub max_votes_per_rollup: usize,
    #[serde(default = "default_max_votes_file_size")]
    pub max_votes_file_size: u64,
    #[serde(default = "default_max_proof_file_size")]
    pub max_proof_file_size: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_STORE_DIR),
            enable_persistence: true,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_votes_per_rollup: DEFAULT_MAX_VOTES_PER_ROLLUP,
            max_votes_file_size: DEFAULT_MAX_VOTES_FILE_SIZE,
            max_proof_file_size: DEFAULT_MAX_PROOF_FILE_SIZE,
        }
    }
}

fn default_store_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_DIR)
}

fn default_enable_persistence() -> bool {
    true
}

fn default_max_votes_per_rollup() -> usize {
    DEFAULT_MAX_VOTES_PER_ROLLUP
}

fn default_max_votes_file_size() -> u64 {
    DEFAULT_MAX_VOTES_FILE_SIZE
}

fn default_max_proof_file_size() -> u64 {
    DEFAULT_MAX_PROOF_FILE_SIZE
}

impl AggregatorConfig {
    /// The environment variable wins over the file value.
    pub fn resolve_private_key(&self) -> Option<String> {
        std::env::var(AGGREGATOR_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| self.private_key.clone())
    }
}

impl LimitsConfig {
    pub fn effective_max_proof_file_size(&self) -> u64 {
        std::env::var(MAX_PROOF_FILE_SIZE_ENV)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(self.max_proof_file_size)
    }
}

impl Config {
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn load_from_file_or_default(path: &PathBuf) -> Self {
        Self::load_from_file(path).unwrap_or_default()
    }

    pub fn save_to_file(&self, path: &PathBuf) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}
