//! Node configuration types

use crate::genesis::GenesisConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tally_core::constants::{MAX_DISTRIBUTION_INTERVAL_SECS, MAX_LOCK_DAYS};
use tally_core::Amount;
use tally_economics::{MarketplacePolicy, PoolConfig, TokenPolicy};
use tally_storage::StoreConfig;
use thiserror::Error;

/// Configuration loading and validation failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Complete node configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node operation settings
    #[serde(default)]
    pub node: NodeSettings,

    /// Ledger store settings
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Fee and supply policy
    #[serde(default)]
    pub token: TokenPolicy,

    /// Staking pools and distribution cadence
    #[serde(default)]
    pub staking: StakingConfig,

    /// Marketplace revenue splits
    #[serde(default)]
    pub marketplace: MarketplacePolicy,

    /// Initial allocations
    #[serde(default)]
    pub genesis: GenesisConfig,

    /// Snapshot persistence
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NodeConfig {
    /// Parse and validate TOML
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values no ledger can run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.ledger.lock_timeout_ms == 0 {
            return invalid("ledger.lock_timeout_ms must be positive".into());
        }

        for (name, bps) in [
            ("token.transfer_fee_bps", self.token.transfer_fee_bps),
            ("marketplace.creator_share_bps", self.marketplace.creator_share_bps),
            ("marketplace.tip_fee_bps", self.marketplace.tip_fee_bps),
            ("marketplace.referral_bps", self.marketplace.referral_bps),
        ] {
            if bps > 10_000 {
                return invalid(format!("{name} must be at most 10000, got {bps}"));
            }
        }

        if self.token.max_supply.is_zero() {
            return invalid("token.max_supply must be positive".into());
        }
        if self.marketplace.referral_min > self.marketplace.referral_max {
            return invalid(format!(
                "marketplace.referral_min {} exceeds referral_max {}",
                self.marketplace.referral_min, self.marketplace.referral_max
            ));
        }

        if self.staking.distribution_interval_secs == 0 || self.staking.sweep_check_secs == 0 {
            return invalid("staking intervals must be positive".into());
        }
        if self.staking.distribution_interval_secs > MAX_DISTRIBUTION_INTERVAL_SECS {
            return invalid(format!(
                "staking.distribution_interval_secs must be at most {MAX_DISTRIBUTION_INTERVAL_SECS}"
            ));
        }
        let mut names = BTreeSet::new();
        for pool in &self.staking.pools {
            if pool.name.trim().is_empty() {
                return invalid("staking pool name must not be empty".into());
            }
            if !names.insert(pool.name.as_str()) {
                return invalid(format!("duplicate staking pool {}", pool.name));
            }
            if pool.multiplier_bonus_bps < 10_000 {
                return invalid(format!(
                    "pool {} multiplier_bonus_bps must be at least 10000",
                    pool.name
                ));
            }
            if pool.max_lock_days > MAX_LOCK_DAYS {
                return invalid(format!(
                    "pool {} max_lock_days must be at most {MAX_LOCK_DAYS}",
                    pool.name
                ));
            }
            if pool.lock_days_default > pool.max_lock_days {
                return invalid(format!(
                    "pool {} lock_days_default exceeds max_lock_days",
                    pool.name
                ));
            }
        }

        let genesis_total = self
            .genesis
            .total()
            .ok_or_else(|| ConfigError::Invalid("genesis allocations overflow".into()))?;
        if genesis_total > self.token.max_supply {
            return invalid(format!(
                "genesis allocations {} exceed max supply {}",
                genesis_total, self.token.max_supply
            ));
        }

        if self.snapshot.interval_secs == 0 {
            return invalid("snapshot.interval_secs must be positive".into());
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return invalid(format!("logging.format must be text or json, got {}", self.logging.format));
        }

        Ok(())
    }

    /// Store settings derived from `[ledger]`
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            welcome_bonus: self.ledger.welcome_bonus,
            lock_timeout: Duration::from_millis(self.ledger.lock_timeout_ms),
        }
    }

    /// Snapshot file, resolved against the data directory when relative
    pub fn snapshot_path(&self) -> PathBuf {
        let path = Path::new(&self.snapshot.path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.node.data_dir).join(path)
        }
    }
}

/// Basic node settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Node name
    #[serde(default = "default_node_name")]
    pub name: String,

    /// Data directory
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_node_name() -> String {
    "tally-node".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            data_dir: default_data_dir(),
        }
    }
}

/// Ledger store settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Credit for each new user account, paid by the rewards pool
    #[serde(default = "default_welcome_bonus")]
    pub welcome_bonus: Amount,

    /// Writer lock wait before `Contended`
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_welcome_bonus() -> Amount {
    Amount::from_tokens(10)
}

fn default_lock_timeout_ms() -> u64 {
    500
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            welcome_bonus: default_welcome_bonus(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

/// Staking settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StakingConfig {
    /// Payout period per position
    #[serde(default = "default_distribution_interval")]
    pub distribution_interval_secs: u64,

    /// How often the node looks for due positions
    #[serde(default = "default_sweep_check")]
    pub sweep_check_secs: u64,

    /// Pools
    #[serde(default = "PoolConfig::defaults")]
    pub pools: Vec<PoolConfig>,
}

fn default_distribution_interval() -> u64 {
    86_400
}

fn default_sweep_check() -> u64 {
    60
}

impl Default for StakingConfig {
    fn default() -> Self {
        Self {
            distribution_interval_secs: default_distribution_interval(),
            sweep_check_secs: default_sweep_check(),
            pools: PoolConfig::defaults(),
        }
    }
}

impl StakingConfig {
    /// Interval as a duration, capped at the longest valid setting
    pub fn distribution_interval(&self) -> chrono::Duration {
        let secs = self.distribution_interval_secs.min(MAX_DISTRIBUTION_INTERVAL_SECS);
        chrono::Duration::seconds(secs as i64)
    }
}

/// Snapshot settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Snapshot file (relative paths live under the data directory)
    #[serde(default = "default_snapshot_path")]
    pub path: String,

    /// Seconds between periodic snapshots
    #[serde(default = "default_snapshot_interval")]
    pub interval_secs: u64,
}

fn default_snapshot_path() -> String {
    "ledger.snap".to_string()
}

fn default_snapshot_interval() -> u64 {
    300
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            path: default_snapshot_path(),
            interval_secs: default_snapshot_interval(),
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (`text` or `json`)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
