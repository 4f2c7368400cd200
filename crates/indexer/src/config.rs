//! Configuration management for the evidence indexer.
//!
//! This module handles loading configuration from:
//! - TOML files
//! - Environment variables referenced as `${VAR}` inside the TOML
//! - Default values (fallbacks)

use alloy::primitives::Address;
use anyhow::{Context, Result};
use evidence_core::constants::{
    DEFAULT_BATCH_SIZE, DEFAULT_HISTORICAL_SYNC_THRESHOLD, EVIDENCE_CONTRACT_NAME,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration for the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Network configuration
    pub network: NetworkConfig,

    /// Evidence contract location
    #[serde(default)]
    pub contract: ContractConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Historical and live sync configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Store write retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Background task configuration
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Ledger RPC URL
    pub rpc_url: String,

    /// Network name, used to locate deployment artifacts (e.g. "localhost", "sepolia")
    #[serde(default = "default_network_name")]
    pub name: String,

    /// Chain ID
    pub chain_id: u64,
}

/// Evidence contract configuration.
///
/// An explicit `address` wins; otherwise the address is read from
/// `<deployments_dir>/<network.name>/<name>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractConfig {
    /// Contract address override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,

    /// Contract name in the deployment directory
    #[serde(default = "default_contract_name")]
    pub name: String,

    /// Root of the deployment artifacts
    #[serde(default = "default_deployments_dir")]
    pub deployments_dir: PathBuf,
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://evidence.db")
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Sync configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Blocks per historical sync batch
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// Pause between historical batches in milliseconds
    #[serde(default = "default_delay_between_batches_ms")]
    pub delay_between_batches_ms: u64,

    /// Attempts per batch before it is skipped
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,

    /// Fixed delay between batch attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Blocks behind the head above which a historical catch-up runs at startup
    #[serde(default = "default_historical_sync_threshold")]
    pub historical_sync_threshold: u64,

    /// Live subscription polling cadence in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Wait before resubscribing after a stream error, in milliseconds
    #[serde(default = "default_resubscribe_delay_ms")]
    pub resubscribe_delay_ms: u64,
}

/// Retry policy for store writes and ledger calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failure in milliseconds
    #[serde(default = "default_retry_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Factor applied to the delay after each failure
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Upper bound for a single delay in milliseconds
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Listener orchestration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Delay before the first startup attempt
    #[serde(default = "default_startup_delay_secs")]
    pub startup_delay_secs: u64,

    /// Delay before retrying a failed startup
    #[serde(default = "default_startup_retry_secs")]
    pub startup_retry_secs: u64,

    /// Unprocessed event sweep interval.
    ///
    /// **Must be > 0**, tokio::time::interval panics on zero.
    #[serde(default = "default_unprocessed_interval_secs")]
    pub unprocessed_interval_secs: u64,

    /// Events handled per sweep
    #[serde(default = "default_unprocessed_page_size")]
    pub unprocessed_page_size: u32,

    /// Health check interval (**must be > 0**)
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// Blocks behind the head tolerated before the health check warns
    #[serde(default = "default_max_blocks_behind")]
    pub max_blocks_behind: u64,

    /// Keep only raw events from the last N blocks (disabled when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_blocks: Option<u64>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_network_name() -> String {
    "localhost".to_string()
}

fn default_contract_name() -> String {
    EVIDENCE_CONTRACT_NAME.to_string()
}

fn default_deployments_dir() -> PathBuf {
    PathBuf::from("deployments")
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_batch_size() -> u64 {
    DEFAULT_BATCH_SIZE
}

fn default_delay_between_batches_ms() -> u64 {
    50
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_historical_sync_threshold() -> u64 {
    DEFAULT_HISTORICAL_SYNC_THRESHOLD
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_resubscribe_delay_ms() -> u64 {
    5000
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_initial_delay_ms() -> u64 {
    100
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_retry_max_delay_ms() -> u64 {
    1000
}

fn default_startup_delay_secs() -> u64 {
    3
}

fn default_startup_retry_secs() -> u64 {
    30
}

fn default_unprocessed_interval_secs() -> u64 {
    60
}

fn default_unprocessed_page_size() -> u32 {
    50
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_max_blocks_behind() -> u64 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            address: None,
            name: default_contract_name(),
            deployments_dir: default_deployments_dir(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            delay_between_batches_ms: default_delay_between_batches_ms(),
            max_retry_attempts: default_max_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            historical_sync_threshold: default_historical_sync_threshold(),
            poll_interval_ms: default_poll_interval_ms(),
            resubscribe_delay_ms: default_resubscribe_delay_ms(),
        }
    }
}

impl SyncConfig {
    /// Pause between historical batches.
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.delay_between_batches_ms)
    }

    /// Live polling cadence.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Wait before a resubscribe.
    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_millis(self.resubscribe_delay_ms)
    }

    /// Retry policy for whole batches: a fixed delay between attempts.
    pub fn batch_retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.retry_delay_ms,
            backoff_multiplier: 1.0,
            max_delay_ms: self.retry_delay_ms,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            initial_delay_ms: default_retry_initial_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            startup_delay_secs: default_startup_delay_secs(),
            startup_retry_secs: default_startup_retry_secs(),
            unprocessed_interval_secs: default_unprocessed_interval_secs(),
            unprocessed_page_size: default_unprocessed_page_size(),
            health_check_interval_secs: default_health_check_interval_secs(),
            max_blocks_behind: default_max_blocks_behind(),
            retention_blocks: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Lexical position while scanning TOML text for placeholders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    Bare,
    Comment,
    Basic,
    Literal,
    MultiBasic,
    MultiLiteral,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables can be referenced using `${VAR_NAME}` syntax,
    /// e.g. `rpc_url = "${EVIDENCE_RPC_URL}"`. Placeholders inside comments
    /// are left untouched.
    ///
    /// # Example
    /// ```no_run
    /// # use evidence_indexer::config::Config;
    /// let config = Config::from_file("indexer.toml")?;
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let expanded = Self::expand_env_vars(&contents)?;

        let config: Config = toml::from_str(&expanded)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml).context("Failed to parse TOML configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.network.rpc_url.is_empty() {
            anyhow::bail!("Network RPC URL cannot be empty");
        }
        if self.network.chain_id == 0 {
            anyhow::bail!("Chain ID must be non-zero");
        }
        if self.network.name.trim().is_empty() {
            anyhow::bail!("Network name cannot be empty");
        }

        if let Some(address) = self.contract.address {
            if address.is_zero() {
                anyhow::bail!("Contract address must be non-zero when provided");
            }
        } else if self.contract.name.trim().is_empty() {
            anyhow::bail!("Contract name cannot be empty when no address is configured");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }
        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be > 0");
        }
        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot exceed max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.sync.batch_size == 0 {
            anyhow::bail!("Sync batch_size must be > 0");
        }
        if self.sync.max_retry_attempts == 0 {
            anyhow::bail!("Sync max_retry_attempts must be > 0");
        }
        if self.sync.poll_interval_ms == 0 {
            anyhow::bail!("Sync poll_interval_ms must be > 0");
        }

        if self.retry.max_attempts == 0 {
            anyhow::bail!("Retry max_attempts must be > 0");
        }
        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            anyhow::bail!(
                "Retry backoff_multiplier must be >= 1.0 (got {})",
                self.retry.backoff_multiplier
            );
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            anyhow::bail!(
                "Retry max_delay_ms ({}) cannot be below initial_delay_ms ({})",
                self.retry.max_delay_ms,
                self.retry.initial_delay_ms
            );
        }

        if self.listener.unprocessed_interval_secs == 0 {
            anyhow::bail!(
                "Listener unprocessed_interval_secs must be > 0 (tokio interval cannot be zero)"
            );
        }
        if self.listener.health_check_interval_secs == 0 {
            anyhow::bail!(
                "Listener health_check_interval_secs must be > 0 (tokio interval cannot be zero)"
            );
        }
        if self.listener.unprocessed_page_size == 0 {
            anyhow::bail!("Listener unprocessed_page_size must be > 0");
        }
        if self.listener.retention_blocks == Some(0) {
            anyhow::bail!("Listener retention_blocks must be > 0 when provided");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!(
                "Logging level must be one of: {} (got '{}')",
                valid_levels.join(", "),
                self.logging.level
            );
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            anyhow::bail!(
                "Logging format must be one of: {} (got '{}')",
                valid_formats.join(", "),
                self.logging.format
            );
        }

        Ok(())
    }

    /// Expand `${VAR_NAME}` placeholders with environment variable values.
    ///
    /// Placeholders are expanded in bare values and in all four TOML string
    /// forms. Anything after a `#` that is not inside a string is a comment
    /// and is copied verbatim.
    ///
    /// # Errors
    /// Fails on an unset variable, an empty name or a missing closing brace.
    fn expand_env_vars(input: &str) -> Result<String> {
        let chars: Vec<char> = input.chars().collect();
        let mut out = String::with_capacity(input.len());
        let mut state = Scan::Bare;
        let mut i = 0;

        let triple = |at: usize, quote: char| {
            chars.get(at) == Some(&quote)
                && chars.get(at + 1) == Some(&quote)
                && chars.get(at + 2) == Some(&quote)
        };

        while i < chars.len() {
            let ch = chars[i];

            if state == Scan::Comment {
                if ch == '\n' {
                    state = Scan::Bare;
                }
                out.push(ch);
                i += 1;
                continue;
            }

            if ch == '$' && chars.get(i + 1) == Some(&'{') {
                let start = i + 2;
                let Some(len) = chars[start..].iter().position(|c| *c == '}') else {
                    anyhow::bail!(
                        "Unclosed environment variable placeholder at position {}",
                        i
                    );
                };
                let name: String = chars[start..start + len].iter().collect();
                if name.is_empty() {
                    anyhow::bail!("Empty environment variable name at position {}", i);
                }
                let value = std::env::var(&name).map_err(|_| {
                    anyhow::anyhow!(
                        "Environment variable '{}' is not set (referenced at position {})",
                        name,
                        i
                    )
                })?;
                out.push_str(&value);
                i = start + len + 1;
                continue;
            }

            match state {
                Scan::Bare => {
                    if ch == '#' {
                        state = Scan::Comment;
                    } else if triple(i, '"') {
                        state = Scan::MultiBasic;
                        out.push_str("\"\"");
                        i += 2;
                    } else if triple(i, '\'') {
                        state = Scan::MultiLiteral;
                        out.push_str("''");
                        i += 2;
                    } else if ch == '"' {
                        state = Scan::Basic;
                    } else if ch == '\'' {
                        state = Scan::Literal;
                    }
                }
                Scan::Basic | Scan::MultiBasic if ch == '\\' => {
                    // Copy the escaped character as-is so `\"` never closes the string.
                    out.push(ch);
                    i += 1;
                    if let Some(next) = chars.get(i) {
                        out.push(*next);
                        i += 1;
                    }
                    continue;
                }
                Scan::Basic if ch == '"' || ch == '\n' => state = Scan::Bare,
                Scan::Literal if ch == '\'' || ch == '\n' => state = Scan::Bare,
                Scan::MultiBasic if triple(i, '"') => {
                    state = Scan::Bare;
                    out.push_str("\"\"");
                    i += 2;
                }
                Scan::MultiLiteral if triple(i, '\'') => {
                    state = Scan::Bare;
                    out.push_str("''");
                    i += 2;
                }
                _ => {}
            }

            out.push(ch);
            i += 1;
        }

        Ok(out)
    }
}
