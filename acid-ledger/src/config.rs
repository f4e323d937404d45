//! Configuration for the ledger

use crate::types::{Account, Strategy};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Transfer timing
    pub transfer: TransferConfig,

    /// Isolation probe timing
    pub probe: ProbeConfig,

    /// Durable journal
    pub journal: JournalConfig,

    /// Log output
    pub logging: LoggingConfig,

    /// Accounts created on reset
    pub seed: Vec<SeedAccount>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "acid-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            transfer: TransferConfig::default(),
            probe: ProbeConfig::default(),
            journal: JournalConfig::default(),
            logging: LoggingConfig::default(),
            seed: vec![
                SeedAccount::new("ACC001", Decimal::new(100000, 2)),
                SeedAccount::new("ACC002", Decimal::new(50000, 2)),
                SeedAccount::new("ACC003", Decimal::new(75000, 2)),
            ],
        }
    }
}

/// Transfer timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Delay between optimistic read and write (ms), widens the conflict window
    pub optimistic_think_time_ms: u64,

    /// Simulated work while pessimistic locks are held (ms)
    pub pessimistic_hold_ms: u64,

    /// Lock acquisition deadline (ms); `None` waits forever
    pub lock_timeout_ms: Option<u64>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            optimistic_think_time_ms: 100,
            pessimistic_hold_ms: 500,
            lock_timeout_ms: None,
        }
    }
}

impl TransferConfig {
    /// No artificial delays (tests, benchmarks)
    pub fn immediate() -> Self {
        Self {
            optimistic_think_time_ms: 0,
            pessimistic_hold_ms: 0,
            lock_timeout_ms: None,
        }
    }

    /// Critical-section delay for a strategy
    pub fn work_delay(&self, strategy: Strategy) -> Duration {
        match strategy {
            Strategy::Optimistic => Duration::from_millis(self.optimistic_think_time_ms),
            Strategy::Pessimistic => Duration::from_millis(self.pessimistic_hold_ms),
            Strategy::Uncontrolled | Strategy::Atomic => Duration::ZERO,
        }
    }

    /// Lock timeout as a duration
    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }
}

/// Isolation probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// W1, between the two account reads (ms)
    pub first_wait_ms: u64,

    /// W2, between the two aggregate reads (ms)
    pub second_wait_ms: u64,

    /// Hold of a long-running (uncommitted) update (ms)
    pub long_update_hold_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            first_wait_ms: 3000,
            second_wait_ms: 2000,
            long_update_hold_ms: 5000,
        }
    }
}

/// Durable journal configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "sink", rename_all = "kebab-case")]
pub enum JournalConfig {
    /// In-memory log only
    #[default]
    None,

    /// JSON-lines file
    JsonLines {
        /// File path
        path: PathBuf,
    },

    /// RocksDB database (requires the `rocksdb` feature)
    Rocksdb {
        /// Database directory
        path: PathBuf,
    },
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event
    #[default]
    Json,
    /// Human readable
    Pretty,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,

    /// Default level directive (overridden by `RUST_LOG`)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
        }
    }
}

/// Account created on reset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedAccount {
    /// Account id
    pub id: String,
    /// Opening balance
    pub balance: Decimal,
}

impl SeedAccount {
    /// Create a seed entry
    pub fn new(id: impl Into<String>, balance: Decimal) -> Self {
        Self {
            id: id.into(),
            balance,
        }
    }
}

impl From<&SeedAccount> for Account {
    fn from(seed: &SeedAccount) -> Self {
        Account::new(seed.id.as_str(), seed.balance)
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Some(ms) = env_millis("ACID_LEDGER_OPTIMISTIC_THINK_MS")? {
            config.transfer.optimistic_think_time_ms = ms;
        }

        if let Some(ms) = env_millis("ACID_LEDGER_PESSIMISTIC_HOLD_MS")? {
            config.transfer.pessimistic_hold_ms = ms;
        }

        if let Some(ms) = env_millis("ACID_LEDGER_LOCK_TIMEOUT_MS")? {
            config.transfer.lock_timeout_ms = Some(ms);
        }

        if let Some(ms) = env_millis("ACID_LEDGER_PROBE_FIRST_WAIT_MS")? {
            config.probe.first_wait_ms = ms;
        }

        if let Some(ms) = env_millis("ACID_LEDGER_PROBE_SECOND_WAIT_MS")? {
            config.probe.second_wait_ms = ms;
        }

        if let Ok(path) = std::env::var("ACID_LEDGER_JOURNAL_PATH") {
            config.journal = JournalConfig::JsonLines {
                path: PathBuf::from(path),
            };
        }

        if let Ok(format) = std::env::var("ACID_LEDGER_LOG_FORMAT") {
            config.logging.format = match format.to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(crate::Error::Config(format!(
                        "Unknown log format: {}",
                        other
                    )))
                }
            };
        }

        Ok(config)
    }

    /// Load from `ACID_LEDGER_CONFIG` if set, else from environment variables
    pub fn load() -> crate::Result<Self> {
        match std::env::var("ACID_LEDGER_CONFIG") {
            Ok(path) => Self::from_file(path),
            Err(_) => Self::from_env(),
        }
    }

    /// Seed accounts as store values
    pub fn seed_accounts(&self) -> Vec<Account> {
        self.seed.iter().map(Account::from).collect()
    }
}

fn env_millis(key: &str) -> crate::Result<Option<u64>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|e| crate::Error::Config(format!("{}: {}", key, e))),
        Err(_) => Ok(None),
    }
}
