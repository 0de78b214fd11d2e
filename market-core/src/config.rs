//! Configuration for the marketplace ledgers

use crate::types::{Address, Amount};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Marketplace configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Emit JSON log lines instead of text
    pub log_json: bool,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Escrow payment ledger configuration
    pub escrow: EscrowConfig,

    /// Reputation ledger configuration
    pub reputation: ReputationConfig,

    /// Writer actor configuration
    pub actor: ActorConfig,

    /// Event log configuration
    pub events: EventsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/market"),
            service_name: "parcel-market".to_string(),
            log_json: false,
            rocksdb: RocksDBConfig::default(),
            escrow: EscrowConfig::default(),
            reputation: ReputationConfig::default(),
            actor: ActorConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,

    /// fsync every committed batch
    pub sync_writes: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            max_background_jobs: 2,
            enable_statistics: false,
            sync_writes: true,
        }
    }
}

/// Upper bound on `max_payment`, far below where fee arithmetic overflows
pub const PAYMENT_CEILING: u64 = 1_000_000_000_000_000_000;

/// Escrow payment ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowConfig {
    /// Platform fee, percent of the attached amount
    pub fee_rate_percent: Decimal,

    /// Smallest accepted payment (inclusive)
    pub min_payment: Amount,

    /// Largest accepted payment (inclusive)
    pub max_payment: Amount,

    /// Address allowed to withdraw accrued platform fees
    pub platform_owner: Address,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            fee_rate_percent: Decimal::from(2),
            min_payment: Decimal::new(1, 3), // 0.001
            max_payment: Decimal::from(100),
            platform_owner: Address::from_bytes([0xfe; 20]),
        }
    }
}

/// Reputation ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationConfig {
    /// Score recorded for every rating (encrypted scores are not disclosed)
    pub placeholder_score: u8,

    /// Total rating a participant needs to meet the minimum reputation
    pub minimum_total_rating: u64,

    /// Max average-rating distance for "similar" reputations
    pub similarity_window: u8,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            placeholder_score: 5,
            minimum_total_rating: 3,
            similarity_window: 2,
        }
    }
}

/// Writer actor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    /// Bounded mailbox capacity (backpressure)
    pub mailbox_capacity: usize,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1000,
        }
    }
}

/// Event log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Broadcast channel capacity per ledger
    pub broadcast_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 1024,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("MARKET_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(rate) = std::env::var("MARKET_FEE_RATE") {
            config.escrow.fee_rate_percent = rate
                .parse()
                .map_err(|e| crate::Error::Config(format!("Invalid MARKET_FEE_RATE: {}", e)))?;
        }

        if let Ok(owner) = std::env::var("MARKET_PLATFORM_OWNER") {
            config.escrow.platform_owner = owner.parse()?;
        }

        if let Ok(json) = std::env::var("MARKET_LOG_JSON") {
            config.log_json = matches!(json.as_str(), "1" | "true" | "yes");
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject inconsistent settings
    pub fn validate(&self) -> crate::Result<()> {
        let escrow = &self.escrow;
        if escrow.fee_rate_percent < Decimal::ZERO || escrow.fee_rate_percent >= Decimal::from(100) {
            return Err(crate::Error::Config(format!(
                "fee_rate_percent must be in [0, 100), got {}",
                escrow.fee_rate_percent
            )));
        }
        if escrow.min_payment <= Decimal::ZERO || escrow.min_payment > escrow.max_payment {
            return Err(crate::Error::Config(format!(
                "payment bounds invalid: min {} max {}",
                escrow.min_payment, escrow.max_payment
            )));
        }
        if escrow.max_payment > Decimal::from(PAYMENT_CEILING) {
            return Err(crate::Error::Config(format!(
                "max_payment {} exceeds the ceiling of {}",
                escrow.max_payment, PAYMENT_CEILING
            )));
        }
        if escrow.platform_owner.is_zero() {
            return Err(crate::Error::Config(
                "platform_owner must not be the zero address".to_string(),
            ));
        }
        if !(1..=5).contains(&self.reputation.placeholder_score) {
            return Err(crate::Error::Config(format!(
                "placeholder_score must be in [1, 5], got {}",
                self.reputation.placeholder_score
            )));
        }
        if self.actor.mailbox_capacity == 0 || self.events.broadcast_capacity == 0 {
            return Err(crate::Error::Config(
                "channel capacities must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "parcel-market");
        assert_eq!(config.escrow.fee_rate_percent, Decimal::from(2));
        assert_eq!(config.reputation.placeholder_score, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            data_dir = "/tmp/market"

            [escrow]
            fee_rate_percent = "3"
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/market"));
        assert_eq!(config.escrow.fee_rate_percent, Decimal::from(3));
        assert_eq!(config.escrow.max_payment, Decimal::from(100));
        assert_eq!(config.reputation.similarity_window, 2);
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = Config::default();
        config.escrow.fee_rate_percent = Decimal::from(100);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.escrow.min_payment = Decimal::from(200);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.reputation.placeholder_score = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.escrow.platform_owner = Address::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.escrow.max_payment = Decimal::MAX;
        assert!(matches!(config.validate(), Err(crate::Error::Config(_))));

        let mut config = Config::default();
        config.escrow.max_payment = Decimal::from(PAYMENT_CEILING);
        assert!(config.validate().is_ok());
    }
}
