use eyre::{eyre, Result, WrapErr};
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::Path;

/// Main configuration for the relayer
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub source: ChainConfig,
    pub destination: ChainConfig,
    pub relayer: RelayerConfig,
}

/// Database configuration
#[derive(Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

/// Per-chain configuration. The source chain hosts the lock vault; the
/// destination chain hosts the wrapped-asset contract. Each side carries its
/// own confirmation depth and authority credential.
#[derive(Clone, Deserialize)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    /// Bridge contract on this chain (vault on source, wrapped token on destination)
    pub contract_address: String,
    #[serde(default = "default_confirmation_depth")]
    pub confirmation_depth: u64,
    pub authority: AuthorityConfig,
}

/// Custom Debug that redacts the authority key to prevent accidental log leakage.
impl fmt::Debug for ChainConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainConfig")
            .field("rpc_url", &self.rpc_url)
            .field("chain_id", &self.chain_id)
            .field("contract_address", &self.contract_address)
            .field("confirmation_depth", &self.confirmation_depth)
            .field("authority", &self.authority)
            .finish()
    }
}

/// Authority credential for the chain's gated entry points (mint/release).
/// A revocable configuration object passed to the dispatcher at
/// construction; rotating keys is a config change and restart.
#[derive(Clone, Deserialize)]
pub struct AuthorityConfig {
    pub private_key: String,
}

impl fmt::Debug for AuthorityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorityConfig")
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Relayer loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_dispatch_attempts")]
    pub max_dispatch_attempts: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Interval between locked-balance reconciliation passes
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
}

/// Default functions
fn default_confirmation_depth() -> u64 {
    12
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_max_dispatch_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    2000
}

fn default_max_backoff() -> u64 {
    60_000
}

fn default_reconcile_interval() -> u64 {
    600
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env").or_else(|_| Self::load_from_env())
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    fn load_from_env() -> Result<Self> {
        let database = DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| eyre!("DATABASE_URL environment variable is required"))?,
        };

        let source = Self::load_chain("SOURCE")?;
        let destination = Self::load_chain("DEST")?;

        let relayer = RelayerConfig {
            poll_interval_ms: env::var("POLL_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_poll_interval()),
            max_dispatch_attempts: env::var("MAX_DISPATCH_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_max_dispatch_attempts()),
            initial_backoff_ms: env::var("INITIAL_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_initial_backoff()),
            max_backoff_ms: env::var("MAX_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_max_backoff()),
            reconcile_interval_secs: env::var("RECONCILE_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_reconcile_interval()),
        };

        let config = Config {
            database,
            source,
            destination,
            relayer,
        };

        config.validate()?;
        Ok(config)
    }

    fn load_chain(prefix: &str) -> Result<ChainConfig> {
        Ok(ChainConfig {
            rpc_url: env::var(format!("{}_RPC_URL", prefix))
                .map_err(|_| eyre!("{}_RPC_URL environment variable is required", prefix))?,
            chain_id: env::var(format!("{}_CHAIN_ID", prefix))
                .map_err(|_| eyre!("{}_CHAIN_ID environment variable is required", prefix))?
                .parse()
                .wrap_err_with(|| format!("{}_CHAIN_ID must be a valid u64", prefix))?,
            contract_address: env::var(format!("{}_CONTRACT_ADDRESS", prefix)).map_err(|_| {
                eyre!("{}_CONTRACT_ADDRESS environment variable is required", prefix)
            })?,
            confirmation_depth: env::var(format!("{}_CONFIRMATION_DEPTH", prefix))
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default_confirmation_depth()),
            authority: AuthorityConfig {
                private_key: env::var(format!("{}_AUTHORITY_KEY", prefix)).map_err(|_| {
                    eyre!("{}_AUTHORITY_KEY environment variable is required", prefix)
                })?,
            },
        })
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(eyre!("database.url cannot be empty"));
        }

        Self::validate_chain("source", &self.source)?;
        Self::validate_chain("destination", &self.destination)?;

        // Both workers read checkpoints keyed by chain_id; colliding IDs
        // would make the two directions clobber each other's scan cursor.
        if self.source.chain_id == self.destination.chain_id {
            return Err(eyre!(
                "source and destination chain_id must differ (both are {})",
                self.source.chain_id
            ));
        }

        if self.relayer.max_dispatch_attempts == 0 {
            return Err(eyre!("relayer.max_dispatch_attempts must be at least 1"));
        }

        if self.relayer.initial_backoff_ms > self.relayer.max_backoff_ms {
            return Err(eyre!(
                "relayer.initial_backoff_ms ({}) cannot exceed max_backoff_ms ({})",
                self.relayer.initial_backoff_ms,
                self.relayer.max_backoff_ms
            ));
        }

        Ok(())
    }

    fn validate_chain(label: &str, chain: &ChainConfig) -> Result<()> {
        if chain.rpc_url.is_empty() {
            return Err(eyre!("{}.rpc_url cannot be empty", label));
        }

        if chain.contract_address.len() != 42 || !chain.contract_address.starts_with("0x") {
            return Err(eyre!(
                "{}.contract_address must be a valid hex address (42 chars with 0x prefix)",
                label
            ));
        }

        if chain.authority.private_key.len() != 66 || !chain.authority.private_key.starts_with("0x")
        {
            return Err(eyre!(
                "{}.authority.private_key must be 66 chars (0x + 64 hex chars)",
                label
            ));
        }

        if chain.confirmation_depth == 0 {
            return Err(eyre!(
                "{}.confirmation_depth must be at least 1 (use 1 for instant-finality chains)",
                label
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_chain(chain_id: u64) -> ChainConfig {
        ChainConfig {
            rpc_url: "http://localhost:8545".to_string(),
            chain_id,
            contract_address: "0x0000000000000000000000000000000000000001".to_string(),
            confirmation_depth: 12,
            authority: AuthorityConfig {
                private_key:
                    "0x0000000000000000000000000000000000000000000000000000000000000001"
                        .to_string(),
            },
        }
    }

    fn valid_config() -> Config {
        Config {
            database: DatabaseConfig {
                url: "postgres://localhost/test".to_string(),
            },
            source: valid_chain(1),
            destination: valid_chain(56),
            relayer: RelayerConfig {
                poll_interval_ms: 1000,
                max_dispatch_attempts: 3,
                initial_backoff_ms: 2000,
                max_backoff_ms: 60_000,
                reconcile_interval_secs: 600,
            },
        }
    }

    #[test]
    fn test_defaults() {
        assert_eq!(default_confirmation_depth(), 12);
        assert_eq!(default_poll_interval(), 1000);
        assert_eq!(default_max_dispatch_attempts(), 3);
        assert_eq!(default_initial_backoff(), 2000);
        assert_eq!(default_max_backoff(), 60_000);
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_address_validation() {
        let mut config = valid_config();
        config.source.contract_address = "invalid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_authority_key_validation() {
        let mut config = valid_config();
        config.destination.authority.private_key = "0x123".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_confirmation_depth_rejected() {
        let mut config = valid_config();
        config.source.confirmation_depth = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_chain_id_rejected() {
        let mut config = valid_config();
        config.destination.chain_id = config.source.chain_id;
        let err = config.validate().unwrap_err();
        assert!(
            err.to_string().contains("must differ"),
            "Error should mention the collision: {}",
            err
        );
    }

    #[test]
    fn test_backoff_ordering_rejected() {
        let mut config = valid_config();
        config.relayer.initial_backoff_ms = 120_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = valid_config();
        let formatted = format!("{:?}", config);
        assert!(!formatted.contains("postgres://localhost/test"));
        assert!(!formatted.contains(
            "0x0000000000000000000000000000000000000000000000000000000000000001"
        ));
        assert!(formatted.contains("<redacted>"));
    }
}
