use config::{Config, Environment, File};
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Loads configuration from a given config file or environment variables.
pub fn load_config(config_file_path: Option<&Path>) -> anyhow::Result<AppConfig> {
    // Load .env file if it exists, ignore if not present
    dotenv().ok();

    let mut settings = Config::builder();

    if let Some(path) = config_file_path {
        settings = settings.add_source(File::from(path).required(true));
    }

    // Environment variables with prefix HOTWALLET override file values
    settings = settings.add_source(Environment::with_prefix("HOTWALLET").separator("__"));

    let app_config = settings.build()?.try_deserialize::<AppConfig>()?;

    Ok(app_config)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub ethereum: EthereumConfig,
    pub fee: FeeConfig,
    pub submission: SubmissionConfig,
    pub confirmation: ConfirmationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn get_db_url(&self) -> anyhow::Result<String> {
        std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is not set in environment or .env file"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthereumConfig {
    pub chain_id: u64,
    /// Per-call timeout for gateway requests, in milliseconds.
    pub request_timeout_ms: u64,
}

impl EthereumConfig {
    pub fn get_rpc_url(&self) -> anyhow::Result<String> {
        std::env::var("ETHEREUM_RPC_URL").map_err(|_| {
            anyhow::anyhow!("ETHEREUM_RPC_URL is not set in environment or .env file")
        })
    }

    pub fn get_signer_url(&self) -> anyhow::Result<String> {
        std::env::var("SIGNER_URL")
            .map_err(|_| anyhow::anyhow!("SIGNER_URL is not set in environment or .env file"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeConfig {
    /// Hard ceiling on the offered gas price, in wei. Network prices above
    /// this defer submission instead of submitting at runaway cost.
    pub max_gas_price_wei: u64,
    /// Minimum gas price the chain will accept, in wei.
    pub min_gas_price_wei: u64,
    /// Safety margin applied on top of the observed network price, percent.
    pub margin_percent: u64,
    /// Extra percentage applied for Urgency::Fast quotes.
    pub fast_extra_percent: u64,
    /// Gas budget for a native transfer.
    pub native_gas_limit: u64,
    /// Gas budget for an ERC-20 transfer call.
    pub token_gas_limit: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionConfig {
    pub interval_secs: u64,
    pub batch_size: i64,
    /// How long a processing lease on a PENDING row is honored before a
    /// crashed worker's claim is taken over.
    pub claim_lease_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationConfig {
    pub interval_secs: u64,
    pub batch_size: i64,
    /// Blocks mined on top of the including block before a withdrawal is
    /// considered final.
    pub confirmation_threshold: u64,
    /// How long a submitted transaction may stay unknown to the chain before
    /// it is written off as dropped.
    pub not_found_grace_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String, // "debug" | "info" | "warn" | "error"
}
