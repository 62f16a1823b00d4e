//! Configuration loading from environment variables.

use std::env;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(String),
}

/// Settlement cadence bounds in seconds (5 to 10 minutes).
const MIN_SETTLE_INTERVAL_SECS: u64 = 300;
const MAX_SETTLE_INTERVAL_SECS: u64 = 600;

/// Application configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,

    /// Price oracle base URL
    pub oracle_api_url: String,

    /// Price oracle API key
    pub oracle_api_key: String,

    /// Vault authority RPC bridge base URL
    pub vault_rpc_url: String,

    /// Settlement cadence in seconds, clamped to [300, 600]
    pub settle_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required variables:
    /// - DATABASE_URL: PostgreSQL connection string
    ///
    /// Optional variables (with defaults):
    /// - ORACLE_API_URL: price oracle base URL
    /// - ORACLE_API_KEY: price oracle API key
    /// - VAULT_RPC_URL: vault authority bridge URL
    /// - SETTLE_INTERVAL_SECS: settlement cadence (default: 300)
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present
        dotenvy::dotenv().ok();
        Self::from_env_only()
    }

    /// Load configuration from environment variables only (no .env file).
    /// Useful for testing.
    pub fn from_env_only() -> Result<Self, ConfigError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let oracle_api_url = env::var("ORACLE_API_URL")
            .unwrap_or_else(|_| "https://public-api.birdeye.so".to_string());

        let oracle_api_key = env::var("ORACLE_API_KEY").unwrap_or_default();

        let vault_rpc_url = env::var("VAULT_RPC_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8899".to_string());

        let settle_interval_secs = env::var("SETTLE_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(MIN_SETTLE_INTERVAL_SECS)
            .clamp(MIN_SETTLE_INTERVAL_SECS, MAX_SETTLE_INTERVAL_SECS);

        Ok(Self {
            database_url,
            oracle_api_url,
            oracle_api_key,
            vault_rpc_url,
            settle_interval_secs,
        })
    }
}
