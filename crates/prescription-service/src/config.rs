//! Configuration management for the prescription service
//!
//! Loads configuration from environment variables with sensible defaults.

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which record store to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Redis,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(StorageBackend::Redis),
            "memory" => Ok(StorageBackend::Memory),
            other => anyhow::bail!("Unknown storage backend '{}' (expected redis/memory)", other),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// API server host
    pub api_host: String,

    /// API server port
    pub api_port: u16,

    pub storage_backend: StorageBackend,

    /// Redis connection URL
    pub redis_url: String,

    /// HS256 secret for bearer tokens
    pub jwt_secret: String,

    /// Bearer token lifetime in hours
    pub jwt_ttl_hours: i64,

    pub bcrypt_cost: u32,

    /// Frontend URL that scannable codes link to
    pub public_base_url: String,

    /// Whether to use the in-process ledger (for development/testing)
    pub mock_ledger: bool,

    /// Solana JSON-RPC endpoint
    pub solana_rpc_url: String,

    /// Cluster name for explorer links
    pub solana_cluster: String,

    /// Commitment level to wait for
    pub solana_commitment: String,

    /// Signing key as a JSON byte array (when not in mock mode)
    pub solana_private_key: Option<String>,

    /// Upper bound on waiting for a transaction to confirm
    pub ledger_confirm_timeout_secs: u64,

    /// `app` field of anchored memos
    pub anchor_app_id: String,

    /// Submissions per digest before a record is marked failed
    pub anchor_max_attempts: u32,

    /// First retry delay; doubles per attempt
    pub anchor_backoff_secs: u64,

    /// Retry delay cap
    pub anchor_max_backoff_secs: u64,
}

/// Variable source: the process environment, or a map in tests
struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
    }

    fn or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, name: &str, default: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        self.or(name, default)
            .parse()
            .with_context(|| format!("Invalid {}", name))
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if it exists (for local development)
        dotenvy::dotenv().ok();

        Self::from_vars(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let config = Config {
            api_host: vars.or("API_HOST", "0.0.0.0"),
            api_port: vars.parse("API_PORT", "5000")?,

            storage_backend: vars
                .or("STORAGE_BACKEND", "redis")
                .parse()
                .context("Invalid STORAGE_BACKEND")?,
            redis_url: vars.or("REDIS_URL", "redis://127.0.0.1:6379"),

            jwt_secret: vars.get("JWT_SECRET").unwrap_or_default(),
            jwt_ttl_hours: vars.parse("JWT_TTL_HOURS", "168")?,
            bcrypt_cost: vars.parse("BCRYPT_COST", "10")?,

            public_base_url: vars.or("PUBLIC_BASE_URL", "http://localhost:3000"),

            mock_ledger: vars
                .or("MOCK_LEDGER", "true")
                .parse()
                .context("Invalid MOCK_LEDGER (expected true/false)")?,
            solana_rpc_url: vars.or("SOLANA_RPC_URL", "https://api.devnet.solana.com"),
            solana_cluster: vars.or("SOLANA_CLUSTER", "devnet"),
            solana_commitment: vars.or("SOLANA_COMMITMENT", "confirmed"),
            solana_private_key: vars.get("SOLANA_PRIVATE_KEY"),
            ledger_confirm_timeout_secs: vars.parse("LEDGER_CONFIRM_TIMEOUT_SECS", "60")?,

            anchor_app_id: vars.or("ANCHOR_APP_ID", "PharmaChain"),
            anchor_max_attempts: vars.parse("ANCHOR_MAX_ATTEMPTS", "5")?,
            anchor_backoff_secs: vars.parse("ANCHOR_BACKOFF_SECS", "2")?,
            anchor_max_backoff_secs: vars.parse("ANCHOR_MAX_BACKOFF_SECS", "300")?,
        };

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.api_port == 0 {
            anyhow::bail!("API_PORT must be greater than 0");
        }

        if self.jwt_secret.is_empty() {
            anyhow::bail!("JWT_SECRET is required");
        }

        if self.jwt_ttl_hours <= 0 {
            anyhow::bail!("JWT_TTL_HOURS must be greater than 0");
        }

        if !(4..=31).contains(&self.bcrypt_cost) {
            anyhow::bail!("BCRYPT_COST must be between 4 and 31");
        }

        if !matches!(
            self.solana_commitment.as_str(),
            "processed" | "confirmed" | "finalized"
        ) {
            anyhow::bail!("SOLANA_COMMITMENT must be processed, confirmed or finalized");
        }

        if self.anchor_max_attempts == 0 {
            anyhow::bail!("ANCHOR_MAX_ATTEMPTS must be greater than 0");
        }

        if self.anchor_max_backoff_secs < self.anchor_backoff_secs {
            anyhow::bail!("ANCHOR_MAX_BACKOFF_SECS must not be below ANCHOR_BACKOFF_SECS");
        }

        // If not in mock mode, require a signing key
        if !self.mock_ledger && self.solana_private_key.is_none() {
            anyhow::bail!("SOLANA_PRIVATE_KEY is required when MOCK_LEDGER=false");
        }

        Ok(())
    }

    /// Get the API server address
    pub fn api_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }

    pub fn ledger_confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger_confirm_timeout_secs)
    }
}
