//! Application configuration
//!
//! This module provides centralized configuration management using the `config` crate.
//! Configuration can be loaded from environment variables and config files.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::fees::FeeSchedule;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub fees: FeeSchedule,
    #[serde(default)]
    pub locks: LockConfig,
    #[serde(default)]
    pub charges: ChargeConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub funding: FundingConfig,
    #[serde(default)]
    pub disputes: DisputeConfig,
}

/// HTTP server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Comma-separated list of allowed CORS origins
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
}

impl ServerConfig {
    pub fn allowed_origins(&self) -> Vec<String> {
        self.cors_origins
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(String::from)
            .collect()
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_timeout() -> u64 {
    30
}

fn default_cors_origins() -> String {
    "http://localhost:3000,http://127.0.0.1:3000".to_string()
}

/// Database configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,

    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_acquire_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

/// Redis configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    /// Redis connection URL
    pub url: String,

    /// Default TTL for cached items in seconds
    #[serde(default = "default_cache_ttl")]
    pub default_ttl_secs: u64,
}

fn default_cache_ttl() -> u64 {
    300
}

/// Authentication configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// JWT signing secret (HS256)
    pub jwt_secret: String,

    /// Expected `iss` claim, checked when set
    pub jwt_issuer: Option<String>,

    /// Clock skew tolerated on token expiry
    #[serde(default)]
    pub jwt_leeway_secs: u64,
}

/// External HTTP collaborators
#[derive(Debug, Deserialize, Clone)]
pub struct ProvidersConfig {
    #[serde(default = "default_card_provider_url")]
    pub card_provider_url: String,

    #[serde(default = "default_fiat_wallet_url")]
    pub fiat_wallet_url: String,

    #[serde(default = "default_blockchain_wallet_url")]
    pub blockchain_wallet_url: String,

    #[serde(default = "default_exchange_url")]
    pub exchange_url: String,

    /// Bearer token sent to every collaborator
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_card_provider_url() -> String {
    "http://localhost:9101".to_string()
}

fn default_fiat_wallet_url() -> String {
    "http://localhost:9102".to_string()
}

fn default_blockchain_wallet_url() -> String {
    "http://localhost:9103".to_string()
}

fn default_exchange_url() -> String {
    "http://localhost:9104".to_string()
}

fn default_provider_timeout() -> u64 {
    15
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            card_provider_url: default_card_provider_url(),
            fiat_wallet_url: default_fiat_wallet_url(),
            blockchain_wallet_url: default_blockchain_wallet_url(),
            exchange_url: default_exchange_url(),
            api_key: String::new(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

/// Lock TTLs and acquisition budget
#[derive(Debug, Deserialize, Clone)]
pub struct LockConfig {
    /// Issuance-fee lock TTL; must outlast the charge retries
    #[serde(default = "default_fee_lock_ttl")]
    pub fee_ttl_secs: u64,

    #[serde(default = "default_dispute_lock_ttl")]
    pub dispute_ttl_secs: u64,

    /// Funding initialize / settlement lock TTL
    #[serde(default = "default_funding_lock_ttl")]
    pub funding_ttl_secs: u64,

    /// Give up acquiring after this long
    #[serde(default = "default_lock_wait")]
    pub wait_ms: u64,

    #[serde(default = "default_lock_poll")]
    pub poll_interval_ms: u64,
}

fn default_fee_lock_ttl() -> u64 {
    30
}

fn default_dispute_lock_ttl() -> u64 {
    30
}

fn default_funding_lock_ttl() -> u64 {
    10
}

fn default_lock_wait() -> u64 {
    5000
}

fn default_lock_poll() -> u64 {
    50
}

impl LockConfig {
    pub fn fee_ttl(&self) -> Duration {
        Duration::from_secs(self.fee_ttl_secs)
    }

    pub fn dispute_ttl(&self) -> Duration {
        Duration::from_secs(self.dispute_ttl_secs)
    }

    pub fn funding_ttl(&self) -> Duration {
        Duration::from_secs(self.funding_ttl_secs)
    }

    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            fee_ttl_secs: default_fee_lock_ttl(),
            dispute_ttl_secs: default_dispute_lock_ttl(),
            funding_ttl_secs: default_funding_lock_ttl(),
            wait_ms: default_lock_wait(),
            poll_interval_ms: default_lock_poll(),
        }
    }
}

/// In-process charge retry loop
#[derive(Debug, Deserialize, Clone)]
pub struct ChargeConfig {
    #[serde(default = "default_charge_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_charge_delay")]
    pub retry_delay_ms: u64,
}

fn default_charge_attempts() -> u32 {
    3
}

fn default_charge_delay() -> u64 {
    1000
}

impl Default for ChargeConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_charge_attempts(),
            retry_delay_ms: default_charge_delay(),
        }
    }
}

/// Job queue workers and retry policy
///
/// Jobs live in the `funding_jobs` table. Workers poll for due rows and
/// hold each claim for `visibility_timeout_secs`; a claim left behind by a
/// crashed worker becomes due again once that timeout passes.
#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    #[serde(default = "default_queue_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_queue_attempts")]
    pub attempts: u32,

    #[serde(default = "default_queue_backoff")]
    pub backoff_base_ms: u64,

    /// Idle wait between polls of the job table
    #[serde(default = "default_queue_poll")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_queue_visibility")]
    pub visibility_timeout_secs: u64,
}

fn default_queue_concurrency() -> usize {
    5
}

fn default_queue_attempts() -> u32 {
    3
}

fn default_queue_backoff() -> u64 {
    2000
}

fn default_queue_poll() -> u64 {
    500
}

fn default_queue_visibility() -> u64 {
    300
}

impl QueueConfig {
    /// Retry policy attached to every enqueued funding job
    pub fn job_options(&self) -> crate::models::JobOptions {
        crate::models::JobOptions {
            attempts: self.attempts.max(1),
            backoff_base: Duration::from_millis(self.backoff_base_ms),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs.max(1))
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: default_queue_concurrency(),
            attempts: default_queue_attempts(),
            backoff_base_ms: default_queue_backoff(),
            poll_interval_ms: default_queue_poll(),
            visibility_timeout_secs: default_queue_visibility(),
        }
    }
}

/// Funding saga settings
#[derive(Debug, Deserialize, Clone)]
pub struct FundingConfig {
    /// Network the card provider settles deposits on
    #[serde(default = "default_network")]
    pub settlement_network: String,

    /// Asset sent to the deposit address
    #[serde(default = "default_settlement_asset")]
    pub settlement_asset: String,

    /// Fiat wallet asset debited on the FIAT rail
    #[serde(default = "default_fiat_asset")]
    pub fiat_asset: String,

    #[serde(default = "default_idempotency_prefix")]
    pub idempotency_prefix: String,

    /// Escrow context lifetime
    #[serde(default = "default_context_ttl")]
    pub context_ttl_secs: u64,

    #[serde(default = "default_failure_reason_len")]
    pub failure_reason_max_len: usize,

    /// Send a blockchain copy of fiat fundings (never in production)
    #[serde(default)]
    pub mirror_fiat_to_blockchain: bool,

    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_network() -> String {
    "SOLANA".to_string()
}

fn default_settlement_asset() -> String {
    "USDC".to_string()
}

fn default_fiat_asset() -> String {
    "USD".to_string()
}

fn default_idempotency_prefix() -> String {
    "card-fund".to_string()
}

fn default_context_ttl() -> u64 {
    1800
}

fn default_failure_reason_len() -> usize {
    255
}

fn default_environment() -> String {
    "development".to_string()
}

impl FundingConfig {
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Mirror only when enabled and outside production
    pub fn mirror_enabled(&self) -> bool {
        self.mirror_fiat_to_blockchain && !self.is_production()
    }
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self {
            settlement_network: default_network(),
            settlement_asset: default_settlement_asset(),
            fiat_asset: default_fiat_asset(),
            idempotency_prefix: default_idempotency_prefix(),
            context_ttl_secs: default_context_ttl(),
            failure_reason_max_len: default_failure_reason_len(),
            mirror_fiat_to_blockchain: false,
            environment: default_environment(),
        }
    }
}

/// Dispute rules
#[derive(Debug, Deserialize, Clone)]
pub struct DisputeConfig {
    #[serde(default = "default_window_days")]
    pub window_days: i64,
}

fn default_window_days() -> i64 {
    crate::models::dispute::DEFAULT_DISPUTE_WINDOW_DAYS
}

impl Default for DisputeConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with default values
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", num_cpus::get() as i64)?
            .set_default("server.timeout_secs", 30)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("redis.default_ttl_secs", 300)?
            .set_default("funding.environment", run_mode.as_str())?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables with CARDVAULT_ prefix
            .add_source(
                Environment::with_prefix("CARDVAULT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(Environment::with_prefix("CARDVAULT").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    /// Get the server bind address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_defaults() {
        let locks = LockConfig::default();
        assert_eq!(locks.fee_ttl(), Duration::from_secs(30));
        assert_eq!(locks.wait(), Duration::from_millis(5000));

        assert_eq!(ChargeConfig::default().max_attempts, 3);
        let queue = QueueConfig::default();
        assert_eq!(queue.attempts, 3);
        assert_eq!(queue.poll_interval(), Duration::from_millis(500));
        assert_eq!(queue.visibility_timeout(), Duration::from_secs(300));
        assert_eq!(DisputeConfig::default().window_days, 60);

        let funding = FundingConfig::default();
        assert_eq!(funding.idempotency_prefix, "card-fund");
        assert!(!funding.mirror_enabled());
    }

    #[test]
    fn test_mirror_never_in_production() {
        let funding = FundingConfig {
            mirror_fiat_to_blockchain: true,
            environment: "Production".to_string(),
            ..FundingConfig::default()
        };
        assert!(!funding.mirror_enabled());

        let staging = FundingConfig {
            environment: "staging".to_string(),
            ..funding
        };
        assert!(staging.mirror_enabled());
    }

    #[test]
    fn test_deserialize_minimal() {
        let config = Config::builder()
            .set_default("server.port", 9090)
            .unwrap()
            .set_default("database.url", "postgres://localhost/cardvault")
            .unwrap()
            .set_default("redis.url", "redis://localhost")
            .unwrap()
            .set_default("auth.jwt_secret", "secret")
            .unwrap()
            .set_default("fees.dispute.kind", "fixed")
            .unwrap()
            .set_default("fees.dispute.value", 750)
            .unwrap()
            .build()
            .unwrap();

        let app: AppConfig = config.try_deserialize().unwrap();
        assert_eq!(app.server_addr(), "0.0.0.0:9090");
        assert_eq!(app.server.allowed_origins().len(), 2);
        assert_eq!(app.locks.dispute_ttl_secs, 30);
        assert_eq!(app.auth.jwt_leeway_secs, 0);
        assert_eq!(
            app.fees
                .calculate_minor(crate::fees::FeeType::Dispute, 100)
                .unwrap(),
            750
        );
        assert_eq!(
            app.fees
                .calculate_minor(crate::fees::FeeType::CardIssuance, 0)
                .unwrap(),
            100
        );
    }
}
