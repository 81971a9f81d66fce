//! Redis layer for CardVault
//!
//! Two stores share one multiplexed connection:
//!
//! - [`RedisLockService`] holds the named locks that serialize balance
//!   mutations, issuance-fee charges, disputes and funding steps
//! - [`RedisEscrowStore`] keeps quoted cross-currency funding contexts until
//!   they are executed or expire

pub mod escrow;
pub mod keys;
pub mod lock;

pub use escrow::RedisEscrowStore;
pub use lock::RedisLockService;

use cardvault_core::error::AppError;
use redis::{aio::ConnectionManager, Client, RedisError};
use tracing::{debug, error, warn};

/// Shared Redis connection
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    /// Open a connection manager for `url`; fails with `CacheConnection`
    pub async fn new(url: &str) -> Result<Self, AppError> {
        debug!("Connecting to Redis at {}", url);

        let client = Client::open(url)
            .map_err(|e| AppError::CacheConnection(format!("Invalid Redis URL: {}", e)))?;

        let manager = ConnectionManager::new(client).await.map_err(|e| {
            error!("Redis connection failed: {}", e);
            AppError::CacheConnection(format!("Connection failed: {}", e))
        })?;

        Ok(Self { manager })
    }

    /// Startup check used before the lock service is handed out
    pub async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.connection();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(())
    }

    pub fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// I/O failures are connection errors; a lock or escrow call hitting one
    /// surfaces as unavailable rather than as a bad value
    pub(crate) fn map_redis_error(err: RedisError) -> AppError {
        match err.kind() {
            redis::ErrorKind::IoError => {
                error!("Redis I/O error: {}", err);
                AppError::CacheConnection(format!("I/O error: {}", err))
            }
            redis::ErrorKind::TypeError => {
                warn!("Redis type error: {}", err);
                AppError::Cache(format!("Type mismatch: {}", err))
            }
            _ => AppError::Cache(err.to_string()),
        }
    }
}
