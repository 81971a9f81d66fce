//! Funding escrow contexts in Redis

use async_trait::async_trait;
use cardvault_core::error::AppError;
use cardvault_core::models::{FundingContext, FundingContextUpdate};
use cardvault_core::traits::EscrowStore;
use redis::AsyncCommands;
use tracing::{debug, error, info};

use crate::keys::escrow_key;
use crate::RedisCache;

/// Stores [`FundingContext`] values as JSON with a fixed lifetime
#[derive(Clone)]
pub struct RedisEscrowStore {
    cache: RedisCache,
    ttl_secs: u64,
}

impl RedisEscrowStore {
    pub fn new(cache: RedisCache, ttl_secs: u64) -> Self {
        Self { cache, ttl_secs }
    }

    async fn read(&self, key: &str) -> Result<Option<FundingContext>, AppError> {
        let mut conn = self.cache.connection();
        let raw: Option<String> = conn.get(key).await.map_err(RedisCache::map_redis_error)?;

        raw.map(|json| {
            serde_json::from_str(&json).map_err(|e| {
                error!(key, "Corrupt funding context: {}", e);
                AppError::Serialization(format!("Funding context: {}", e))
            })
        })
        .transpose()
    }

    async fn write(&self, key: &str, context: &FundingContext, ttl_secs: u64) -> Result<(), AppError> {
        let json = serde_json::to_string(context)
            .map_err(|e| AppError::Serialization(format!("Funding context: {}", e)))?;
        let mut conn = self.cache.connection();
        let _: () = conn
            .set_ex(key, json, ttl_secs)
            .await
            .map_err(RedisCache::map_redis_error)?;
        Ok(())
    }

    /// Seconds left on `key`; `None` when it is gone or has no expiry
    async fn remaining_ttl(&self, key: &str) -> Result<Option<u64>, AppError> {
        let mut conn = self.cache.connection();
        let ttl: i64 = conn.ttl(key).await.map_err(RedisCache::map_redis_error)?;
        Ok(u64::try_from(ttl).ok())
    }
}

#[async_trait]
impl EscrowStore for RedisEscrowStore {
    async fn store(&self, context: &FundingContext) -> Result<(), AppError> {
        let key = escrow_key(&context.exchange_reference);
        self.write(&key, context, self.ttl_secs).await?;

        info!(
            exchange_reference = %context.exchange_reference,
            card_id = %context.card_id,
            ttl_secs = self.ttl_secs,
            "Funding context stored"
        );
        Ok(())
    }

    async fn get(&self, reference: &str) -> Result<Option<FundingContext>, AppError> {
        self.read(&escrow_key(reference)).await
    }

    /// Read-modify-write; callers hold the funding lock for the reference
    async fn update(
        &self,
        reference: &str,
        update: &FundingContextUpdate,
    ) -> Result<FundingContext, AppError> {
        let key = escrow_key(reference);

        let mut context = self
            .read(&key)
            .await?
            .ok_or_else(|| AppError::FundingContextNotFound(reference.to_string()))?;
        context.apply(update);

        // Keep the original expiry
        let ttl = self.remaining_ttl(&key).await?.unwrap_or(self.ttl_secs).max(1);
        self.write(&key, &context, ttl).await?;

        debug!(exchange_reference = %reference, ttl, "Funding context updated");
        Ok(context)
    }

    async fn remove(&self, reference: &str) -> Result<bool, AppError> {
        let mut conn = self.cache.connection();
        let deleted: i64 = conn
            .del(escrow_key(reference))
            .await
            .map_err(RedisCache::map_redis_error)?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn context(reference: &str) -> FundingContext {
        FundingContext {
            exchange_reference: reference.to_string(),
            user_id: Uuid::new_v4(),
            card_id: Uuid::new_v4(),
            card_account_id: Uuid::new_v4(),
            from_currency: "NGN".to_string(),
            source_amount: dec!(25000),
            usd_amount_after_exchange: dec!(15.0999388),
            exchange_fee: dec!(0.12),
            card_fee: dec!(0.075499694),
            card_fee_usd: dec!(0.07),
            net_usd_amount: dec!(15.01),
            network: "SOLANA".to_string(),
            deposit_address: "So1anaAddr".to_string(),
            card_transaction_id: None,
            created_at: Utc::now(),
            executed_at: None,
        }
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_store_update_remove() {
        let cache = RedisCache::new("redis://127.0.0.1:6379").await.unwrap();
        let store = RedisEscrowStore::new(cache, 60);
        let reference = format!("ex_{}", Uuid::new_v4());

        store.store(&context(&reference)).await.unwrap();
        let loaded = store.get(&reference).await.unwrap().unwrap();
        assert_eq!(loaded.net_usd_amount, dec!(15.01));

        let tx_id = Uuid::new_v4();
        let updated = store
            .update(
                &reference,
                &FundingContextUpdate {
                    card_transaction_id: Some(tx_id),
                    executed_at: Some(Utc::now()),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.card_transaction_id, Some(tx_id));

        assert!(store.remove(&reference).await.unwrap());
        assert!(store.get(&reference).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_update_missing_context() {
        let cache = RedisCache::new("redis://127.0.0.1:6379").await.unwrap();
        let store = RedisEscrowStore::new(cache, 60);

        let result = store
            .update("missing", &FundingContextUpdate::default())
            .await;
        assert!(matches!(result, Err(AppError::FundingContextNotFound(_))));
    }
}
