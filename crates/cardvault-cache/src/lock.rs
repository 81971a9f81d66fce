//! Redis-backed named locks
//!
//! A lock is a key set with `SET key token PX ttl NX`. Only the holder's
//! token can delete it; an expired lock simply disappears.

use async_trait::async_trait;
use cardvault_core::error::AppError;
use cardvault_core::traits::{LockGuard, LockService};
use redis::Script;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::keys::lock_key;
use crate::RedisCache;

/// Delete the key only while it still carries our token
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Lock service on top of the shared Redis connection
#[derive(Clone)]
pub struct RedisLockService {
    cache: RedisCache,
}

impl RedisLockService {
    pub fn new(cache: RedisCache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl LockService for RedisLockService {
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockGuard>, AppError> {
        let key = lock_key(name);
        let token = Uuid::new_v4().to_string();
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let mut conn = self.cache.connection();

        // SET key value PX ttl NX - returns OK if set, nil if key exists
        let result: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("PX")
            .arg(ttl_ms)
            .arg("NX")
            .query_async(&mut conn)
            .await
            .map_err(RedisCache::map_redis_error)?;

        if result.is_some() {
            debug!("Lock acquired: {} (TTL: {}ms)", key, ttl_ms);
            Ok(Some(LockGuard {
                key: name.to_string(),
                token,
            }))
        } else {
            debug!("Lock busy: {}", key);
            Ok(None)
        }
    }

    async fn release(&self, guard: &LockGuard) -> Result<bool, AppError> {
        let key = lock_key(&guard.key);
        let mut conn = self.cache.connection();

        let deleted: i64 = Script::new(RELEASE_SCRIPT)
            .key(&key)
            .arg(&guard.token)
            .invoke_async(&mut conn)
            .await
            .map_err(RedisCache::map_redis_error)?;

        if deleted == 0 {
            warn!("Lock {} expired before release", key);
        } else {
            debug!("Lock released: {}", key);
        }
        Ok(deleted > 0)
    }
}
