//! Mutual exclusion between reconciliation runs.
//!
//! A run holds a [`RunLockGuard`] for its whole duration. [`LocalRunLock`]
//! covers a single process; [`RedisRunLock`] covers every instance sharing a
//! Redis server and expires on its own if the holder dies.

use std::sync::Arc;

use async_trait::async_trait;
use fred::clients::Client;
use fred::interfaces::{ClientLike, KeysInterface, LuaInterface};
use fred::types::config::Config as RedisConfig;
use fred::types::{Expiration, SetOptions};
use lapse_common::{AppError, AppResult, IdGenerator};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Proof that the caller holds the run lock.
#[async_trait]
pub trait RunLockGuard: Send {
    /// Give the lock back.
    async fn release(self: Box<Self>) -> AppResult<()>;
}

/// Lock acquired before a reconciliation run starts.
#[async_trait]
pub trait RunLock: Send + Sync {
    /// Take the lock if it is free. `None` means another run holds it.
    async fn try_acquire(&self) -> AppResult<Option<Box<dyn RunLockGuard>>>;
}

/// In-process run lock.
#[derive(Clone, Default)]
pub struct LocalRunLock {
    mutex: Arc<Mutex<()>>,
}

impl LocalRunLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

struct LocalGuard(OwnedMutexGuard<()>);

#[async_trait]
impl RunLockGuard for LocalGuard {
    async fn release(self: Box<Self>) -> AppResult<()> {
        drop(self.0);
        Ok(())
    }
}

#[async_trait]
impl RunLock for LocalRunLock {
    async fn try_acquire(&self) -> AppResult<Option<Box<dyn RunLockGuard>>> {
        Ok(self
            .mutex
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| Box::new(LocalGuard(guard)) as Box<dyn RunLockGuard>))
    }
}

/// Deletes the key only while it still holds our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Run lock shared through Redis.
///
/// The key is not renewed while a run is in progress, so `ttl_secs` must
/// exceed the longest expected run. Once it lapses another instance may start;
/// accounts it reaches that are already locked fail their unit of work.
#[derive(Clone)]
pub struct RedisRunLock {
    client: Client,
    key: String,
    ttl_secs: i64,
    id_gen: IdGenerator,
}

impl RedisRunLock {
    /// Connect to Redis and build a lock under `{prefix}reconciliation:lock`.
    pub async fn connect(redis_url: &str, prefix: &str, ttl_secs: u64) -> AppResult<Self> {
        let config = RedisConfig::from_url(redis_url).map_err(|e| AppError::Redis(e.to_string()))?;
        let client = Client::new(config, None, None, None);
        client
            .init()
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        info!("Redis run lock initialized");

        Ok(Self::new(client, prefix, ttl_secs))
    }

    /// Build a lock over an initialized client.
    #[must_use]
    pub fn new(client: Client, prefix: &str, ttl_secs: u64) -> Self {
        Self {
            client,
            key: lock_key(prefix),
            ttl_secs: i64::try_from(ttl_secs).unwrap_or(i64::MAX),
            id_gen: IdGenerator::new(),
        }
    }
}

fn lock_key(prefix: &str) -> String {
    format!("{prefix}reconciliation:lock")
}

struct RedisGuard {
    client: Client,
    key: String,
    token: String,
}

#[async_trait]
impl RunLockGuard for RedisGuard {
    async fn release(self: Box<Self>) -> AppResult<()> {
        let deleted: i64 = self
            .client
            .eval(RELEASE_SCRIPT, vec![self.key.clone()], vec![self.token.clone()])
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        if deleted == 0 {
            warn!(key = %self.key, "Run lock expired before release");
        }

        Ok(())
    }
}

#[async_trait]
impl RunLock for RedisRunLock {
    async fn try_acquire(&self) -> AppResult<Option<Box<dyn RunLockGuard>>> {
        let token = self.id_gen.generate_token();

        // NX returns None if the key already exists
        let result: Option<String> = self
            .client
            .set(
                self.key.clone(),
                token.clone(),
                Some(Expiration::EX(self.ttl_secs)),
                Some(SetOptions::NX),
                false,
            )
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        if result.is_none() {
            debug!(key = %self.key, "Run lock held elsewhere");
            return Ok(None);
        }

        Ok(Some(Box::new(RedisGuard {
            client: self.client.clone(),
            key: self.key.clone(),
            token,
        })))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_lock_is_exclusive() {
        let lock = LocalRunLock::new();

        let guard = lock.try_acquire().await.unwrap();
        assert!(guard.is_some());
        assert!(lock.try_acquire().await.unwrap().is_none());

        guard.unwrap().release().await.unwrap();
        assert!(lock.try_acquire().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_local_lock_clones_share_state() {
        let lock = LocalRunLock::new();
        let other = lock.clone();

        let _guard = lock.try_acquire().await.unwrap().unwrap();
        assert!(other.try_acquire().await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_redis_lock_is_exclusive() {
        let url = std::env::var("TEST_REDIS_URL")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let lock = RedisRunLock::connect(&url, "lapse_test:", 30).await.unwrap();

        let guard = lock.try_acquire().await.unwrap().unwrap();
        assert!(lock.try_acquire().await.unwrap().is_none());

        guard.release().await.unwrap();
        let again = lock.try_acquire().await.unwrap().unwrap();
        again.release().await.unwrap();
    }

    #[test]
    fn test_lock_key_uses_prefix() {
        assert_eq!(lock_key("lapse:"), "lapse:reconciliation:lock");
    }
}
