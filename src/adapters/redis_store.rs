//! Redis implementation of the idempotency store.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::time::Duration;

use crate::services::idempotency::{GuardError, IdempotencyStore};

#[derive(Clone)]
pub struct RedisIdempotencyStore {
    redis_client: redis::Client,
}

impl RedisIdempotencyStore {
    pub fn new(redis_url: &str) -> anyhow::Result<Self> {
        let redis_client = redis::Client::open(redis_url)?;
        Ok(Self { redis_client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, GuardError> {
        Ok(self.redis_client.get_multiplexed_async_connection().await?)
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, GuardError> {
        let mut conn = self.connection().await?;
        let existing: Option<String> = conn.get(key).await?;
        Ok(existing)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), GuardError> {
        let mut conn = self.connection().await?;
        let _: () = conn.set_ex(key, value, ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, GuardError> {
        let mut conn = self.connection().await?;
        // SET NX EX replies OK when written and nil when the key already exists.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), GuardError> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(key).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RedisIdempotencyStore {
        let url = std::env::var("REDIS_URL").expect("REDIS_URL must be set for tests");
        RedisIdempotencyStore::new(&url).expect("valid redis url")
    }

    #[tokio::test]
    #[ignore] // requires REDIS_URL
    async fn test_set_if_absent_is_exclusive() {
        let store = store();
        let key = format!("test_{}", uuid::Uuid::new_v4());

        assert!(store
            .set_if_absent(&key, "processing", Duration::from_secs(30))
            .await
            .unwrap());
        assert!(!store
            .set_if_absent(&key, "processing", Duration::from_secs(30))
            .await
            .unwrap());

        store.delete(&key).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    #[ignore] // requires REDIS_URL
    async fn test_set_overwrites_lock() {
        let store = store();
        let key = format!("test_{}", uuid::Uuid::new_v4());

        store
            .set_if_absent(&key, "processing", Duration::from_secs(30))
            .await
            .unwrap();
        store
            .set(&key, "successful", Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("successful"));
        store.delete(&key).await.unwrap();
    }

    #[test]
    fn ttl_never_rounds_to_zero() {
        assert_eq!(ttl_secs(Duration::from_millis(10)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(604800)), 604800);
    }
}
