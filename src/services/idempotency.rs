use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::ReferenceKind;

pub const PROCESSING: &str = "processing";
pub const APPLIED: &str = "successful";

const DEFAULT_TTL_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_LOCK_TTL_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error("idempotency store unavailable: {0}")]
    Unavailable(String),
}

impl From<redis::RedisError> for GuardError {
    fn from(e: redis::RedisError) -> Self {
        GuardError::Unavailable(e.to_string())
    }
}

/// Key/value contract of the idempotency store.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, GuardError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), GuardError>;

    /// Atomically writes `value` only when `key` is absent. Returns whether it was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, GuardError>;

    async fn delete(&self, key: &str) -> Result<(), GuardError>;
}

#[derive(Debug, Clone)]
pub struct GuardPolicy {
    pub key_prefix: String,
    /// How long an applied marker survives. Must exceed the provider's redelivery window.
    pub ttl: Duration,
    /// How long an in-flight lock survives if its holder dies before releasing it.
    pub lock_ttl: Duration,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            key_prefix: "wbk".to_string(),
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            lock_ttl: Duration::from_secs(DEFAULT_LOCK_TTL_SECS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardStatus {
    /// Lock taken; the caller owns the mutation phase.
    Acquired,
    /// Another delivery holds the lock.
    InFlight,
    /// The reference was already applied.
    Applied,
}

/// Guards webhook application with an atomic set-if-absent lock that later becomes the
/// applied marker.
#[derive(Clone)]
pub struct IdempotencyGuard {
    store: Arc<dyn IdempotencyStore>,
    policy: GuardPolicy,
}

impl IdempotencyGuard {
    pub fn new(store: Arc<dyn IdempotencyStore>, policy: GuardPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &GuardPolicy {
        &self.policy
    }

    pub fn key_for(&self, kind: ReferenceKind, transaction_id: Uuid) -> String {
        format!("{}_{}_{}", self.policy.key_prefix, kind.prefix(), transaction_id)
    }

    pub async fn seen(&self, key: &str) -> Result<Option<String>, GuardError> {
        self.store.get(key).await
    }

    pub async fn acquire(&self, key: &str) -> Result<GuardStatus, GuardError> {
        if self
            .store
            .set_if_absent(key, PROCESSING, self.policy.lock_ttl)
            .await?
        {
            return Ok(GuardStatus::Acquired);
        }

        match self.store.get(key).await? {
            Some(value) if value == APPLIED => Ok(GuardStatus::Applied),
            Some(_) => Ok(GuardStatus::InFlight),
            // Lock expired between the two calls; try once more.
            None => {
                if self
                    .store
                    .set_if_absent(key, PROCESSING, self.policy.lock_ttl)
                    .await?
                {
                    Ok(GuardStatus::Acquired)
                } else {
                    Ok(GuardStatus::InFlight)
                }
            }
        }
    }

    pub async fn mark_applied(&self, key: &str) -> Result<(), GuardError> {
        self.store.set(key, APPLIED, self.policy.ttl).await
    }

    pub async fn release(&self, key: &str) -> Result<(), GuardError> {
        self.store.delete(key).await
    }
}
