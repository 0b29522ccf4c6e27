use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

const CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const CRITICAL_DEPENDENCIES: [&str; 1] = ["postgres"];

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: HashMap<String, DependencyStatus>,
}

impl HealthResponse {
    pub fn is_unhealthy(&self) -> bool {
        self.status == "unhealthy"
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyStatus {
    Healthy { status: String, latency_ms: u64 },
    Unhealthy { status: String, error: String },
}

impl DependencyStatus {
    fn healthy(start: Instant) -> Self {
        DependencyStatus::Healthy {
            status: "healthy".to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn unhealthy(error: impl ToString) -> Self {
        DependencyStatus::Unhealthy {
            status: "unhealthy".to_string(),
            error: error.to_string(),
        }
    }
}

#[async_trait]
pub trait DependencyChecker: Send + Sync {
    async fn check(&self) -> DependencyStatus;
}

pub struct PostgresChecker {
    pool: sqlx::PgPool,
}

impl PostgresChecker {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DependencyChecker for PostgresChecker {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e),
        }
    }
}

/// Redis only backs the idempotency guard. Losing it makes webhooks fail closed but reads
/// keep working, so it degrades rather than fails the service.
pub struct RedisChecker {
    url: String,
}

impl RedisChecker {
    pub fn new(url: String) -> Self {
        Self { url }
    }
}

#[async_trait]
impl DependencyChecker for RedisChecker {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        let client = match redis::Client::open(self.url.as_str()) {
            Ok(client) => client,
            Err(e) => return DependencyStatus::unhealthy(e),
        };
        let mut conn = match client.get_multiplexed_async_connection().await {
            Ok(conn) => conn,
            Err(e) => return DependencyStatus::unhealthy(e),
        };
        match redis::cmd("PING").query_async::<_, String>(&mut conn).await {
            Ok(_) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e),
        }
    }
}

/// The dependencies probed by `GET /health`.
#[derive(Clone)]
pub struct HealthChecks {
    pub postgres: Arc<dyn DependencyChecker>,
    pub redis: Arc<dyn DependencyChecker>,
    pub started_at: Instant,
}

pub async fn check_health(checks: &HealthChecks) -> HealthResponse {
    let (postgres_result, redis_result) = tokio::join!(
        timeout(CHECK_TIMEOUT, checks.postgres.check()),
        timeout(CHECK_TIMEOUT, checks.redis.check()),
    );

    let mut dependencies = HashMap::new();
    dependencies.insert(
        "postgres".to_string(),
        postgres_result.unwrap_or_else(|_| DependencyStatus::unhealthy("timeout")),
    );
    dependencies.insert(
        "redis".to_string(),
        redis_result.unwrap_or_else(|_| DependencyStatus::unhealthy("timeout")),
    );

    HealthResponse {
        status: determine_overall_status(&dependencies),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: checks.started_at.elapsed().as_secs(),
        dependencies,
    }
}

fn determine_overall_status(dependencies: &HashMap<String, DependencyStatus>) -> String {
    let mut has_critical_failure = false;
    let mut has_non_critical_failure = false;

    for (name, status) in dependencies {
        if matches!(status, DependencyStatus::Unhealthy { .. }) {
            if CRITICAL_DEPENDENCIES.contains(&name.as_str()) {
                has_critical_failure = true;
            } else {
                has_non_critical_failure = true;
            }
        }
    }

    if has_critical_failure {
        "unhealthy".to_string()
    } else if has_non_critical_failure {
        "degraded".to_string()
    } else {
        "healthy".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(bool);

    #[async_trait]
    impl DependencyChecker for Fixed {
        async fn check(&self) -> DependencyStatus {
            if self.0 {
                DependencyStatus::healthy(Instant::now())
            } else {
                DependencyStatus::unhealthy("connection refused")
            }
        }
    }

    fn checks(postgres: bool, redis: bool) -> HealthChecks {
        HealthChecks {
            postgres: Arc::new(Fixed(postgres)),
            redis: Arc::new(Fixed(redis)),
            started_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn test_all_dependencies_healthy() {
        let response = check_health(&checks(true, true)).await;
        assert_eq!(response.status, "healthy");
        assert_eq!(response.dependencies.len(), 2);
    }

    #[tokio::test]
    async fn test_redis_down_is_degraded() {
        let response = check_health(&checks(true, false)).await;
        assert_eq!(response.status, "degraded");
        assert!(!response.is_unhealthy());
    }

    #[tokio::test]
    async fn test_postgres_down_is_unhealthy() {
        let response = check_health(&checks(false, true)).await;
        assert_eq!(response.status, "unhealthy");
        assert!(response.is_unhealthy());
    }

    #[test]
    fn test_unhealthy_serializes_error() {
        let json = serde_json::to_value(DependencyStatus::unhealthy("timeout")).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["error"], "timeout");
    }
}
