use crate::config::Config;
use crate::db::queries;
use anyhow::{Context, Result};
use sqlx::PgPool;

pub struct ValidationReport {
    pub environment: bool,
    pub database: bool,
    pub redis: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.database && self.redis
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Database Connectivity: {}", status(self.database));
        println!("Redis Connectivity:    {}", status(self.redis));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

pub async fn validate_environment(config: &Config, pool: &PgPool) -> Result<ValidationReport> {
    let mut report = ValidationReport {
        environment: true,
        database: true,
        redis: true,
        errors: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {}", e));
    }

    if let Err(e) = validate_database(pool).await {
        report.database = false;
        report.errors.push(format!("Database: {}", e));
    }

    if let Err(e) = validate_redis(&config.redis_url).await {
        report.redis = false;
        report.errors.push(format!("Redis: {}", e));
    }

    Ok(report)
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.database_url.is_empty() {
        anyhow::bail!("DATABASE_URL is empty");
    }
    if config.redis_url.is_empty() {
        anyhow::bail!("REDIS_URL is empty");
    }
    if config.webhook.secret.len() < 16 {
        anyhow::bail!("WEBHOOK_SECRET must be at least 16 characters");
    }
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }
    if config.idempotency_lock_ttl_secs == 0
        || config.idempotency_lock_ttl_secs >= config.idempotency_ttl_secs
    {
        anyhow::bail!("IDEMPOTENCY_LOCK_TTL_SECS must be positive and shorter than IDEMPOTENCY_TTL_SECS");
    }
    if config.reconcile_timeout_ms / 1000 >= config.idempotency_lock_ttl_secs {
        anyhow::bail!("RECONCILE_TIMEOUT_MS must be shorter than the idempotency lock TTL");
    }

    url::Url::parse(&config.redis_url).context("REDIS_URL is not a valid URL")?;
    url::Url::parse(&config.database_url).context("DATABASE_URL is not a valid URL")?;

    Ok(())
}

async fn validate_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Failed to connect to database")?;

    let applied = queries::count_applied_migrations(pool)
        .await
        .context("Failed to check migrations table")?;

    if applied == 0 {
        anyhow::bail!("No migrations applied");
    }

    Ok(())
}

async fn validate_redis(redis_url: &str) -> Result<()> {
    let client = redis::Client::open(redis_url).context("Invalid Redis URL")?;

    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .context("Failed to connect to Redis")?;

    redis::cmd("PING")
        .query_async::<_, String>(&mut conn)
        .await
        .context("Redis PING failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LogFormat, WebhookAuthConfig};

    fn config() -> Config {
        Config {
            server_port: 3000,
            database_url: "postgres://localhost:5432/wallet".to_string(),
            database_max_connections: 5,
            redis_url: "redis://localhost:6379".to_string(),
            webhook: WebhookAuthConfig {
                secret: "whsec_0123456789abcdef".to_string(),
                signature_header: "x-webhook-signature".to_string(),
            },
            idempotency_key_prefix: "wbk".to_string(),
            idempotency_ttl_secs: 604800,
            idempotency_lock_ttl_secs: 300,
            reconcile_timeout_ms: 10000,
            log_request_body: false,
            log_format: LogFormat::Text,
        }
    }

    #[test]
    fn test_validate_env_vars_accepts_defaults() {
        assert!(validate_env_vars(&config()).is_ok());
    }

    #[test]
    fn test_validate_env_vars_empty_database_url() {
        let config = Config {
            database_url: String::new(),
            ..config()
        };

        assert!(validate_env_vars(&config).is_err());
    }

    #[test]
    fn test_validate_env_vars_invalid_redis_url() {
        let config = Config {
            redis_url: "not-a-url".to_string(),
            ..config()
        };

        assert!(validate_env_vars(&config).is_err());
    }

    #[test]
    fn test_validate_env_vars_short_secret() {
        let mut config = config();
        config.webhook.secret = "short".to_string();

        assert!(validate_env_vars(&config).is_err());
    }

    #[test]
    fn test_lock_must_outlive_deadline() {
        let config = Config {
            idempotency_lock_ttl_secs: 5,
            ..config()
        };

        assert!(validate_env_vars(&config).is_err());
    }

    #[test]
    fn test_report_validity() {
        let report = ValidationReport {
            environment: true,
            database: true,
            redis: false,
            errors: vec!["Redis: refused".to_string()],
        };
        assert!(!report.is_valid());
    }
}
