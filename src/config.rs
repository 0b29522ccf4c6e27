use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::services::idempotency::GuardPolicy;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub redis_url: String,
    pub webhook: WebhookAuthConfig,
    pub idempotency_key_prefix: String,
    pub idempotency_ttl_secs: u64,
    pub idempotency_lock_ttl_secs: u64,
    pub reconcile_timeout_ms: u64,
    pub log_request_body: bool,
    pub log_format: LogFormat,
}

/// How inbound webhooks prove they come from the payment gateway.
#[derive(Debug, Deserialize, Clone)]
pub struct WebhookAuthConfig {
    pub secret: String,
    pub signature_header: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            database_url: env::var("DATABASE_URL")?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            redis_url: env::var("REDIS_URL")?,
            webhook: WebhookAuthConfig {
                secret: env::var("WEBHOOK_SECRET")?,
                signature_header: env::var("WEBHOOK_SIGNATURE_HEADER")
                    .unwrap_or_else(|_| "x-webhook-signature".to_string())
                    .to_lowercase(),
            },
            idempotency_key_prefix: env::var("IDEMPOTENCY_KEY_PREFIX")
                .unwrap_or_else(|_| "wbk".to_string()),
            idempotency_ttl_secs: env::var("IDEMPOTENCY_TTL_SECS")
                .unwrap_or_else(|_| "604800".to_string())
                .parse()?,
            idempotency_lock_ttl_secs: env::var("IDEMPOTENCY_LOCK_TTL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()?,
            reconcile_timeout_ms: env::var("RECONCILE_TIMEOUT_MS")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()?,
            log_request_body: env::var("LOG_REQUEST_BODY")
                .unwrap_or_else(|_| "false".to_string())
                .parse()?,
            log_format: parse_log_format(
                &env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
            )?,
        })
    }

    pub fn guard_policy(&self) -> GuardPolicy {
        GuardPolicy {
            key_prefix: self.idempotency_key_prefix.clone(),
            ttl: Duration::from_secs(self.idempotency_ttl_secs),
            lock_ttl: Duration::from_secs(self.idempotency_lock_ttl_secs),
        }
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_millis(self.reconcile_timeout_ms)
    }
}

fn parse_log_format(raw: &str) -> anyhow::Result<LogFormat> {
    match raw.trim().to_lowercase().as_str() {
        "text" | "" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => anyhow::bail!("LOG_FORMAT must be 'text' or 'json', got '{}'", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            server_port: 3000,
            database_url: "postgres://localhost:5432/wallet".to_string(),
            database_max_connections: 5,
            redis_url: "redis://localhost:6379".to_string(),
            webhook: WebhookAuthConfig {
                secret: "whsec".to_string(),
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
    fn parses_log_format() {
        assert_eq!(parse_log_format("JSON").unwrap(), LogFormat::Json);
        assert_eq!(parse_log_format("text").unwrap(), LogFormat::Text);
        assert!(parse_log_format("xml").is_err());
    }

    #[test]
    fn guard_policy_uses_configured_windows() {
        let policy = sample().guard_policy();
        assert_eq!(policy.key_prefix, "wbk");
        assert_eq!(policy.ttl, Duration::from_secs(7 * 24 * 60 * 60));
        assert_eq!(policy.lock_ttl, Duration::from_secs(300));
    }
}
