use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{PaymentWebhook, Wallet};
use crate::ports::{LedgerReader, LedgerStore, WalletRepository};
use crate::use_cases::{ReconcileOutcome, ReconciliationEngine};
use crate::validation::validate_webhook;

#[derive(Parser)]
#[command(name = "wallet-core")]
#[command(about = "Wallet Core - Payment Webhook Reconciliation", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Transaction inspection and replay
    #[command(subcommand)]
    Tx(TxCommands),

    /// Wallet management commands
    #[command(subcommand)]
    Wallet(WalletCommands),

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum TxCommands {
    /// Print a transaction and its audit trail
    Show {
        /// Transaction UUID
        #[arg(value_name = "TX_ID")]
        tx_id: Uuid,
    },

    /// Run a stored webhook payload through reconciliation again
    Replay {
        /// Path to the webhook JSON body
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum WalletCommands {
    /// Open a zeroed wallet for a user
    Open {
        /// User UUID
        #[arg(value_name = "USER_ID")]
        user_id: Uuid,
    },
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

pub async fn handle_tx_show(store: &dyn LedgerReader, tx_id: Uuid) -> anyhow::Result<String> {
    let tx = match store.find_transaction(tx_id).await {
        Ok(tx) => tx,
        Err(e) if e.is_not_found() => {
            tracing::warn!("Transaction {} not found", tx_id);
            anyhow::bail!("Transaction {} not found", tx_id)
        }
        Err(e) => return Err(e.into()),
    };
    let logs = store.list_audit_logs(tx_id, 50).await?;

    let rendered = serde_json::to_string_pretty(&serde_json::json!({
        "transaction": tx,
        "audit_logs": logs,
    }))?;
    println!("{}", rendered);

    Ok(rendered)
}

pub async fn handle_tx_replay(
    engine: &ReconciliationEngine,
    file: &Path,
) -> anyhow::Result<ReconcileOutcome> {
    let body = tokio::fs::read(file).await?;
    let payload: PaymentWebhook = serde_json::from_slice(&body)?;
    validate_webhook(&payload)?;

    tracing::info!(reference = %payload.data.reference, "Replaying webhook from {}", file.display());
    let outcome = engine.process(&payload).await?;

    match &outcome {
        ReconcileOutcome::Applied {
            transaction_id,
            status,
        } => println!("✓ Transaction {} is now {}", transaction_id, status),
        ReconcileOutcome::AlreadyApplied { transaction_id } => {
            println!("✓ Transaction {} was already applied", transaction_id)
        }
    }

    Ok(outcome)
}

pub async fn handle_wallet_open(store: &dyn LedgerStore, user_id: Uuid) -> anyhow::Result<Wallet> {
    let mut uow = store.begin().await?;
    match uow.get_wallet_by_user_id(user_id).await {
        Ok(_) => anyhow::bail!("User {} already has a wallet", user_id),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }
    let wallet = uow.create_wallet(&Wallet::open(user_id)).await?;
    uow.commit().await?;

    tracing::info!(user_id = %user_id, wallet_id = %wallet.id, "Wallet opened");
    println!("✓ Wallet {} opened for user {}", wallet.id, user_id);

    Ok(wallet)
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;
    println!("✓ Database migrations completed");

    Ok(())
}

pub async fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Redis URL: {}", mask_password(&config.redis_url));
    println!("  Signature Header: {}", config.webhook.signature_header);
    println!(
        "  Idempotency: prefix={} ttl={}s lock={}s",
        config.idempotency_key_prefix, config.idempotency_ttl_secs, config.idempotency_lock_ttl_secs
    );

    let pool = crate::db::create_pool(config).await?;
    let report = crate::startup::validate_environment(config, &pool).await?;
    report.print();

    if !report.is_valid() {
        anyhow::bail!("Configuration is invalid");
    }

    tracing::info!("Configuration is valid");
    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::FailPoint;
    use crate::adapters::{InMemoryIdempotencyStore, InMemoryLedgerStore};
    use crate::domain::{Transaction, TransactionFlow, TransactionStatus, TransactionType};
    use crate::services::idempotency::{GuardPolicy, IdempotencyGuard};
    use bigdecimal::BigDecimal;
    use std::io::Write;
    use std::sync::Arc;

    #[test]
    fn test_mask_password() {
        assert_eq!(
            mask_password("postgres://wallet:hunter2@db:5432/wallet"),
            "postgres://wallet:****@db:5432/wallet"
        );
        assert_eq!(mask_password("redis://localhost:6379"), "redis://localhost:6379");
    }

    #[test]
    fn test_parses_replay_command() {
        let cli = Cli::parse_from(["wallet-core", "tx", "replay", "hook.json"]);
        match cli.command {
            Some(Commands::Tx(TxCommands::Replay { file })) => {
                assert_eq!(file, PathBuf::from("hook.json"))
            }
            _ => panic!("expected tx replay"),
        }
    }

    #[tokio::test]
    async fn test_wallet_open_refuses_second_wallet() {
        let store = InMemoryLedgerStore::new();
        let user_id = Uuid::new_v4();

        let wallet = handle_wallet_open(&store, user_id).await.unwrap();
        assert_eq!(wallet.balance_after, BigDecimal::from(0));
        assert!(store.wallet(user_id).await.is_some());

        assert!(handle_wallet_open(&store, user_id).await.is_err());
    }

    #[tokio::test]
    async fn test_wallet_open_propagates_lookup_errors() {
        let store = InMemoryLedgerStore::new();
        let user_id = Uuid::new_v4();
        store.fail_on(FailPoint::GetWallet);

        assert!(handle_wallet_open(&store, user_id).await.is_err());
        assert!(store.wallet(user_id).await.is_none());
    }

    #[tokio::test]
    async fn test_tx_show_unknown_transaction() {
        let store = InMemoryLedgerStore::new();
        assert!(handle_tx_show(&store, Uuid::new_v4()).await.is_err());
    }

    #[tokio::test]
    async fn test_replay_applies_stored_payload() {
        let store = InMemoryLedgerStore::new();
        let user_id = Uuid::new_v4();
        let tx = Transaction::new(
            user_id,
            BigDecimal::from(500),
            "NGN".to_string(),
            TransactionType::Credit,
            Some(TransactionFlow::Revenue),
        );
        store.insert_transaction(tx.clone()).await;
        store.insert_wallet(Wallet::open(user_id)).await;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"event":"charge.completed","data":{{"status":"success","reference":"crt_{}","amount":500,"currency":"NGN","metadata":{{}},"fees":0}}}}"#,
            tx.id
        )
        .unwrap();

        let guard = IdempotencyGuard::new(
            Arc::new(InMemoryIdempotencyStore::new()),
            GuardPolicy::default(),
        );
        let engine = ReconciliationEngine::new(
            Arc::new(store.clone()),
            guard,
            crate::use_cases::reconcile_webhook::DEFAULT_DEADLINE,
        );

        let outcome = handle_tx_replay(&engine, file.path()).await.unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                transaction_id: tx.id,
                status: TransactionStatus::Successful,
            }
        );

        let shown = handle_tx_show(&store, tx.id).await.unwrap();
        assert!(shown.contains("successful"));
    }
}
