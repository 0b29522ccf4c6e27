use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wallet_core::adapters::{PgLedgerStore, RedisIdempotencyStore};
use wallet_core::cli::{Cli, Commands, DbCommands, TxCommands, WalletCommands};
use wallet_core::config::{Config, LogFormat};
use wallet_core::health::{HealthChecks, PostgresChecker, RedisChecker};
use wallet_core::middleware::request_logger::RequestLogging;
use wallet_core::ports::LedgerStore;
use wallet_core::services::IdempotencyGuard;
use wallet_core::use_cases::ReconciliationEngine;
use wallet_core::{AppState, cli, create_app, db};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Setup logging
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => cli::handle_config_validate(&config).await,
        Commands::Tx(TxCommands::Show { tx_id }) => {
            let pool = db::create_pool(&config).await?;
            cli::handle_tx_show(&PgLedgerStore::new(pool), tx_id).await?;
            Ok(())
        }
        Commands::Tx(TxCommands::Replay { file }) => {
            let pool = db::create_pool(&config).await?;
            let engine = build_engine(&config, Arc::new(PgLedgerStore::new(pool)))?;
            cli::handle_tx_replay(&engine, &file).await?;
            Ok(())
        }
        Commands::Wallet(WalletCommands::Open { user_id }) => {
            let pool = db::create_pool(&config).await?;
            cli::handle_wallet_open(&PgLedgerStore::new(pool), user_id).await?;
            Ok(())
        }
    }
}

fn build_engine(config: &Config, store: Arc<dyn LedgerStore>) -> anyhow::Result<ReconciliationEngine> {
    let idempotency_store = RedisIdempotencyStore::new(&config.redis_url)?;
    let guard = IdempotencyGuard::new(Arc::new(idempotency_store), config.guard_policy());
    Ok(ReconciliationEngine::new(store, guard, config.reconcile_timeout()))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let started_at = Instant::now();

    let pool = db::create_pool(&config).await?;
    db::run_migrations(&pool).await?;

    let store: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(pool.clone()));
    let engine = build_engine(&config, store.clone())?;
    tracing::info!(
        key_prefix = %config.idempotency_key_prefix,
        timeout_ms = config.reconcile_timeout_ms,
        "Reconciliation engine initialized"
    );

    let state = AppState {
        engine: Arc::new(engine),
        store,
        webhook: config.webhook.clone(),
        request_logging: RequestLogging {
            log_body: config.log_request_body,
        },
        health: HealthChecks {
            postgres: Arc::new(PostgresChecker::new(pool)),
            redis: Arc::new(RedisChecker::new(config.redis_url.clone())),
            started_at,
        },
    };
    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
