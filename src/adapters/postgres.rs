//! Postgres implementation of the ledger store.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Acquire, PgPool, Postgres};
use uuid::Uuid;

use crate::domain::{
    AuditLogEntry, Balance, ProviderMetadata, Transaction, TransactionType, Wallet,
};
use crate::ports::{
    AuditTrail, BalanceRepository, LedgerReader, LedgerStore, RepositoryError, RepositoryResult,
    TransactionRepository, UnitOfWork, UserDirectory, WalletRepository,
};

/// Postgres-backed ledger store. Each unit of work is one database transaction.
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> RepositoryResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

#[async_trait]
impl LedgerReader for PgLedgerStore {
    async fn find_transaction(&self, id: Uuid) -> RepositoryResult<Transaction> {
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, user_id, amount, charges, currency, transaction_type, transaction_flow,
                   status, metadata, created_at, updated_at
            FROM transactions
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| RepositoryError::NotFound(id.to_string()))?
            .into_domain()
    }

    async fn find_wallet(&self, user_id: Uuid) -> RepositoryResult<Wallet> {
        let row = sqlx::query_as::<_, WalletRow>(
            r#"
            SELECT id, user_id, balance_before, balance_after, transaction_id, transaction_type,
                   balance_id, created_at, updated_at
            FROM wallets
            WHERE user_id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("wallet for user {}", user_id)))?
            .into_domain()
    }

    async fn list_audit_logs(
        &self,
        transaction_id: Uuid,
        limit: i64,
    ) -> RepositoryResult<Vec<AuditLogEntry>> {
        let rows = sqlx::query_as::<_, AuditLogRow>(
            r#"
            SELECT id, tenant_id, user_id, transaction_id, actor, action_done, messages,
                   created_at
            FROM audit_logs
            WHERE transaction_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(transaction_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AuditLogRow::into_domain).collect()
    }
}

/// Rolls back on drop unless committed.
pub struct PgUnitOfWork {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl TransactionRepository for PgUnitOfWork {
    async fn get_transaction_by_id(&mut self, id: Uuid) -> RepositoryResult<Transaction> {
        let row = sqlx::query_as::<_, TransactionRow>(
            r#"
            SELECT id, user_id, amount, charges, currency, transaction_type, transaction_flow,
                   status, metadata, created_at, updated_at
            FROM transactions
            WHERE id = $1 AND deleted_at IS NULL
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.ok_or_else(|| RepositoryError::NotFound(id.to_string()))?
            .into_domain()
    }

    async fn update_transaction_by_id(&mut self, tx: &Transaction) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET amount = $2, charges = $3, currency = $4, status = $5, metadata = $6,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(tx.id)
        .bind(&tx.amount)
        .bind(&tx.charges)
        .bind(&tx.currency)
        .bind(tx.status.as_str())
        .bind(Json(&tx.metadata))
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(tx.id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BalanceRepository for PgUnitOfWork {
    async fn create_balance(&mut self, balance: &Balance) -> RepositoryResult<Balance> {
        let row = sqlx::query_as::<_, BalanceRow>(
            r#"
            INSERT INTO balances (
                id, user_id, transaction_id, transaction_type, balance_before, balance_after,
                created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id, user_id, transaction_id, transaction_type, balance_before,
                balance_after, created_at
            "#,
        )
        .bind(balance.id)
        .bind(balance.user_id)
        .bind(balance.transaction_id)
        .bind(balance.transaction_type.as_str())
        .bind(&balance.balance_before)
        .bind(&balance.balance_after)
        .bind(balance.created_at)
        .fetch_one(&mut *self.tx)
        .await?;

        row.into_domain()
    }

    async fn get_latest_balance_by_user_id(&mut self, user_id: Uuid) -> RepositoryResult<Balance> {
        let row = sqlx::query_as::<_, BalanceRow>(
            r#"
            SELECT id, user_id, transaction_id, transaction_type, balance_before, balance_after,
                   created_at
            FROM balances
            WHERE user_id = $1
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(row) => row.into_domain(),
            None => Ok(Balance::zero(user_id)),
        }
    }
}

#[async_trait]
impl WalletRepository for PgUnitOfWork {
    async fn create_wallet(&mut self, wallet: &Wallet) -> RepositoryResult<Wallet> {
        let row = sqlx::query_as::<_, WalletRow>(
            r#"
            INSERT INTO wallets (
                id, user_id, balance_before, balance_after, transaction_id, transaction_type,
                balance_id, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, user_id, balance_before, balance_after, transaction_id,
                transaction_type, balance_id, created_at, updated_at
            "#,
        )
        .bind(wallet.id)
        .bind(wallet.user_id)
        .bind(&wallet.balance_before)
        .bind(&wallet.balance_after)
        .bind(wallet.transaction_id)
        .bind(wallet.transaction_type.map(|t| t.as_str()))
        .bind(wallet.balance_id)
        .bind(wallet.created_at)
        .fetch_one(&mut *self.tx)
        .await?;

        row.into_domain()
    }

    async fn get_wallet_by_user_id(&mut self, user_id: Uuid) -> RepositoryResult<Wallet> {
        let row = sqlx::query_as::<_, WalletRow>(
            r#"
            SELECT id, user_id, balance_before, balance_after, transaction_id, transaction_type,
                   balance_id, created_at, updated_at
            FROM wallets
            WHERE user_id = $1 AND deleted_at IS NULL
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("wallet for user {}", user_id)))?
            .into_domain()
    }

    async fn update_wallet_by_id(&mut self, wallet: &Wallet) -> RepositoryResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE wallets
            SET balance_before = $2, balance_after = $3, transaction_id = $4,
                transaction_type = $5, balance_id = $6, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(wallet.id)
        .bind(&wallet.balance_before)
        .bind(&wallet.balance_after)
        .bind(wallet.transaction_id)
        .bind(wallet.transaction_type.map(|t| t.as_str()))
        .bind(wallet.balance_id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(wallet.id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditTrail for PgUnitOfWork {
    async fn append_audit_log(&mut self, entry: &AuditLogEntry) -> RepositoryResult<AuditLogEntry> {
        // A failed statement aborts the whole Postgres transaction; the savepoint confines
        // the damage to this insert.
        let mut savepoint = (&mut self.tx).begin().await?;

        let row = sqlx::query_as::<_, AuditLogRow>(
            r#"
            INSERT INTO audit_logs (
                id, tenant_id, user_id, transaction_id, actor, action_done, messages, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, tenant_id, user_id, transaction_id, actor, action_done, messages,
                created_at
            "#,
        )
        .bind(entry.id)
        .bind(entry.tenant_id)
        .bind(entry.user_id)
        .bind(entry.transaction_id)
        .bind(entry.actor.as_str())
        .bind(entry.action_done.as_str())
        .bind(&entry.message)
        .bind(entry.created_at)
        .fetch_one(&mut *savepoint)
        .await;

        match row {
            Ok(row) => {
                savepoint.commit().await?;
                row.into_domain()
            }
            Err(e) => {
                savepoint.rollback().await?;
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl UserDirectory for PgUnitOfWork {
    async fn tenant_of(&mut self, user_id: Uuid) -> RepositoryResult<Option<Uuid>> {
        let tenant: Option<Uuid> =
            sqlx::query_scalar("SELECT tenant_id FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(tenant)
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(value: &str) -> RepositoryResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| RepositoryError::InvalidData(e.to_string()))
}

/// Internal row types for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    user_id: Uuid,
    amount: BigDecimal,
    charges: BigDecimal,
    currency: String,
    transaction_type: String,
    transaction_flow: Option<String>,
    status: String,
    metadata: Option<Json<ProviderMetadata>>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TransactionRow {
    fn into_domain(self) -> RepositoryResult<Transaction> {
        Ok(Transaction {
            id: self.id,
            user_id: self.user_id,
            amount: self.amount,
            charges: self.charges,
            currency: self.currency,
            transaction_type: parse(&self.transaction_type)?,
            transaction_flow: self.transaction_flow.as_deref().map(parse).transpose()?,
            status: parse(&self.status)?,
            metadata: self.metadata.map(|m| m.0).unwrap_or_default(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct BalanceRow {
    id: Uuid,
    user_id: Uuid,
    transaction_id: Uuid,
    transaction_type: String,
    balance_before: BigDecimal,
    balance_after: BigDecimal,
    created_at: DateTime<Utc>,
}

impl BalanceRow {
    fn into_domain(self) -> RepositoryResult<Balance> {
        Ok(Balance {
            id: self.id,
            user_id: self.user_id,
            transaction_id: self.transaction_id,
            transaction_type: parse(&self.transaction_type)?,
            balance_before: self.balance_before,
            balance_after: self.balance_after,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WalletRow {
    id: Uuid,
    user_id: Uuid,
    balance_before: BigDecimal,
    balance_after: BigDecimal,
    transaction_id: Option<Uuid>,
    transaction_type: Option<String>,
    balance_id: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl WalletRow {
    fn into_domain(self) -> RepositoryResult<Wallet> {
        Ok(Wallet {
            id: self.id,
            user_id: self.user_id,
            balance_before: self.balance_before,
            balance_after: self.balance_after,
            transaction_id: self.transaction_id,
            transaction_type: self
                .transaction_type
                .as_deref()
                .map(parse::<TransactionType>)
                .transpose()?,
            balance_id: self.balance_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AuditLogRow {
    id: Uuid,
    tenant_id: Option<Uuid>,
    user_id: Option<Uuid>,
    transaction_id: Option<Uuid>,
    actor: String,
    action_done: String,
    messages: String,
    created_at: DateTime<Utc>,
}

impl AuditLogRow {
    fn into_domain(self) -> RepositoryResult<AuditLogEntry> {
        Ok(AuditLogEntry {
            id: self.id,
            tenant_id: self.tenant_id,
            user_id: self.user_id,
            transaction_id: self.transaction_id,
            actor: parse(&self.actor)?,
            action_done: parse(&self.action_done)?,
            message: self.messages,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryIdempotencyStore;
    use crate::domain::{AuditAction, PaymentWebhook, TransactionFlow, TransactionStatus};
    use crate::services::idempotency::{GuardPolicy, IdempotencyGuard};
    use crate::use_cases::{ReconcileOutcome, ReconciliationEngine};
    use sqlx::migrate::Migrator;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    async fn setup_test_db() -> PgPool {
        let database_url =
            std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for tests");
        let pool = PgPool::connect(&database_url)
            .await
            .expect("Failed to connect to test DB");
        let migrator = Migrator::new(Path::new("./migrations"))
            .await
            .expect("Failed to load migrations");
        migrator
            .run(&pool)
            .await
            .expect("Failed to run migrations on test DB");
        pool
    }

    async fn seed(pool: &PgPool) -> (Transaction, Wallet) {
        let tenant_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        sqlx::query("INSERT INTO tenants (id, name) VALUES ($1, 'acme')")
            .bind(tenant_id)
            .execute(pool)
            .await
            .expect("insert tenant");
        sqlx::query("INSERT INTO users (id, tenant_id, email) VALUES ($1, $2, $3)")
            .bind(user_id)
            .bind(tenant_id)
            .bind(format!("{}@example.com", user_id))
            .execute(pool)
            .await
            .expect("insert user");

        let tx = Transaction::new(
            user_id,
            BigDecimal::from(500),
            "NGN".to_string(),
            TransactionType::Credit,
            Some(TransactionFlow::Revenue),
        );
        crate::db::queries::insert_transaction(pool, &tx)
            .await
            .expect("insert transaction");

        let store = PgLedgerStore::new(pool.clone());
        let mut uow = store.begin().await.expect("begin");
        let wallet = uow
            .create_wallet(&Wallet::open(user_id))
            .await
            .expect("create wallet");
        uow.commit().await.expect("commit");

        (tx, wallet)
    }

    #[tokio::test]
    #[ignore] // requires DATABASE_URL
    async fn test_unit_of_work_commits_all_writes() {
        let pool = setup_test_db().await;
        let (mut tx, mut wallet) = seed(&pool).await;
        let store = PgLedgerStore::new(pool.clone());

        let mut uow = store.begin().await.unwrap();
        let latest = uow.get_latest_balance_by_user_id(tx.user_id).await.unwrap();
        assert_eq!(latest.balance_after, BigDecimal::from(0));

        let snapshot = latest.next(tx.id, TransactionType::Credit, &tx.amount);
        let created = uow.create_balance(&snapshot).await.unwrap();
        wallet.advance_to(&created);
        uow.update_wallet_by_id(&wallet).await.unwrap();
        tx.status = TransactionStatus::Successful;
        uow.update_transaction_by_id(&tx).await.unwrap();
        let tenant = uow.tenant_of(tx.user_id).await.unwrap();
        uow.append_audit_log(&AuditLogEntry::for_transaction(
            tx.id,
            tx.user_id,
            tenant,
            AuditAction::Success,
            "received a credit to wallet",
        ))
        .await
        .unwrap();
        uow.commit().await.unwrap();

        let stored = store.find_transaction(tx.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Successful);
        let stored_wallet = store.find_wallet(tx.user_id).await.unwrap();
        assert_eq!(stored_wallet.balance_after, BigDecimal::from(500));
        assert_eq!(stored_wallet.balance_id, Some(created.id));
        let logs = store.list_audit_logs(tx.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].tenant_id.is_some());
    }

    #[tokio::test]
    #[ignore] // requires DATABASE_URL
    async fn test_dropped_unit_of_work_rolls_back() {
        let pool = setup_test_db().await;
        let (tx, _) = seed(&pool).await;
        let store = PgLedgerStore::new(pool.clone());

        {
            let mut uow = store.begin().await.unwrap();
            let snapshot = Balance::zero(tx.user_id).next(tx.id, TransactionType::Credit, &tx.amount);
            uow.create_balance(&snapshot).await.unwrap();
        }

        let mut check = store.begin().await.unwrap();
        let latest = check.get_latest_balance_by_user_id(tx.user_id).await.unwrap();
        assert_eq!(latest.id, Uuid::nil());
    }

    #[tokio::test]
    #[ignore] // requires DATABASE_URL
    async fn test_failed_audit_insert_keeps_transaction_usable() {
        let pool = setup_test_db().await;
        let (tx, _) = seed(&pool).await;
        let store = PgLedgerStore::new(pool.clone());

        let mut uow = store.begin().await.unwrap();
        let entry = AuditLogEntry::for_transaction(
            tx.id,
            tx.user_id,
            None,
            AuditAction::Pending,
            "transaction pending",
        );
        uow.append_audit_log(&entry).await.unwrap();
        // Same primary key violates the constraint.
        assert!(uow.append_audit_log(&entry).await.is_err());

        let snapshot = Balance::zero(tx.user_id).next(tx.id, TransactionType::Credit, &tx.amount);
        uow.create_balance(&snapshot).await.unwrap();
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    #[ignore] // requires DATABASE_URL
    async fn test_reads_do_not_wait_on_locked_rows() {
        let pool = setup_test_db().await;
        let (tx, _) = seed(&pool).await;
        let store = PgLedgerStore::new(pool.clone());

        let mut uow = store.begin().await.unwrap();
        uow.get_transaction_by_id(tx.id).await.unwrap();
        uow.get_wallet_by_user_id(tx.user_id).await.unwrap();

        let reads = async {
            let found = store.find_transaction(tx.id).await.unwrap();
            let wallet = store.find_wallet(tx.user_id).await.unwrap();
            (found, wallet)
        };
        let (found, wallet) = tokio::time::timeout(Duration::from_secs(2), reads)
            .await
            .expect("reads blocked on row locks");
        assert_eq!(found.id, tx.id);
        assert_eq!(wallet.user_id, tx.user_id);
        drop(uow);
    }

    fn credit(tx_id: Uuid, amount: i64) -> PaymentWebhook {
        serde_json::from_value(serde_json::json!({
            "event": "charge.completed",
            "data": {
                "status": "success",
                "reference": format!("crt_{}", tx_id),
                "amount": amount,
                "currency": "NGN",
                "metadata": {},
                "fees": 0
            }
        }))
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore] // requires DATABASE_URL
    async fn test_concurrent_credits_for_one_user_chain_snapshots() {
        let pool = setup_test_db().await;

        for _ in 0..10 {
            let (first, _) = seed(&pool).await;
            let second = Transaction::new(
                first.user_id,
                BigDecimal::from(300),
                "NGN".to_string(),
                TransactionType::Credit,
                Some(TransactionFlow::Revenue),
            );
            crate::db::queries::insert_transaction(&pool, &second).await.unwrap();

            let guard = IdempotencyGuard::new(
                Arc::new(InMemoryIdempotencyStore::new()),
                GuardPolicy::default(),
            );
            let engine = Arc::new(ReconciliationEngine::new(
                Arc::new(PgLedgerStore::new(pool.clone())),
                guard,
                Duration::from_secs(10),
            ));

            let (e1, e2) = (engine.clone(), engine.clone());
            let (p1, p2) = (credit(first.id, 500), credit(second.id, 300));
            let (a, b) = tokio::join!(
                tokio::spawn(async move { e1.process(&p1).await }),
                tokio::spawn(async move { e2.process(&p2).await }),
            );
            assert!(matches!(a.unwrap(), Ok(ReconcileOutcome::Applied { .. })));
            assert!(matches!(b.unwrap(), Ok(ReconcileOutcome::Applied { .. })));

            let snapshots: Vec<(BigDecimal, BigDecimal)> = sqlx::query_as(
                "SELECT balance_before, balance_after FROM balances WHERE user_id = $1 ORDER BY seq",
            )
            .bind(first.user_id)
            .fetch_all(&pool)
            .await
            .unwrap();
            assert_eq!(snapshots.len(), 2);
            assert_eq!(snapshots[0].0, BigDecimal::from(0));
            assert_eq!(snapshots[1].0, snapshots[0].1);
            assert_eq!(snapshots[1].1, BigDecimal::from(800));

            let store = PgLedgerStore::new(pool.clone());
            let wallet = store.find_wallet(first.user_id).await.unwrap();
            assert_eq!(wallet.balance_after, BigDecimal::from(800));
        }
    }
}
