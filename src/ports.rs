//! Repository ports consumed by the reconciliation engine.
//!
//! Every repository method takes `&mut self` because all of them run against one unit of
//! work: a scoped handle that owns the underlying store transaction. Writes become visible
//! only through [`UnitOfWork::commit`]; dropping the handle without committing rolls back.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{AuditLogEntry, Balance, Transaction, Wallet};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored row is invalid: {0}")]
    InvalidData(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RepositoryError::NotFound(_))
            || matches!(self, RepositoryError::Database(sqlx::Error::RowNotFound))
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait TransactionRepository: Send {
    /// Locks the row until the unit of work ends.
    async fn get_transaction_by_id(&mut self, id: Uuid) -> RepositoryResult<Transaction>;

    async fn update_transaction_by_id(&mut self, tx: &Transaction) -> RepositoryResult<()>;
}

#[async_trait]
pub trait BalanceRepository: Send {
    async fn create_balance(&mut self, balance: &Balance) -> RepositoryResult<Balance>;

    /// Most recent snapshot for the user, or [`Balance::zero`] when there is none.
    async fn get_latest_balance_by_user_id(&mut self, user_id: Uuid) -> RepositoryResult<Balance>;
}

#[async_trait]
pub trait WalletRepository: Send {
    async fn create_wallet(&mut self, wallet: &Wallet) -> RepositoryResult<Wallet>;

    /// Locks the wallet until the unit of work ends. Every balance read for the user must
    /// happen after this call.
    async fn get_wallet_by_user_id(&mut self, user_id: Uuid) -> RepositoryResult<Wallet>;

    async fn update_wallet_by_id(&mut self, wallet: &Wallet) -> RepositoryResult<()>;
}

#[async_trait]
pub trait AuditTrail: Send {
    /// Appends an entry. A failed append leaves the rest of the unit of work usable.
    async fn append_audit_log(&mut self, entry: &AuditLogEntry) -> RepositoryResult<AuditLogEntry>;
}

#[async_trait]
pub trait UserDirectory: Send {
    async fn tenant_of(&mut self, user_id: Uuid) -> RepositoryResult<Option<Uuid>>;
}

/// One transactional scope shared by every repository.
#[async_trait]
pub trait UnitOfWork:
    TransactionRepository + BalanceRepository + WalletRepository + AuditTrail + UserDirectory + Send
{
    async fn commit(self: Box<Self>) -> RepositoryResult<()>;
}

/// Committed state for inspection. Takes no locks and never waits on a unit of work.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    async fn find_transaction(&self, id: Uuid) -> RepositoryResult<Transaction>;

    async fn find_wallet(&self, user_id: Uuid) -> RepositoryResult<Wallet>;

    /// Entries for one transaction, newest first.
    async fn list_audit_logs(
        &self,
        transaction_id: Uuid,
        limit: i64,
    ) -> RepositoryResult<Vec<AuditLogEntry>>;
}

/// Hands out units of work.
#[async_trait]
pub trait LedgerStore: LedgerReader + Send + Sync {
    async fn begin(&self) -> RepositoryResult<Box<dyn UnitOfWork>>;
}
