//! In-process implementations of the ledger store and the idempotency store.
//!
//! Used by tests and local runs. The ledger behaves like a read-committed database with
//! row locks: a unit of work stages its writes privately and publishes them on commit,
//! while transaction and wallet lookups lock their row until the unit of work ends.
//! Units of work touching different rows run concurrently.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::{AuditLogEntry, Balance, Transaction, Wallet};
use crate::ports::{
    AuditTrail, BalanceRepository, LedgerReader, LedgerStore, RepositoryError, RepositoryResult,
    TransactionRepository, UnitOfWork, UserDirectory, WalletRepository,
};
use crate::services::idempotency::{GuardError, IdempotencyStore};

#[derive(Debug, Default)]
struct LedgerState {
    transactions: HashMap<Uuid, Transaction>,
    balances: Vec<Balance>,
    wallets: HashMap<Uuid, Wallet>,
    audit_logs: Vec<AuditLogEntry>,
    tenants: HashMap<Uuid, Uuid>,
}

/// Writes of one unit of work, invisible to others until commit.
#[derive(Debug, Default)]
struct Staged {
    transactions: HashMap<Uuid, Transaction>,
    balances: Vec<Balance>,
    wallets: HashMap<Uuid, Wallet>,
    audit_logs: Vec<AuditLogEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RowKey {
    Transaction(Uuid),
    Wallet(Uuid),
}

type RowLocks = DashMap<RowKey, Arc<Mutex<()>>>;

/// Operations that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Begin,
    GetTransaction,
    GetWallet,
    CreateBalance,
    UpdateWallet,
    UpdateTransaction,
    AppendAudit,
    Commit,
}

#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<Mutex<LedgerState>>,
    row_locks: Arc<RowLocks>,
    fail_points: Arc<DashSet<FailPoint>>,
    begins: Arc<AtomicUsize>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(&self, point: FailPoint) {
        self.fail_points.insert(point);
    }

    pub fn clear_failures(&self) {
        self.fail_points.clear();
    }

    /// Number of units of work handed out so far.
    pub fn begin_count(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub async fn insert_transaction(&self, tx: Transaction) {
        self.state.lock().await.transactions.insert(tx.id, tx);
    }

    pub async fn insert_wallet(&self, wallet: Wallet) {
        self.state.lock().await.wallets.insert(wallet.user_id, wallet);
    }

    pub async fn register_user(&self, user_id: Uuid, tenant_id: Uuid) {
        self.state.lock().await.tenants.insert(user_id, tenant_id);
    }

    pub async fn transaction(&self, id: Uuid) -> Option<Transaction> {
        self.state.lock().await.transactions.get(&id).cloned()
    }

    pub async fn wallet(&self, user_id: Uuid) -> Option<Wallet> {
        self.state.lock().await.wallets.get(&user_id).cloned()
    }

    /// Snapshots for a user in commit order.
    pub async fn balances(&self, user_id: Uuid) -> Vec<Balance> {
        self.state
            .lock()
            .await
            .balances
            .iter()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn audit_logs(&self, transaction_id: Uuid) -> Vec<AuditLogEntry> {
        self.state
            .lock()
            .await
            .audit_logs
            .iter()
            .filter(|e| e.transaction_id == Some(transaction_id))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LedgerReader for InMemoryLedgerStore {
    async fn find_transaction(&self, id: Uuid) -> RepositoryResult<Transaction> {
        self.transaction(id)
            .await
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn find_wallet(&self, user_id: Uuid) -> RepositoryResult<Wallet> {
        self.wallet(user_id)
            .await
            .ok_or_else(|| RepositoryError::NotFound(format!("wallet for user {}", user_id)))
    }

    async fn list_audit_logs(
        &self,
        transaction_id: Uuid,
        limit: i64,
    ) -> RepositoryResult<Vec<AuditLogEntry>> {
        Ok(self
            .state
            .lock()
            .await
            .audit_logs
            .iter()
            .rev()
            .filter(|e| e.transaction_id == Some(transaction_id))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> RepositoryResult<Box<dyn UnitOfWork>> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        if self.fail_points.contains(&FailPoint::Begin) {
            return Err(RepositoryError::Unavailable("begin".to_string()));
        }

        Ok(Box::new(InMemoryUnitOfWork {
            committed: self.state.clone(),
            row_locks: self.row_locks.clone(),
            held: HashMap::new(),
            staged: Staged::default(),
            fail_points: self.fail_points.clone(),
        }))
    }
}

/// Row locks are released when the unit of work is committed or dropped.
pub struct InMemoryUnitOfWork {
    committed: Arc<Mutex<LedgerState>>,
    row_locks: Arc<RowLocks>,
    held: HashMap<RowKey, OwnedMutexGuard<()>>,
    staged: Staged,
    fail_points: Arc<DashSet<FailPoint>>,
}

impl InMemoryUnitOfWork {
    fn check(&self, point: FailPoint) -> RepositoryResult<()> {
        if self.fail_points.contains(&point) {
            return Err(RepositoryError::Unavailable(format!("{:?}", point)));
        }
        Ok(())
    }

    async fn lock_row(&mut self, key: RowKey) {
        if self.held.contains_key(&key) {
            return;
        }
        let lock = self.row_locks.entry(key).or_default().clone();
        let guard = lock.lock_owned().await;
        self.held.insert(key, guard);
    }
}

#[async_trait]
impl TransactionRepository for InMemoryUnitOfWork {
    async fn get_transaction_by_id(&mut self, id: Uuid) -> RepositoryResult<Transaction> {
        self.check(FailPoint::GetTransaction)?;
        self.lock_row(RowKey::Transaction(id)).await;

        if let Some(tx) = self.staged.transactions.get(&id) {
            return Ok(tx.clone());
        }
        self.committed
            .lock()
            .await
            .transactions
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn update_transaction_by_id(&mut self, tx: &Transaction) -> RepositoryResult<()> {
        self.check(FailPoint::UpdateTransaction)?;
        let exists = self.staged.transactions.contains_key(&tx.id)
            || self.committed.lock().await.transactions.contains_key(&tx.id);
        if !exists {
            return Err(RepositoryError::NotFound(tx.id.to_string()));
        }

        let mut stored = tx.clone();
        stored.updated_at = Some(chrono::Utc::now());
        self.staged.transactions.insert(tx.id, stored);
        Ok(())
    }
}

#[async_trait]
impl BalanceRepository for InMemoryUnitOfWork {
    async fn create_balance(&mut self, balance: &Balance) -> RepositoryResult<Balance> {
        self.check(FailPoint::CreateBalance)?;
        self.staged.balances.push(balance.clone());
        Ok(balance.clone())
    }

    async fn get_latest_balance_by_user_id(&mut self, user_id: Uuid) -> RepositoryResult<Balance> {
        if let Some(own) = self.staged.balances.iter().rev().find(|b| b.user_id == user_id) {
            return Ok(own.clone());
        }
        Ok(self
            .committed
            .lock()
            .await
            .balances
            .iter()
            .rev()
            .find(|b| b.user_id == user_id)
            .cloned()
            .unwrap_or_else(|| Balance::zero(user_id)))
    }
}

#[async_trait]
impl WalletRepository for InMemoryUnitOfWork {
    async fn create_wallet(&mut self, wallet: &Wallet) -> RepositoryResult<Wallet> {
        self.staged.wallets.insert(wallet.user_id, wallet.clone());
        Ok(wallet.clone())
    }

    async fn get_wallet_by_user_id(&mut self, user_id: Uuid) -> RepositoryResult<Wallet> {
        self.check(FailPoint::GetWallet)?;
        self.lock_row(RowKey::Wallet(user_id)).await;

        if let Some(wallet) = self.staged.wallets.get(&user_id) {
            return Ok(wallet.clone());
        }
        self.committed
            .lock()
            .await
            .wallets
            .get(&user_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("wallet for user {}", user_id)))
    }

    async fn update_wallet_by_id(&mut self, wallet: &Wallet) -> RepositoryResult<()> {
        self.check(FailPoint::UpdateWallet)?;
        let staged = self.staged.wallets.values().any(|w| w.id == wallet.id);
        let committed = self
            .committed
            .lock()
            .await
            .wallets
            .values()
            .any(|w| w.id == wallet.id);
        if !staged && !committed {
            return Err(RepositoryError::NotFound(wallet.id.to_string()));
        }

        self.staged.wallets.insert(wallet.user_id, wallet.clone());
        Ok(())
    }
}

#[async_trait]
impl AuditTrail for InMemoryUnitOfWork {
    async fn append_audit_log(&mut self, entry: &AuditLogEntry) -> RepositoryResult<AuditLogEntry> {
        self.check(FailPoint::AppendAudit)?;
        self.staged.audit_logs.push(entry.clone());
        Ok(entry.clone())
    }
}

#[async_trait]
impl UserDirectory for InMemoryUnitOfWork {
    async fn tenant_of(&mut self, user_id: Uuid) -> RepositoryResult<Option<Uuid>> {
        Ok(self.committed.lock().await.tenants.get(&user_id).copied())
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn commit(self: Box<Self>) -> RepositoryResult<()> {
        self.check(FailPoint::Commit)?;
        let InMemoryUnitOfWork {
            committed, staged, held, ..
        } = *self;

        {
            let mut state = committed.lock().await;
            state.transactions.extend(staged.transactions);
            state.wallets.extend(staged.wallets);
            state.balances.extend(staged.balances);
            state.audit_logs.extend(staged.audit_logs);
        }
        drop(held);
        Ok(())
    }
}

/// Key/value store with per-key expiry, mirroring the Redis commands the guard relies on.
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    entries: DashMap<String, (String, Instant)>,
    unavailable: AtomicBool,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the store going down (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), GuardError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GuardError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, GuardError> {
        self.ensure_available()?;
        let now = Instant::now();
        let value = self
            .entries
            .get(key)
            .filter(|entry| entry.1 > now)
            .map(|entry| entry.0.clone());
        if value.is_none() {
            self.entries.remove_if(key, |_, (_, expires)| *expires <= now);
        }
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), GuardError> {
        self.ensure_available()?;
        self.entries
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, GuardError> {
        self.ensure_available()?;
        let now = Instant::now();
        let mut written = false;
        self.entries
            .entry(key.to_string())
            .and_modify(|entry| {
                if entry.1 <= now {
                    *entry = (value.to_string(), now + ttl);
                    written = true;
                }
            })
            .or_insert_with(|| {
                written = true;
                (value.to_string(), now + ttl)
            });
        Ok(written)
    }

    async fn delete(&self, key: &str) -> Result<(), GuardError> {
        self.ensure_available()?;
        self.entries.remove(key);
        Ok(())
    }
}
