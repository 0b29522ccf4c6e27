//! Reconcile payment webhook use case.
//!
//! Applies a provider notification to a transaction, the user's balance history and wallet
//! exactly once. Deliveries are at-least-once and may arrive duplicated or out of order, so:
//!
//! 1. the transaction row is resolved inside a unit of work (row-locked on Postgres);
//! 2. an atomic set-if-absent lock on `(kind, transaction id)` is taken before any write;
//!    an applied marker short-circuits the whole mutation phase;
//! 3. on success the user's wallet is locked before the latest snapshot is read;
//!    balance, wallet, audit and transaction writes commit together;
//! 4. only after commit is the lock turned into the applied marker.
//!
//! If the marker cannot be written after commit, the stored `successful` status still stops
//! a later redelivery from touching money.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{
    AuditAction, AuditLogEntry, PaymentWebhook, ProviderMetadata, Reference, ReferenceError,
    ReportedStatus, Transaction, TransactionStatus, TransactionType, Transition,
};
use crate::ports::{
    AuditTrail, BalanceRepository, LedgerStore, RepositoryError, TransactionRepository,
    UnitOfWork, UserDirectory, WalletRepository,
};
use crate::services::idempotency::{GuardError, GuardStatus, IdempotencyGuard};

pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("malformed reference: {0}")]
    MalformedReference(#[from] ReferenceError),

    #[error("unsupported status '{0}'")]
    UnsupportedStatus(String),

    #[error("transaction {0} not found")]
    TransactionNotFound(Uuid),

    #[error("wallet for user {0} not found")]
    WalletNotFound(Uuid),

    #[error("transaction {transaction_id} cannot move from {from} to {to}")]
    InvalidTransition {
        transaction_id: Uuid,
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("{0} is being applied by another delivery")]
    InFlight(String),

    #[error("repository unavailable: {0}")]
    RepositoryUnavailable(#[from] RepositoryError),

    #[error("idempotency guard unavailable: {0}")]
    GuardUnavailable(#[from] GuardError),

    #[error("transaction {transaction_id} applied but audit write failed: {source}")]
    AuditWriteFailed {
        transaction_id: Uuid,
        #[source]
        source: RepositoryError,
    },

    #[error("reconciliation did not finish within {0:?}; it may have been applied")]
    DeadlineExceeded(Duration),
}

impl ReconcileError {
    /// Whether the provider should redeliver.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReconcileError::RepositoryUnavailable(_)
                | ReconcileError::GuardUnavailable(_)
                | ReconcileError::InFlight(_)
                | ReconcileError::WalletNotFound(_)
                | ReconcileError::DeadlineExceeded(_)
        )
    }

    /// Money moved but something around it did not complete.
    pub fn is_degraded_success(&self) -> bool {
        matches!(self, ReconcileError::AuditWriteFailed { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied {
        transaction_id: Uuid,
        status: TransactionStatus,
    },
    AlreadyApplied {
        transaction_id: Uuid,
    },
}

impl ReconcileOutcome {
    pub fn transaction_id(&self) -> Uuid {
        match self {
            ReconcileOutcome::Applied { transaction_id, .. }
            | ReconcileOutcome::AlreadyApplied { transaction_id } => *transaction_id,
        }
    }
}

/// What happened inside the unit of work, before the guard is resolved.
struct Committed {
    outcome: ReconcileOutcome,
    settled: bool,
    audit_failure: Option<RepositoryError>,
}

pub struct ReconciliationEngine {
    store: Arc<dyn LedgerStore>,
    guard: IdempotencyGuard,
    deadline: Duration,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn LedgerStore>, guard: IdempotencyGuard, deadline: Duration) -> Self {
        Self {
            store,
            guard,
            deadline,
        }
    }

    pub async fn process(
        &self,
        payload: &PaymentWebhook,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        self.process_within(payload, self.deadline).await
    }

    /// Like [`process`](Self::process) with a caller-supplied deadline. On timeout the
    /// delivery must be treated as possibly applied.
    pub async fn process_within(
        &self,
        payload: &PaymentWebhook,
        deadline: Duration,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        match tokio::time::timeout(deadline, self.reconcile(payload)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    reference = %payload.data.reference,
                    deadline_ms = deadline.as_millis() as u64,
                    "Reconciliation deadline exceeded"
                );
                Err(ReconcileError::DeadlineExceeded(deadline))
            }
        }
    }

    #[tracing::instrument(
        name = "reconcile",
        skip(self, payload),
        fields(reference = %payload.data.reference, status = %payload.data.status)
    )]
    async fn reconcile(
        &self,
        payload: &PaymentWebhook,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let reference: Reference = payload.data.reference.parse()?;
        let reported: ReportedStatus = payload
            .data
            .status
            .parse()
            .map_err(|_| ReconcileError::UnsupportedStatus(payload.data.status.clone()))?;

        let mut uow = self.store.begin().await?;

        let tx = match uow.get_transaction_by_id(reference.transaction_id).await {
            Ok(tx) => tx,
            Err(e) if e.is_not_found() => {
                warn!(
                    transaction_id = %reference.transaction_id,
                    event = %payload.event,
                    "Webhook references an unknown transaction"
                );
                return Err(ReconcileError::TransactionNotFound(reference.transaction_id));
            }
            Err(e) => return Err(e.into()),
        };

        let key = self.guard.key_for(reference.kind, tx.id);
        match self.guard.acquire(&key).await? {
            GuardStatus::Acquired => {}
            GuardStatus::Applied => {
                info!(transaction_id = %tx.id, "Webhook already applied");
                return Ok(ReconcileOutcome::AlreadyApplied {
                    transaction_id: tx.id,
                });
            }
            GuardStatus::InFlight => {
                info!(transaction_id = %tx.id, "Webhook is being applied by another delivery");
                return Err(ReconcileError::InFlight(key));
            }
        }

        match self.apply(uow, tx, reference, reported, payload).await {
            Ok(committed) => {
                if committed.settled {
                    if let Err(e) = self.guard.mark_applied(&key).await {
                        error!(
                            key = %key,
                            error = %e,
                            "Failed to mark webhook applied; stored status still blocks reapplication"
                        );
                    }
                } else {
                    self.release(&key).await;
                }

                match committed.audit_failure {
                    Some(source) => Err(ReconcileError::AuditWriteFailed {
                        transaction_id: committed.outcome.transaction_id(),
                        source,
                    }),
                    None => Ok(committed.outcome),
                }
            }
            Err(e) => {
                self.release(&key).await;
                Err(e)
            }
        }
    }

    async fn apply(
        &self,
        mut uow: Box<dyn UnitOfWork>,
        mut tx: Transaction,
        reference: Reference,
        reported: ReportedStatus,
        payload: &PaymentWebhook,
    ) -> Result<Committed, ReconcileError> {
        let incoming = ProviderMetadata::from_fields(payload.data.metadata.clone());

        let next = match tx.status.transition(reported) {
            Transition::Apply(next) => next,
            Transition::Duplicate => {
                info!(transaction_id = %tx.id, status = %tx.status, "Status already recorded");
                return Ok(Committed {
                    outcome: ReconcileOutcome::AlreadyApplied {
                        transaction_id: tx.id,
                    },
                    settled: false,
                    audit_failure: None,
                });
            }
            Transition::Settled => {
                let added = tx.metadata.append_missing(&incoming);
                if added > 0 {
                    uow.update_transaction_by_id(&tx).await?;
                    uow.commit().await?;
                }
                info!(
                    transaction_id = %tx.id,
                    reported = reported.as_str(),
                    metadata_keys_added = added,
                    "Transaction already successful; amounts left untouched"
                );
                return Ok(Committed {
                    outcome: ReconcileOutcome::AlreadyApplied {
                        transaction_id: tx.id,
                    },
                    settled: true,
                    audit_failure: None,
                });
            }
            Transition::Rejected { from, to } => {
                warn!(
                    transaction_id = %tx.id,
                    from = %from,
                    to = %to,
                    "Webhook would reverse a terminal transaction"
                );
                return Err(ReconcileError::InvalidTransition {
                    transaction_id: tx.id,
                    from,
                    to,
                });
            }
        };

        let direction = reference.kind.transaction_type();
        if direction != tx.transaction_type {
            warn!(
                transaction_id = %tx.id,
                reference_kind = reference.kind.prefix(),
                transaction_type = tx.transaction_type.as_str(),
                "Reference kind disagrees with stored transaction type; reference wins"
            );
        }

        let tenant_id = uow.tenant_of(tx.user_id).await?;

        tx.apply_provider_report(
            payload.data.amount.clone(),
            payload.data.fees.clone(),
            payload.data.currency.clone(),
            incoming,
        );
        tx.status = next;

        let mut audit_failure = None;
        match reported {
            ReportedStatus::Success => {
                // The wallet lock serializes every transaction of this user, so the latest
                // snapshot cannot move until commit.
                let mut wallet = match uow.get_wallet_by_user_id(tx.user_id).await {
                    Ok(wallet) => wallet,
                    Err(e) if e.is_not_found() => {
                        error!(user_id = %tx.user_id, "User has no wallet");
                        return Err(ReconcileError::WalletNotFound(tx.user_id));
                    }
                    Err(e) => return Err(e.into()),
                };

                let previous = uow.get_latest_balance_by_user_id(tx.user_id).await?;
                let snapshot = uow
                    .create_balance(&previous.next(tx.id, direction, &tx.amount))
                    .await?;
                wallet.advance_to(&snapshot);
                uow.update_wallet_by_id(&wallet).await?;

                let message = match direction {
                    TransactionType::Credit => "received a credit to wallet",
                    TransactionType::Debit => "received a debit to wallet",
                };
                let entry = AuditLogEntry::for_transaction(
                    tx.id,
                    tx.user_id,
                    tenant_id,
                    AuditAction::Success,
                    message,
                );
                if let Err(e) = uow.append_audit_log(&entry).await {
                    error!(
                        transaction_id = %tx.id,
                        error = %e,
                        "Audit write failed after balance mutation; entry needs backfill"
                    );
                    audit_failure = Some(e);
                }

                info!(
                    transaction_id = %tx.id,
                    user_id = %tx.user_id,
                    balance_before = %snapshot.balance_before,
                    balance_after = %snapshot.balance_after,
                    direction = direction.as_str(),
                    "Balance updated"
                );
            }
            ReportedStatus::Failed => {
                let entry = AuditLogEntry::for_transaction(
                    tx.id,
                    tx.user_id,
                    tenant_id,
                    AuditAction::Failed,
                    "transaction failed",
                );
                uow.append_audit_log(&entry).await?;
            }
            ReportedStatus::Pending => {
                let entry = AuditLogEntry::for_transaction(
                    tx.id,
                    tx.user_id,
                    tenant_id,
                    AuditAction::Pending,
                    "transaction pending",
                );
                uow.append_audit_log(&entry).await?;
            }
        }

        uow.update_transaction_by_id(&tx).await?;
        uow.commit().await?;

        info!(transaction_id = %tx.id, status = %tx.status, "Webhook reconciled");

        Ok(Committed {
            outcome: ReconcileOutcome::Applied {
                transaction_id: tx.id,
                status: tx.status,
            },
            settled: tx.status == TransactionStatus::Successful,
            audit_failure,
        })
    }

    async fn release(&self, key: &str) {
        if let Err(e) = self.guard.release(key).await {
            error!(key = %key, error = %e, "Failed to release idempotency lock");
        }
    }
}
