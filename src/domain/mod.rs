//! Domain layer: framework-agnostic entities for the wallet ledger.

pub mod audit;
pub mod balance;
pub mod metadata;
pub mod transaction;
pub mod webhook;

pub use audit::{Actor, AuditAction, AuditLogEntry};
pub use balance::{Balance, Wallet};
pub use metadata::ProviderMetadata;
pub use transaction::{
    ReportedStatus, Transaction, TransactionFlow, TransactionStatus, TransactionType, Transition,
};
pub use webhook::{PaymentWebhook, Reference, ReferenceError, ReferenceKind, WebhookData};
