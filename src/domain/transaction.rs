//! Transaction domain entity.
//! Framework-agnostic representation of a payment intent and its status machine.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::metadata::ProviderMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Debit,
    Credit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Debit => "debit",
            TransactionType::Credit => "credit",
        }
    }
}

impl FromStr for TransactionType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit" => Ok(TransactionType::Debit),
            "credit" => Ok(TransactionType::Credit),
            other => Err(UnknownVariant::new("transaction_type", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionFlow {
    Revenue,
    Withdrawal,
}

impl TransactionFlow {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionFlow::Revenue => "revenue",
            TransactionFlow::Withdrawal => "withdrawal",
        }
    }
}

impl FromStr for TransactionFlow {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "revenue" => Ok(TransactionFlow::Revenue),
            "withdrawal" => Ok(TransactionFlow::Withdrawal),
            other => Err(UnknownVariant::new("transaction_flow", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Successful,
    Failed,
    Canceled,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Successful => "successful",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Canceled => "canceled",
            TransactionStatus::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Decides what a provider report means for a transaction currently in `self`.
    pub fn transition(self, reported: ReportedStatus) -> Transition {
        let target = reported.target();
        match self {
            TransactionStatus::Pending => Transition::Apply(target),
            TransactionStatus::Successful => Transition::Settled,
            current if current == target => Transition::Duplicate,
            current => Transition::Rejected {
                from: current,
                to: target,
            },
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "successful" => Ok(TransactionStatus::Successful),
            "failed" => Ok(TransactionStatus::Failed),
            "canceled" => Ok(TransactionStatus::Canceled),
            "refunded" => Ok(TransactionStatus::Refunded),
            other => Err(UnknownVariant::new("status", other)),
        }
    }
}

/// Status values a provider may report in a webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportedStatus {
    Success,
    Failed,
    Pending,
}

impl ReportedStatus {
    pub const ALLOWED: &'static [&'static str] = &["success", "failed", "pending"];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportedStatus::Success => "success",
            ReportedStatus::Failed => "failed",
            ReportedStatus::Pending => "pending",
        }
    }

    pub fn target(&self) -> TransactionStatus {
        match self {
            ReportedStatus::Success => TransactionStatus::Successful,
            ReportedStatus::Failed => TransactionStatus::Failed,
            ReportedStatus::Pending => TransactionStatus::Pending,
        }
    }
}

impl FromStr for ReportedStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(ReportedStatus::Success),
            "failed" => Ok(ReportedStatus::Failed),
            "pending" => Ok(ReportedStatus::Pending),
            other => Err(UnknownVariant::new("status", other)),
        }
    }
}

/// Outcome of applying a reported status to the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Move to the given status and run the matching branch.
    Apply(TransactionStatus),
    /// The transaction already sits in the reported terminal status.
    Duplicate,
    /// Already successful, whatever was reported. Only new metadata keys may be recorded.
    Settled,
    /// Terminal state that the report would reverse.
    Rejected {
        from: TransactionStatus,
        to: TransactionStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub field: &'static str,
    pub value: String,
}

impl UnknownVariant {
    fn new(field: &'static str, value: &str) -> Self {
        Self {
            field,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} value '{}'", self.field, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// Domain entity representing a payment intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount: BigDecimal,
    pub charges: BigDecimal,
    pub currency: String,
    pub transaction_type: TransactionType,
    pub transaction_flow: Option<TransactionFlow>,
    pub status: TransactionStatus,
    pub metadata: ProviderMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn new(
        user_id: Uuid,
        amount: BigDecimal,
        currency: String,
        transaction_type: TransactionType,
        transaction_flow: Option<TransactionFlow>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            amount,
            charges: BigDecimal::from(0),
            currency,
            transaction_type,
            transaction_flow,
            status: TransactionStatus::Pending,
            metadata: ProviderMetadata::default(),
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Replaces the provider-authoritative fields with the realized values from a webhook.
    pub fn apply_provider_report(
        &mut self,
        amount: BigDecimal,
        fees: BigDecimal,
        currency: String,
        metadata: ProviderMetadata,
    ) {
        self.amount = amount;
        self.charges = fees;
        self.currency = currency;
        self.metadata = metadata;
    }
}
