//! Inbound payment webhook payload and reference parsing.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::transaction::TransactionType;

pub const REFERENCE_SEPARATOR: char = '_';

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaymentWebhook {
    pub event: String,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookData {
    pub status: String,
    pub reference: String,
    pub amount: BigDecimal,
    pub currency: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default = "zero")]
    pub fees: BigDecimal,
}

fn zero() -> BigDecimal {
    BigDecimal::from(0)
}

/// Which side of the wallet a webhook settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    /// `dbt`: a withdrawal leaving the wallet.
    Debit,
    /// `crt`: a deposit into the wallet.
    Credit,
}

impl ReferenceKind {
    pub const ALLOWED: &'static [&'static str] = &["dbt", "crt"];

    pub fn prefix(&self) -> &'static str {
        match self {
            ReferenceKind::Debit => "dbt",
            ReferenceKind::Credit => "crt",
        }
    }

    pub fn transaction_type(&self) -> TransactionType {
        match self {
            ReferenceKind::Debit => TransactionType::Debit,
            ReferenceKind::Credit => TransactionType::Credit,
        }
    }
}

/// A reference split into its kind prefix and the transaction it points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub kind: ReferenceKind,
    pub transaction_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    MissingSeparator,
    UnknownKind(String),
    InvalidTransactionId(String),
}

impl fmt::Display for ReferenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceError::MissingSeparator => {
                write!(f, "reference must contain '{}'", REFERENCE_SEPARATOR)
            }
            ReferenceError::UnknownKind(kind) => write!(
                f,
                "reference kind '{}' must be one of: {}",
                kind,
                ReferenceKind::ALLOWED.join(", ")
            ),
            ReferenceError::InvalidTransactionId(id) => {
                write!(f, "reference transaction id '{}' is not a valid uuid", id)
            }
        }
    }
}

impl std::error::Error for ReferenceError {}

impl FromStr for Reference {
    type Err = ReferenceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (kind, id) = raw
            .split_once(REFERENCE_SEPARATOR)
            .ok_or(ReferenceError::MissingSeparator)?;

        let kind = match kind {
            "dbt" => ReferenceKind::Debit,
            "crt" => ReferenceKind::Credit,
            other => return Err(ReferenceError::UnknownKind(other.to_string())),
        };

        let transaction_id = Uuid::parse_str(id)
            .map_err(|_| ReferenceError::InvalidTransactionId(id.to_string()))?;

        Ok(Reference {
            kind,
            transaction_id,
        })
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.kind.prefix(),
            REFERENCE_SEPARATOR,
            self.transaction_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TX: &str = "11111111-1111-1111-1111-111111111111";

    #[test]
    fn parses_credit_and_debit_references() {
        let credit: Reference = format!("crt_{}", TX).parse().unwrap();
        assert_eq!(credit.kind, ReferenceKind::Credit);
        assert_eq!(credit.transaction_id.to_string(), TX);

        let debit: Reference = format!("dbt_{}", TX).parse().unwrap();
        assert_eq!(debit.kind, ReferenceKind::Debit);
        assert_eq!(debit.kind.transaction_type(), TransactionType::Debit);
    }

    #[test]
    fn splits_on_first_separator_only() {
        let err = format!("crt_{}_extra", TX).parse::<Reference>().unwrap_err();
        assert!(matches!(err, ReferenceError::InvalidTransactionId(_)));
    }

    #[test]
    fn rejects_missing_separator_and_unknown_kind() {
        assert_eq!(
            "crt11111111".parse::<Reference>(),
            Err(ReferenceError::MissingSeparator)
        );
        assert_eq!(
            format!("xyz_{}", TX).parse::<Reference>(),
            Err(ReferenceError::UnknownKind("xyz".to_string()))
        );
    }

    #[test]
    fn display_matches_wire_format() {
        let reference: Reference = format!("dbt_{}", TX).parse().unwrap();
        assert_eq!(reference.to_string(), format!("dbt_{}", TX));
    }

    #[test]
    fn deserializes_numeric_amounts_and_defaults() {
        let payload: PaymentWebhook = serde_json::from_value(json!({
            "event": "charge.success",
            "data": {
                "status": "success",
                "reference": format!("crt_{}", TX),
                "amount": 500.0,
                "currency": "NGN"
            }
        }))
        .unwrap();

        assert_eq!(payload.data.amount, BigDecimal::from(500));
        assert_eq!(payload.data.fees, BigDecimal::from(0));
        assert!(payload.data.metadata.is_empty());
    }
}
