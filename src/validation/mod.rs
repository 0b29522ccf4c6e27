//! Boundary validation for inbound webhooks. Anything rejected here never reaches the
//! reconciliation engine.

use bigdecimal::BigDecimal;
use std::fmt;

use crate::domain::{PaymentWebhook, Reference, ReferenceError, ReferenceKind, ReportedStatus};

pub const REFERENCE_MAX_LEN: usize = 128;
pub const CURRENCY_MAX_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

pub fn validate_enum(field: &'static str, value: &str, allowed: &[&str]) -> ValidationResult {
    if allowed.iter().all(|candidate| value != *candidate) {
        return Err(ValidationError::new(
            field,
            format!("must be one of: {}", allowed.join(", ")),
        ));
    }

    Ok(())
}

pub fn validate_reference(reference: &str) -> Result<Reference, ValidationError> {
    validate_required("reference", reference)?;
    validate_max_len("reference", reference, REFERENCE_MAX_LEN)?;

    reference.parse::<Reference>().map_err(|e| match e {
        ReferenceError::MissingSeparator => {
            ValidationError::new("reference", "must contain an underscore")
        }
        ReferenceError::UnknownKind(_) => ValidationError::new(
            "reference",
            format!("must start with one of: {}", ReferenceKind::ALLOWED.join(", ")),
        ),
        ReferenceError::InvalidTransactionId(_) => {
            ValidationError::new("reference", "must end with a transaction uuid")
        }
    })
}

pub fn validate_status(status: &str) -> Result<ReportedStatus, ValidationError> {
    validate_enum("status", status, ReportedStatus::ALLOWED)?;
    status
        .parse()
        .map_err(|e: crate::domain::transaction::UnknownVariant| {
            ValidationError::new("status", e.to_string())
        })
}

/// Checks the value exactly as it will be stored.
pub fn validate_currency(currency: &str) -> ValidationResult {
    validate_required("currency", currency)?;
    validate_max_len("currency", currency, CURRENCY_MAX_LEN)?;

    if !currency.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return Err(ValidationError::new("currency", "must contain only letters"));
    }

    Ok(())
}

pub fn validate_non_negative(field: &'static str, amount: &BigDecimal) -> ValidationResult {
    if amount < &BigDecimal::from(0) {
        return Err(ValidationError::new(field, "must not be negative"));
    }

    Ok(())
}

/// Checks everything the engine assumes about a payload before it is handed over.
pub fn validate_webhook(payload: &PaymentWebhook) -> Result<(Reference, ReportedStatus), ValidationError> {
    let reference = validate_reference(&payload.data.reference)?;
    let status = validate_status(&payload.data.status)?;
    validate_currency(&payload.data.currency)?;
    validate_non_negative("amount", &payload.data.amount)?;
    validate_non_negative("fees", &payload.data.fees)?;

    Ok((reference, status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TX: &str = "11111111-1111-1111-1111-111111111111";

    fn payload(reference: &str, status: &str) -> PaymentWebhook {
        serde_json::from_value(json!({
            "event": "charge.completed",
            "data": {
                "status": status,
                "reference": reference,
                "amount": 500.0,
                "currency": "NGN",
                "metadata": {},
                "fees": 1.5
            }
        }))
        .expect("valid payload shape")
    }

    #[test]
    fn validates_required_field() {
        assert!(validate_required("field", "value").is_ok());
        assert!(validate_required("field", "   ").is_err());
    }

    #[test]
    fn validates_enum_values() {
        assert!(validate_enum("status", "pending", ReportedStatus::ALLOWED).is_ok());
        assert!(validate_enum("status", "reversed", ReportedStatus::ALLOWED).is_err());
    }

    #[test]
    fn accepts_well_formed_webhook() {
        let (reference, status) =
            validate_webhook(&payload(&format!("crt_{}", TX), "success")).unwrap();
        assert_eq!(reference.kind, ReferenceKind::Credit);
        assert_eq!(status, ReportedStatus::Success);
    }

    #[test]
    fn rejects_reference_without_underscore() {
        let err = validate_webhook(&payload("crt11111111", "success")).unwrap_err();
        assert_eq!(err.field, "reference");
        assert_eq!(err.message, "must contain an underscore");
    }

    #[test]
    fn rejects_unknown_reference_kind() {
        let err = validate_webhook(&payload(&format!("xyz_{}", TX), "success")).unwrap_err();
        assert_eq!(err.field, "reference");
        assert!(err.message.contains("dbt, crt"));
    }

    #[test]
    fn rejects_unsupported_status() {
        let err = validate_webhook(&payload(&format!("dbt_{}", TX), "reversed")).unwrap_err();
        assert_eq!(err.field, "status");
    }

    #[test]
    fn validates_currency() {
        assert!(validate_currency("NGN").is_ok());
        assert!(validate_currency("").is_err());
        assert!(validate_currency("N G N").is_err());
        assert!(validate_currency(&"A".repeat(11)).is_err());
    }

    #[test]
    fn rejects_currency_with_control_or_padding_characters() {
        assert!(validate_currency("NGN\u{7}").is_err());
        assert!(validate_currency(" NGN").is_err());

        let mut bell = payload(&format!("crt_{}", TX), "success");
        bell.data.currency = "NGN\u{7}".to_string();
        assert_eq!(validate_webhook(&bell).unwrap_err().field, "currency");
    }

    #[test]
    fn rejects_negative_amounts() {
        assert!(validate_non_negative("amount", &BigDecimal::from(-1)).is_err());
        assert!(validate_non_negative("amount", &BigDecimal::from(0)).is_ok());
    }
}
