use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::PaymentWebhook;
use crate::error::AppError;
use crate::use_cases::{ReconcileError, ReconcileOutcome};
use crate::validation::validate_webhook;
use crate::AppState;

/// Body returned to the gateway. Anything with a 2xx status tells it to stop redelivering.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_status: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl WebhookAck {
    fn from_outcome(outcome: &ReconcileOutcome) -> Self {
        match outcome {
            ReconcileOutcome::Applied {
                transaction_id,
                status,
            } => Self {
                status: "applied",
                transaction_id: Some(*transaction_id),
                transaction_status: Some(status.to_string()),
                degraded: false,
                reason: None,
            },
            ReconcileOutcome::AlreadyApplied { transaction_id } => Self {
                status: "already_applied",
                transaction_id: Some(*transaction_id),
                transaction_status: None,
                degraded: false,
                reason: None,
            },
        }
    }

    fn acknowledged(reason: String) -> Self {
        Self {
            status: "acknowledged",
            transaction_id: None,
            transaction_status: None,
            degraded: false,
            reason: Some(reason),
        }
    }
}

/// Receives payment provider webhooks. The signature has already been checked by
/// `webhook_auth_middleware` when this runs.
pub async fn payment_webhook(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let payload: PaymentWebhook = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid webhook payload: {}", e)))?;

    let (reference, status) = validate_webhook(&payload)?;
    tracing::info!(
        event = %payload.event,
        reference = %reference,
        status = status.as_str(),
        "Webhook accepted"
    );

    let ack = match state.engine.process(&payload).await {
        Ok(outcome) => WebhookAck::from_outcome(&outcome),
        Err(e) => acknowledge_or_retry(e)?,
    };

    Ok((StatusCode::OK, Json(ack)))
}

/// Splits engine failures into ones the gateway should redeliver and ones it should not.
fn acknowledge_or_retry(e: ReconcileError) -> Result<WebhookAck, AppError> {
    if let ReconcileError::AuditWriteFailed { transaction_id, .. } = &e {
        tracing::error!(error = %e, "Webhook applied in degraded mode");
        return Ok(WebhookAck {
            status: "applied",
            transaction_id: Some(*transaction_id),
            transaction_status: None,
            degraded: true,
            reason: Some(e.to_string()),
        });
    }

    match e {
        ReconcileError::InFlight(_) => Err(AppError::Conflict(e.to_string())),
        e if e.is_retryable() => {
            tracing::error!(error = %e, "Webhook processing failed; asking for redelivery");
            Err(AppError::ServiceUnavailable(e.to_string()))
        }
        e => {
            tracing::warn!(error = %e, "Webhook acknowledged without applying");
            Ok(WebhookAck::acknowledged(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ReferenceError;
    use crate::ports::RepositoryError;

    #[test]
    fn test_not_found_is_acknowledged() {
        let ack = acknowledge_or_retry(ReconcileError::TransactionNotFound(Uuid::nil())).unwrap();
        assert_eq!(ack.status, "acknowledged");
        assert!(ack.reason.unwrap().contains("not found"));
    }

    #[test]
    fn test_malformed_reference_is_acknowledged() {
        let ack =
            acknowledge_or_retry(ReconcileError::MalformedReference(ReferenceError::MissingSeparator))
                .unwrap();
        assert_eq!(ack.status, "acknowledged");
    }

    #[test]
    fn test_in_flight_is_conflict() {
        let err = acknowledge_or_retry(ReconcileError::InFlight("wbk_crt_x".into())).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn test_repository_outage_is_retried() {
        let err = acknowledge_or_retry(ReconcileError::RepositoryUnavailable(
            RepositoryError::Unavailable("pool".into()),
        ))
        .unwrap_err();
        assert!(matches!(err, AppError::ServiceUnavailable(_)));
    }

    #[test]
    fn test_audit_failure_is_degraded_ack() {
        let ack = acknowledge_or_retry(ReconcileError::AuditWriteFailed {
            transaction_id: Uuid::nil(),
            source: RepositoryError::Unavailable("audit".into()),
        })
        .unwrap();
        assert_eq!(ack.status, "applied");
        assert!(ack.degraded);

        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json["degraded"], true);
    }

    #[test]
    fn test_plain_ack_omits_degraded_flag() {
        let ack = WebhookAck::from_outcome(&ReconcileOutcome::AlreadyApplied {
            transaction_id: Uuid::nil(),
        });
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json["status"], "already_applied");
        assert!(json.get("degraded").is_none());
    }
}
