use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::WebhookAuthConfig;
use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

const MAX_WEBHOOK_BODY: usize = 64 * 1024;

/// Hex-encoded HMAC-SHA256 of `body` under `secret`, as the gateway sends it.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, AppError> {
    let mut mac = keyed(secret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn verify(secret: &str, body: &[u8], signature: &str) -> Result<(), AppError> {
    let expected = hex::decode(signature.trim())
        .map_err(|_| AppError::Unauthorized("signature is not valid hex".to_string()))?;

    let mut mac = keyed(secret)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| AppError::Unauthorized("signature mismatch".to_string()))
}

fn keyed(secret: &str) -> Result<HmacSha256, AppError> {
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| AppError::Internal(e.to_string()))
}

/// Rejects webhook deliveries whose body is not signed with the shared secret.
pub async fn webhook_auth_middleware(
    State(auth): State<WebhookAuthConfig>,
    req: Request,
    next: Next,
) -> Response {
    let signature = match req
        .headers()
        .get(auth.signature_header.as_str())
        .and_then(|h| h.to_str().ok())
    {
        Some(sig) => sig.to_string(),
        None => {
            tracing::warn!(header = %auth.signature_header, "Webhook signature header missing");
            return AppError::Unauthorized("missing signature".to_string()).into_response();
        }
    };

    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_WEBHOOK_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return AppError::BadRequest("webhook body too large".to_string()).into_response();
        }
    };

    if let Err(e) = verify(&auth.secret, &bytes, &signature) {
        tracing::warn!(error = %e, "Rejected webhook with invalid signature");
        return e.into_response();
    }

    next.run(Request::from_parts(parts, Body::from(bytes))).await
}
