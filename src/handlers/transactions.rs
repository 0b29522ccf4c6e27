use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::ports::LedgerReader;
use crate::AppState;

pub const DEFAULT_AUDIT_LIMIT: i64 = 50;
pub const MAX_AUDIT_LIMIT: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct AuditLogQuery {
    pub limit: Option<i64>,
}

impl AuditLogQuery {
    pub fn effective_limit(&self) -> Result<i64, AppError> {
        match self.limit {
            None => Ok(DEFAULT_AUDIT_LIMIT),
            Some(n) if n < 1 => Err(AppError::BadRequest("limit must be positive".to_string())),
            Some(n) => Ok(n.min(MAX_AUDIT_LIMIT)),
        }
    }
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let tx = state.store.find_transaction(id).await.map_err(|e| {
        if e.is_not_found() {
            AppError::NotFound(format!("Transaction {} not found", id))
        } else {
            e.into()
        }
    })?;

    Ok(Json(tx))
}

pub async fn list_audit_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<AuditLogQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = query.effective_limit()?;

    state.store.find_transaction(id).await.map_err(|e| {
        if e.is_not_found() {
            AppError::NotFound(format!("Transaction {} not found", id))
        } else {
            e.into()
        }
    })?;
    let logs = state.store.list_audit_logs(id, limit).await?;

    Ok(Json(logs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_defaults_and_caps() {
        assert_eq!(AuditLogQuery { limit: None }.effective_limit().unwrap(), 50);
        assert_eq!(AuditLogQuery { limit: Some(10) }.effective_limit().unwrap(), 10);
        assert_eq!(AuditLogQuery { limit: Some(5000) }.effective_limit().unwrap(), 200);
        assert!(AuditLogQuery { limit: Some(0) }.effective_limit().is_err());
    }
}
