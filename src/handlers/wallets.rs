use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::ports::LedgerReader;
use crate::AppState;

pub async fn get_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let wallet = state.store.find_wallet(user_id).await.map_err(|e| {
        if e.is_not_found() {
            AppError::NotFound(format!("Wallet for user {} not found", user_id))
        } else {
            e.into()
        }
    })?;

    Ok(Json(wallet))
}
