pub mod transactions;
pub mod wallets;
pub mod webhook;

use crate::health::check_health;
use crate::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let response = check_health(&state.health).await;

    let status_code = if response.is_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status_code, Json(response))
}
