pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod ports;
pub mod services;
pub mod startup;
pub mod use_cases;
pub mod utils;
pub mod validation;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::WebhookAuthConfig;
use crate::health::HealthChecks;
use crate::middleware::request_logger::{RequestLogging, request_logger_middleware};
use crate::middleware::webhook_auth::webhook_auth_middleware;
use crate::ports::LedgerStore;
use crate::use_cases::ReconciliationEngine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReconciliationEngine>,
    pub store: Arc<dyn LedgerStore>,
    pub webhook: WebhookAuthConfig,
    pub request_logging: RequestLogging,
    pub health: HealthChecks,
}

pub fn create_app(state: AppState) -> Router {
    let webhook_routes = Router::new()
        .route("/webhook/payment", post(handlers::webhook::payment_webhook))
        .route_layer(axum::middleware::from_fn_with_state(
            state.webhook.clone(),
            webhook_auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/transactions/:id", get(handlers::transactions::get_transaction))
        .route(
            "/transactions/:id/audit-logs",
            get(handlers::transactions::list_audit_logs),
        )
        .route("/wallets/:user_id", get(handlers::wallets::get_wallet))
        .merge(webhook_routes)
        .layer(axum::middleware::from_fn_with_state(
            state.request_logging,
            request_logger_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
