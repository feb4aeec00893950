pub mod health;
pub mod meta;
pub mod pnl;
pub mod trades;

use crate::domain::AccountId;
use crate::error::AppError;
use crate::orchestration::Orchestrator;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route(
            "/v1/trades",
            get(trades::get_trades)
                .post(trades::post_trades)
                .put(trades::put_trades),
        )
        .route("/v1/trades/by-symbol", get(trades::get_trades_by_symbol))
        .route("/v1/trades/latest", get(trades::get_latest_for_symbol))
        .route("/v1/summary", get(pnl::get_summary))
        .route("/v1/pnl/by-coin", get(pnl::get_pnl_by_coin))
        .route("/v1/pnl/daily", get(pnl::get_daily_pnl))
        .route("/v1/meta", get(meta::get_meta).put(meta::put_meta))
        .route("/v1/recalculate", post(meta::post_recalculate))
        .route("/v1/results", get(meta::get_results))
        .route("/v1/runs", get(meta::get_runs))
        .layer(cors)
        .with_state(state)
}

/// Validate an account id from a request.
pub(crate) fn parse_account(input: &str) -> Result<AccountId, AppError> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.len() > 128 {
        return Err(AppError::BadRequest("Invalid account".to_string()));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '@'))
    {
        return Err(AppError::BadRequest("Invalid account".to_string()));
    }
    Ok(AccountId::new(trimmed))
}
