use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{parse_account, AppState};
use crate::domain::TimeMs;
use crate::engine::{CoinPnlRow, DailyPnlRow, SummaryRow};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
pub struct AccountQuery {
    pub account: String,
}

#[derive(Debug, Serialize)]
pub struct RowsResponse<T> {
    pub rows: Vec<T>,
}

/// `GET /v1/summary`: per (category, symbol, coin) totals.
pub async fn get_summary(
    Query(params): Query<AccountQuery>,
    State(state): State<AppState>,
) -> Result<Json<RowsResponse<SummaryRow>>, AppError> {
    let account = parse_account(&params.account)?;
    let rows = state.orchestrator.load_summary_by_symbol(&account).await?;
    Ok(Json(RowsResponse { rows }))
}

/// `GET /v1/pnl/by-coin`: cumulative realized PnL from the meta.
pub async fn get_pnl_by_coin(
    Query(params): Query<AccountQuery>,
    State(state): State<AppState>,
) -> Result<Json<RowsResponse<CoinPnlRow>>, AppError> {
    let account = parse_account(&params.account)?;
    let rows = state.orchestrator.load_pnl_by_settle_coin(&account).await?;
    Ok(Json(RowsResponse { rows }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPnlQuery {
    pub account: String,
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
}

/// `GET /v1/pnl/daily`: realized PnL per UTC day and coin.
pub async fn get_daily_pnl(
    Query(params): Query<DailyPnlQuery>,
    State(state): State<AppState>,
) -> Result<Json<RowsResponse<DailyPnlRow>>, AppError> {
    let account = parse_account(&params.account)?;

    let from_ms = params.from_ms.map(TimeMs::new);
    let to_ms = params.to_ms.map(TimeMs::new);
    if let (Some(from), Some(to)) = (from_ms, to_ms) {
        if from > to {
            return Err(AppError::BadRequest("fromMs must be <= toMs".to_string()));
        }
    }

    let rows = state
        .orchestrator
        .load_daily_pnl(&account, from_ms, to_ms)
        .await?;
    Ok(Json(RowsResponse { rows }))
}
