use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::{parse_account, AppState};
use crate::domain::{PositionKey, TimeMs};
use crate::engine::TradeResult;
use crate::error::AppError;
use crate::recalc::{RecalcMeta, RecalcReport, RecalcRun};

const DEFAULT_RUNS_LIMIT: i64 = 20;

#[derive(Debug, Deserialize)]
pub struct MetaQuery {
    pub account: String,
}

/// `GET /v1/meta`: latest published meta document.
pub async fn get_meta(
    Query(params): Query<MetaQuery>,
    State(state): State<AppState>,
) -> Result<Json<RecalcMeta>, AppError> {
    let account = parse_account(&params.account)?;
    let meta = state
        .orchestrator
        .load_meta(&account)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No meta for account {}", account)))?;
    Ok(Json((*meta).clone()))
}

#[derive(Debug, Deserialize)]
pub struct PutMetaRequest {
    pub account: String,
    pub meta: RecalcMeta,
}

/// `PUT /v1/meta`: restore a meta document; it is stored dirty.
pub async fn put_meta(
    State(state): State<AppState>,
    Json(body): Json<PutMetaRequest>,
) -> Result<Json<RecalcMeta>, AppError> {
    let account = parse_account(&body.account)?;
    let meta = state.orchestrator.save_meta(&account, body.meta).await?;
    Ok(Json((*meta).clone()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalculateRequest {
    pub account: String,
    pub from_ms: Option<i64>,
}

/// `POST /v1/recalculate`: run one pass; 409 if one is already running.
pub async fn post_recalculate(
    State(state): State<AppState>,
    Json(body): Json<RecalculateRequest>,
) -> Result<Json<RecalcReport>, AppError> {
    let account = parse_account(&body.account)?;
    let report = state
        .orchestrator
        .recalculate(&account, body.from_ms.map(TimeMs::new))
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct ResultsQuery {
    pub account: String,
    /// `category:SYMBOL`
    pub position: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResultsResponse {
    pub results: Vec<TradeResult>,
}

/// `GET /v1/results`: computed per-trade results.
pub async fn get_results(
    Query(params): Query<ResultsQuery>,
    State(state): State<AppState>,
) -> Result<Json<ResultsResponse>, AppError> {
    let account = parse_account(&params.account)?;
    let position = params
        .position
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PositionKey::from_str)
        .transpose()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let results = state
        .orchestrator
        .load_trade_results(&account, position.as_ref())
        .await?;
    Ok(Json(ResultsResponse { results }))
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub account: String,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RunsResponse {
    pub runs: Vec<RecalcRun>,
}

/// `GET /v1/runs`: recent recalculation audit rows.
pub async fn get_runs(
    Query(params): Query<RunsQuery>,
    State(state): State<AppState>,
) -> Result<Json<RunsResponse>, AppError> {
    let account = parse_account(&params.account)?;
    let limit = params.limit.unwrap_or(DEFAULT_RUNS_LIMIT).clamp(1, 500);
    let runs = state.orchestrator.load_recent_runs(&account, limit).await?;
    Ok(Json(RunsResponse { runs }))
}
