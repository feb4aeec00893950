use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::{parse_account, AppState};
use crate::db::repo::{AppendOutcome, LatestTradeMeta, TradePage};
use crate::domain::{AccountId, Category, Coin, Decimal, Symbol, TimeMs, TradeEntry};
use crate::error::AppError;
use crate::recalc::LedgerStatus;

const DEFAULT_PAGE_LIMIT: i64 = 50;
const MAX_PAGE_LIMIT: i64 = 1000;

/// One trade as submitted by a client. Decimals are strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeInput {
    pub id: String,
    pub symbol: String,
    pub category: String,
    /// Side-signed quantity: positive buys, negative sells.
    pub qty: Decimal,
    pub price: Decimal,
    #[serde(default)]
    pub fee: Decimal,
    pub fee_coin: Option<String>,
    pub settle_coin: String,
    pub time_ms: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveTradesRequest {
    pub account: String,
    pub trades: Vec<TradeInput>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveTradesResponse {
    pub inserted: usize,
    pub duplicates: usize,
    pub out_of_order: usize,
    pub status: LedgerStatus,
}

impl From<AppendOutcome> for SaveTradesResponse {
    fn from(outcome: AppendOutcome) -> Self {
        Self {
            inserted: outcome.inserted,
            duplicates: outcome.duplicates,
            out_of_order: outcome.out_of_order,
            status: outcome.meta.status,
        }
    }
}

fn parse_category(raw: &str) -> Result<Category, AppError> {
    Category::from_str(raw).map_err(|e| AppError::BadRequest(e.to_string()))
}

fn optional_category(raw: Option<&str>) -> Result<Option<Category>, AppError> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(parse_category)
        .transpose()
}

fn to_entries(account: &AccountId, inputs: Vec<TradeInput>) -> Result<Vec<TradeEntry>, AppError> {
    inputs
        .into_iter()
        .map(|input| {
            let category = parse_category(&input.category)?;
            let settle_coin = Coin::new(input.settle_coin.trim());
            let fee_coin = input
                .fee_coin
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(Coin::new)
                .unwrap_or_else(|| settle_coin.clone());

            Ok(TradeEntry::new(
                input.id,
                account.clone(),
                Symbol::new(input.symbol.trim()),
                category,
                input.qty,
                input.price,
                input.fee,
                fee_coin,
                settle_coin,
                TimeMs::new(input.time_ms),
            ))
        })
        .collect()
}

/// `POST /v1/trades`: merge trades into the ledger.
pub async fn post_trades(
    State(state): State<AppState>,
    Json(body): Json<SaveTradesRequest>,
) -> Result<Json<SaveTradesResponse>, AppError> {
    let account = parse_account(&body.account)?;
    let entries = to_entries(&account, body.trades)?;
    let outcome = state.orchestrator.save_trades(&account, &entries).await?;
    Ok(Json(outcome.into()))
}

/// `PUT /v1/trades`: replace the account's ledger.
pub async fn put_trades(
    State(state): State<AppState>,
    Json(body): Json<SaveTradesRequest>,
) -> Result<Json<SaveTradesResponse>, AppError> {
    let account = parse_account(&body.account)?;
    let entries = to_entries(&account, body.trades)?;
    let outcome = state.orchestrator.replace_trades(&account, &entries).await?;
    Ok(Json(outcome.into()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradesPageQuery {
    pub account: String,
    pub base_asset: Option<String>,
    pub start_index: Option<i64>,
    pub limit: Option<i64>,
}

/// `GET /v1/trades`: newest-first page.
pub async fn get_trades(
    Query(params): Query<TradesPageQuery>,
    State(state): State<AppState>,
) -> Result<Json<TradePage>, AppError> {
    let account = parse_account(&params.account)?;

    let start_index = params.start_index.unwrap_or(0);
    if start_index < 0 {
        return Err(AppError::BadRequest("startIndex must be >= 0".to_string()));
    }
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_PAGE_LIMIT
        )));
    }

    let page = state
        .orchestrator
        .load_entries(&account, params.base_asset.as_deref(), start_index, limit)
        .await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BySymbolQuery {
    pub account: String,
    pub symbol: String,
    pub category: Option<String>,
    pub since_ms: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TradesResponse {
    pub trades: Vec<TradeEntry>,
}

/// `GET /v1/trades/by-symbol`: replay-ordered trades of one symbol.
pub async fn get_trades_by_symbol(
    Query(params): Query<BySymbolQuery>,
    State(state): State<AppState>,
) -> Result<Json<TradesResponse>, AppError> {
    let account = parse_account(&params.account)?;
    let symbol = parse_symbol(&params.symbol)?;
    let category = optional_category(params.category.as_deref())?;

    let trades = state
        .orchestrator
        .load_by_symbol(&account, &symbol, category, params.since_ms.map(TimeMs::new))
        .await?;
    Ok(Json(TradesResponse { trades }))
}

#[derive(Debug, Deserialize)]
pub struct LatestQuery {
    pub account: String,
    pub symbol: String,
    pub category: Option<String>,
}

/// `GET /v1/trades/latest`: latest millisecond and ids present at it.
pub async fn get_latest_for_symbol(
    Query(params): Query<LatestQuery>,
    State(state): State<AppState>,
) -> Result<Json<LatestTradeMeta>, AppError> {
    let account = parse_account(&params.account)?;
    let symbol = parse_symbol(&params.symbol)?;
    let category = optional_category(params.category.as_deref())?;

    let latest = state
        .orchestrator
        .load_latest_by_symbol_meta(&account, &symbol, category)
        .await?;
    Ok(Json(latest))
}

fn parse_symbol(raw: &str) -> Result<Symbol, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::BadRequest("symbol is required".to_string()));
    }
    Ok(Symbol::new(trimmed))
}
