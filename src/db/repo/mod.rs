//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by domain:
//! - `trades.rs` - Ledger store: append, replace, ordered and paged reads
//! - `results.rs` - Computed trade results used by the aggregation views
//! - `meta.rs` - Versioned meta document, atomic publish, recalculation runs

mod meta;
mod results;
mod trades;

use crate::domain::{AccountId, Category, Coin, Decimal, PositionKey, Symbol, TimeMs, TradeEntry};
use crate::engine::TradeResult;
use crate::recalc::RecalcMeta;
use serde::Serialize;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::warn;

/// One page of ledger entries, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TradePage {
    pub entries: Vec<TradeEntry>,
    pub total_count: i64,
}

/// Latest ingested millisecond for a symbol and the ids present at it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestTradeMeta {
    pub time_ms: Option<TimeMs>,
    pub ids_at_time: Vec<String>,
}

/// Result of merging a batch into the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendOutcome {
    pub inserted: usize,
    pub duplicates: usize,
    pub out_of_order: usize,
    /// Meta document as written alongside the batch.
    pub meta: RecalcMeta,
}

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    /// Round-trip a trivial query (readiness check).
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn parse_decimal(raw: &str, field: &'static str, trade_id: &str) -> Decimal {
    Decimal::from_str(raw).unwrap_or_else(|e| {
        warn!(trade_id, field, value = %raw, error = %e, "Failed to parse decimal column, using default");
        Decimal::default()
    })
}

fn parse_category(raw: &str, trade_id: &str) -> Option<Category> {
    match Category::from_str(raw) {
        Ok(category) => Some(category),
        Err(e) => {
            warn!(trade_id, category = %raw, error = %e, "Skipping row with unknown category");
            None
        }
    }
}

/// Decode a `trades` row; rows with an unknown category are skipped.
fn trade_from_row(row: &SqliteRow) -> Option<TradeEntry> {
    let trade_id: String = row.get("trade_id");
    let category = parse_category(&row.get::<String, _>("category"), &trade_id)?;

    let qty = parse_decimal(&row.get::<String, _>("qty"), "qty", &trade_id);
    let price = parse_decimal(&row.get::<String, _>("price"), "price", &trade_id);
    let fee = parse_decimal(&row.get::<String, _>("fee"), "fee", &trade_id);

    Some(TradeEntry {
        account: AccountId::new(row.get::<String, _>("account")),
        symbol: Symbol::new(row.get::<String, _>("symbol")),
        category,
        qty,
        price,
        fee,
        fee_coin: Coin::new(row.get::<String, _>("fee_coin")),
        settle_coin: Coin::new(row.get::<String, _>("settle_coin")),
        time_ms: TimeMs::new(row.get("time_ms")),
        trade_id,
    })
}

/// Decode a `trade_results` row; rows with an unknown category are skipped.
fn result_from_row(row: &SqliteRow) -> Option<TradeResult> {
    let trade_id: String = row.get("trade_id");
    let category = parse_category(&row.get::<String, _>("category"), &trade_id)?;
    let over_close: Option<String> = row.get("over_close");

    Some(TradeResult {
        position: PositionKey::new(category, Symbol::new(row.get::<String, _>("symbol"))),
        settle_coin: Coin::new(row.get::<String, _>("settle_coin")),
        time_ms: TimeMs::new(row.get("time_ms")),
        position_size: parse_decimal(
            &row.get::<String, _>("position_size"),
            "position_size",
            &trade_id,
        ),
        avg_price: parse_decimal(&row.get::<String, _>("avg_price"), "avg_price", &trade_id),
        gross_pnl: parse_decimal(&row.get::<String, _>("gross_pnl"), "gross_pnl", &trade_id),
        fee_charged: parse_decimal(
            &row.get::<String, _>("fee_charged"),
            "fee_charged",
            &trade_id,
        ),
        realized_pnl: parse_decimal(
            &row.get::<String, _>("realized_pnl"),
            "realized_pnl",
            &trade_id,
        ),
        cumulative_pnl: parse_decimal(
            &row.get::<String, _>("cumulative_pnl"),
            "cumulative_pnl",
            &trade_id,
        ),
        over_close: over_close.map(|raw| parse_decimal(&raw, "over_close", &trade_id)),
        trade_id,
    })
}
