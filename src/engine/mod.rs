//! Pure computation engine(s) for deterministic ledger logic.

use crate::domain::{Coin, Decimal, PositionKey, TimeMs};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod aggregation;
pub mod cost_basis;

pub use aggregation::{
    daily_pnl, pnl_by_coin, summarize_by_symbol, CoinPnlRow, DailyPnlRow, SummaryRow,
};
pub use cost_basis::{
    AccumulatorOutputs, ArithmeticOverflow, CostBasisAccumulator, PositionState, Transition,
};

/// Computed outcome of folding one trade (audit/report artifact).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeResult {
    pub trade_id: String,
    pub position: PositionKey,
    pub settle_coin: Coin,
    pub time_ms: TimeMs,
    pub position_size: Decimal,
    pub avg_price: Decimal,
    pub gross_pnl: Decimal,
    pub fee_charged: Decimal,
    /// `gross_pnl - fee_charged`, rounded to the configured PnL scale.
    pub realized_pnl: Decimal,
    /// Settlement-coin running total after this trade.
    pub cumulative_pnl: Decimal,
    /// Set when the trade closed more than the tracked open size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub over_close: Option<Decimal>,
}

/// A trade that closed more than the tracked position and flipped it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverClose {
    pub trade_id: String,
    pub position: PositionKey,
    pub time_ms: TimeMs,
    pub tracked_size: Decimal,
    pub trade_qty: Decimal,
    pub excess: Decimal,
}

/// A trade whose fold left the decimal range. Nothing from it was applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("arithmetic overflow folding trade {trade_id} on {position}")]
pub struct FoldOverflow {
    pub trade_id: String,
    pub position: PositionKey,
}
