use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{Coin, Decimal, PositionKey, TradeEntry};

use super::{FoldOverflow, OverClose, TradeResult};

/// Running weighted-average-cost state of one position.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionState {
    /// Net size: positive = long, negative = short, zero = flat.
    pub size: Decimal,

    /// Weighted average entry price (zero while flat).
    pub avg_price: Decimal,
}

/// Outcome of applying one signed quantity to a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Realized PnL before fees.
    pub gross_pnl: Decimal,
    /// Quantity that overshot the tracked open size and opened the other side.
    pub excess: Option<Decimal>,
}

impl PositionState {
    pub fn new() -> Self {
        Self {
            size: Decimal::zero(),
            avg_price: Decimal::zero(),
        }
    }

    pub fn is_flat(&self) -> bool {
        self.size.is_zero()
    }

    pub fn is_long(&self) -> bool {
        self.size.is_positive()
    }

    pub fn is_short(&self) -> bool {
        self.size.is_negative()
    }

    /// Apply a signed quantity `qty` executed at `price`.
    ///
    /// Same-direction trades (or any trade on a flat position) re-weight the
    /// average price. Opposite-direction trades realize PnL on the closed
    /// part against the unchanged average; any excess beyond a full close
    /// opens the opposite side at `price`.
    ///
    /// # Errors
    /// `ArithmeticOverflow` if an intermediate value leaves the decimal
    /// range; the state is left unchanged.
    pub fn apply(&mut self, qty: Decimal, price: Decimal) -> Result<Transition, ArithmeticOverflow> {
        if qty.is_zero() {
            return Ok(Transition {
                gross_pnl: Decimal::zero(),
                excess: None,
            });
        }

        let new_size = self.size.checked_add(qty).ok_or(ArithmeticOverflow)?;

        if self.is_flat() || self.size.same_sign(&qty) {
            // new_size cannot be zero here: both terms share a sign and qty != 0.
            let held = self.size.checked_mul(self.avg_price).ok_or(ArithmeticOverflow)?;
            let added = qty.checked_mul(price).ok_or(ArithmeticOverflow)?;
            self.avg_price = held
                .checked_add(added)
                .and_then(|total| total.checked_div(new_size))
                .ok_or(ArithmeticOverflow)?;
            self.size = new_size;
            return Ok(Transition {
                gross_pnl: Decimal::zero(),
                excess: None,
            });
        }

        let closed_qty = qty.abs().min(self.size.abs());
        let per_unit = if self.is_long() {
            price.checked_sub(self.avg_price)
        } else {
            self.avg_price.checked_sub(price)
        };
        let gross_pnl = per_unit
            .and_then(|p| p.checked_mul(closed_qty))
            .ok_or(ArithmeticOverflow)?;

        let mut excess = None;
        if new_size.is_zero() {
            self.avg_price = Decimal::zero();
        } else if !new_size.same_sign(&self.size) {
            self.avg_price = price;
            excess = Some(new_size.abs());
        }
        self.size = new_size;

        Ok(Transition { gross_pnl, excess })
    }
}

/// An intermediate value left the representable decimal range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("decimal arithmetic overflow")]
pub struct ArithmeticOverflow;

/// Final state of an accumulator run.
#[derive(Debug, Clone, Default)]
pub struct AccumulatorOutputs {
    pub positions: BTreeMap<PositionKey, PositionState>,
    pub cumulative_pnl: BTreeMap<Coin, Decimal>,
    pub results: Vec<TradeResult>,
    pub over_closes: Vec<OverClose>,
}

/// Pure weighted-average-cost fold over an account's trades.
///
/// Trades must be fed in (time_ms, trade_id) order. Positions are tracked
/// per (category, symbol); cumulative realized PnL per settlement coin.
pub struct CostBasisAccumulator {
    positions: BTreeMap<PositionKey, PositionState>,
    cumulative_pnl: BTreeMap<Coin, Decimal>,
    pnl_scale: u32,

    // Outputs accumulated during processing.
    results: Vec<TradeResult>,
    over_closes: Vec<OverClose>,
}

impl CostBasisAccumulator {
    /// Start from the zero state. Realized PnL is rounded to `pnl_scale` places.
    pub fn new(pnl_scale: u32) -> Self {
        Self::resume(BTreeMap::new(), BTreeMap::new(), pnl_scale)
    }

    /// Resume from a checkpointed state.
    pub fn resume(
        positions: BTreeMap<PositionKey, PositionState>,
        cumulative_pnl: BTreeMap<Coin, Decimal>,
        pnl_scale: u32,
    ) -> Self {
        Self {
            positions,
            cumulative_pnl,
            pnl_scale,
            results: Vec::new(),
            over_closes: Vec::new(),
        }
    }

    /// Fold one trade, returning its computed result.
    ///
    /// # Errors
    /// `FoldOverflow` if the trade cannot be folded within the decimal
    /// range. The accumulator is left as it was before the call.
    pub fn process_trade(&mut self, trade: &TradeEntry) -> Result<&TradeResult, FoldOverflow> {
        let key = trade.position_key();
        let overflow = || FoldOverflow {
            trade_id: trade.trade_id.clone(),
            position: key.clone(),
        };

        let mut state = self.positions.get(&key).cloned().unwrap_or_default();
        let tracked_size = state.size;
        let transition = state
            .apply(trade.qty, trade.price)
            .map_err(|_| overflow())?;

        let fee_charged = trade.fee_in_settle_coin();
        let realized_pnl = transition
            .gross_pnl
            .checked_sub(fee_charged)
            .ok_or_else(overflow)?
            .round_dp(self.pnl_scale);
        let cumulative_pnl = self
            .cumulative_pnl(&trade.settle_coin)
            .checked_add(realized_pnl)
            .ok_or_else(overflow)?;

        // Nothing below can fail; commit the new state.
        let position_size = state.size;
        let avg_price = state.avg_price;
        self.positions.insert(key.clone(), state);
        self.cumulative_pnl
            .insert(trade.settle_coin.clone(), cumulative_pnl);

        if let Some(excess) = transition.excess {
            self.over_closes.push(OverClose {
                trade_id: trade.trade_id.clone(),
                position: key.clone(),
                time_ms: trade.time_ms,
                tracked_size,
                trade_qty: trade.qty,
                excess,
            });
        }

        let index = self.results.len();
        self.results.push(TradeResult {
            trade_id: trade.trade_id.clone(),
            position: key,
            settle_coin: trade.settle_coin.clone(),
            time_ms: trade.time_ms,
            position_size,
            avg_price,
            gross_pnl: transition.gross_pnl,
            fee_charged,
            realized_pnl,
            cumulative_pnl,
            over_close: transition.excess,
        });

        Ok(&self.results[index])
    }

    pub fn position(&self, key: &PositionKey) -> Option<&PositionState> {
        self.positions.get(key)
    }

    pub fn cumulative_pnl(&self, coin: &Coin) -> Decimal {
        self.cumulative_pnl.get(coin).copied().unwrap_or_default()
    }

    pub fn into_outputs(self) -> AccumulatorOutputs {
        AccumulatorOutputs {
            positions: self.positions,
            cumulative_pnl: self.cumulative_pnl,
            results: self.results,
            over_closes: self.over_closes,
        }
    }
}
