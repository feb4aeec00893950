//! Trade entry: one executed fill ingested from an exchange.

use crate::domain::{AccountId, Category, Coin, Decimal, PositionKey, Side, Symbol, TimeMs};
use serde::{Deserialize, Serialize};

/// Largest accepted |qty|, price and |fee|, as a power of ten.
const MAX_VALUE_DIGITS: u32 = 18;
/// Largest accepted |qty| * price, as a power of ten. Keeps running
/// position and PnL sums far from the decimal range limit.
const MAX_NOTIONAL_DIGITS: u32 = 24;

/// An immutable record of one executed fill.
///
/// Identity is the exchange-assigned `trade_id` within an account. The
/// quantity is side-signed: positive buys, negative sells.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeEntry {
    pub trade_id: String,
    pub account: AccountId,
    pub symbol: Symbol,
    pub category: Category,
    pub qty: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub fee_coin: Coin,
    pub settle_coin: Coin,
    pub time_ms: TimeMs,
}

impl TradeEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trade_id: impl Into<String>,
        account: AccountId,
        symbol: Symbol,
        category: Category,
        qty: Decimal,
        price: Decimal,
        fee: Decimal,
        fee_coin: Coin,
        settle_coin: Coin,
        time_ms: TimeMs,
    ) -> Self {
        Self {
            trade_id: trade_id.into(),
            account,
            symbol,
            category,
            qty,
            price,
            fee,
            fee_coin,
            settle_coin,
            time_ms,
        }
    }

    pub fn position_key(&self) -> PositionKey {
        PositionKey::new(self.category, self.symbol.clone())
    }

    pub fn side(&self) -> Side {
        if self.qty.is_negative() {
            Side::Sell
        } else {
            Side::Buy
        }
    }

    /// Absolute traded value (`|qty| * price`).
    pub fn notional(&self) -> Decimal {
        self.qty.abs() * self.price
    }

    /// Fee amount that is chargeable against realized PnL.
    ///
    /// Only fees paid in the settlement currency reduce PnL; fees in any
    /// other currency are reported but never converted.
    pub fn fee_in_settle_coin(&self) -> Decimal {
        if self.fee_coin == self.settle_coin {
            self.fee
        } else {
            Decimal::zero()
        }
    }

    /// Check the entry is well-formed enough to enter the ledger.
    pub fn validate(&self) -> Result<(), String> {
        if self.trade_id.trim().is_empty() {
            return Err("trade id must not be empty".to_string());
        }
        if self.symbol.as_str().is_empty() {
            return Err(format!("trade {}: symbol must not be empty", self.trade_id));
        }
        if self.qty.is_zero() {
            return Err(format!("trade {}: quantity must be non-zero", self.trade_id));
        }
        if self.price.is_negative() {
            return Err(format!("trade {}: price must not be negative", self.trade_id));
        }
        if self.settle_coin.as_str().is_empty() {
            return Err(format!(
                "trade {}: settlement currency must not be empty",
                self.trade_id
            ));
        }

        let max_value = Decimal::pow10(MAX_VALUE_DIGITS);
        for (field, value) in [("quantity", self.qty), ("price", self.price), ("fee", self.fee)] {
            if value.abs() > max_value {
                return Err(format!(
                    "trade {}: {} exceeds 1e{}",
                    self.trade_id, field, MAX_VALUE_DIGITS
                ));
            }
        }
        let within_notional = self
            .qty
            .abs()
            .checked_mul(self.price)
            .is_some_and(|n| n <= Decimal::pow10(MAX_NOTIONAL_DIGITS));
        if !within_notional {
            return Err(format!(
                "trade {}: notional exceeds 1e{}",
                self.trade_id, MAX_NOTIONAL_DIGITS
            ));
        }
        Ok(())
    }
}
