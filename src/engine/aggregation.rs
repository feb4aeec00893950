//! Read-only projections over the ledger and computed trade results.
//!
//! All sums are done with `Decimal` in Rust; SQLite aggregates would go
//! through REAL and lose precision.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;

use crate::domain::{Category, Coin, Decimal, PositionKey, Symbol, TimeMs, TradeEntry};

use super::TradeResult;

/// Per (category, symbol, settlement coin) totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRow {
    pub category: Category,
    pub symbol: Symbol,
    pub coin: Coin,
    pub trade_count: i64,
    /// Sum of absolute quantities.
    pub total_qty: Decimal,
    /// Sum of `|qty| * price`.
    pub total_value: Decimal,
    /// Fees paid in the settlement coin.
    pub total_fees: Decimal,
    /// Fees paid in other currencies, never converted.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub unconverted_fees: BTreeMap<Coin, Decimal>,
    pub realized_pnl: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinPnlRow {
    pub coin: Coin,
    pub cumulative_pnl: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyPnlRow {
    pub day: NaiveDate,
    pub coin: Coin,
    pub realized_pnl: Decimal,
    pub trade_count: i64,
}

/// Group trades by (category, symbol, settlement coin) and attach realized PnL.
pub fn summarize_by_symbol<'a>(
    trades: impl IntoIterator<Item = &'a TradeEntry>,
    results: impl IntoIterator<Item = &'a TradeResult>,
) -> Vec<SummaryRow> {
    let mut rows: BTreeMap<(PositionKey, Coin), SummaryRow> = BTreeMap::new();

    for trade in trades {
        let key = trade.position_key();
        let row = rows
            .entry((key.clone(), trade.settle_coin.clone()))
            .or_insert_with(|| empty_summary(&key, &trade.settle_coin));

        row.trade_count += 1;
        row.total_qty += trade.qty.abs();
        row.total_value += trade.notional();
        if trade.fee_coin == trade.settle_coin {
            row.total_fees += trade.fee;
        } else {
            *row
                .unconverted_fees
                .entry(trade.fee_coin.clone())
                .or_default() += trade.fee;
        }
    }

    for result in results {
        if let Some(row) = rows.get_mut(&(result.position.clone(), result.settle_coin.clone())) {
            row.realized_pnl += result.realized_pnl;
        }
    }

    rows.into_values().collect()
}

fn empty_summary(key: &PositionKey, coin: &Coin) -> SummaryRow {
    SummaryRow {
        category: key.category,
        symbol: key.symbol.clone(),
        coin: coin.clone(),
        trade_count: 0,
        total_qty: Decimal::zero(),
        total_value: Decimal::zero(),
        total_fees: Decimal::zero(),
        unconverted_fees: BTreeMap::new(),
        realized_pnl: Decimal::zero(),
    }
}

/// Cumulative realized PnL per settlement coin, ordered by coin.
pub fn pnl_by_coin(cumulative: &BTreeMap<Coin, Decimal>) -> Vec<CoinPnlRow> {
    cumulative
        .iter()
        .map(|(coin, pnl)| CoinPnlRow {
            coin: coin.clone(),
            cumulative_pnl: *pnl,
        })
        .collect()
}

/// Bucket realized PnL by UTC calendar day and settlement coin.
///
/// Only results with `from <= time_ms <= to` are counted.
pub fn daily_pnl<'a>(
    results: impl IntoIterator<Item = &'a TradeResult>,
    from: TimeMs,
    to: TimeMs,
) -> Vec<DailyPnlRow> {
    let mut buckets: BTreeMap<(NaiveDate, Coin), (Decimal, i64)> = BTreeMap::new();

    for result in results {
        if result.time_ms < from || result.time_ms > to {
            continue;
        }
        let bucket = buckets
            .entry((result.time_ms.utc_day(), result.settle_coin.clone()))
            .or_insert((Decimal::zero(), 0));
        bucket.0 += result.realized_pnl;
        bucket.1 += 1;
    }

    buckets
        .into_iter()
        .map(|((day, coin), (realized_pnl, trade_count))| DailyPnlRow {
            day,
            coin,
            realized_pnl,
            trade_count,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AccountId;

    const DAY_MS: i64 = 86_400_000;

    fn d(s: &str) -> Decimal {
        Decimal::from_str_canonical(s).unwrap()
    }

    fn trade(id: &str, symbol: &str, qty: &str, price: &str, fee_coin: &str) -> TradeEntry {
        TradeEntry::new(
            id,
            AccountId::new("acct"),
            Symbol::new(symbol),
            Category::Spot,
            d(qty),
            d(price),
            d("1"),
            Coin::new(fee_coin),
            Coin::new("USDT"),
            TimeMs::new(0),
        )
    }

    fn result(id: &str, symbol: &str, coin: &str, time_ms: i64, pnl: &str) -> TradeResult {
        TradeResult {
            trade_id: id.to_string(),
            position: PositionKey::new(Category::Spot, Symbol::new(symbol)),
            settle_coin: Coin::new(coin),
            time_ms: TimeMs::new(time_ms),
            position_size: Decimal::zero(),
            avg_price: Decimal::zero(),
            gross_pnl: d(pnl),
            fee_charged: Decimal::zero(),
            realized_pnl: d(pnl),
            cumulative_pnl: Decimal::zero(),
            over_close: None,
        }
    }

    #[test]
    fn test_summary_groups_and_sums() {
        let trades = vec![
            trade("1", "BTCUSDT", "2", "100", "USDT"),
            trade("2", "BTCUSDT", "-1", "120", "BTC"),
            trade("3", "ETHUSDT", "5", "10", "USDT"),
        ];
        let results = vec![
            result("1", "BTCUSDT", "USDT", 0, "-1"),
            result("2", "BTCUSDT", "USDT", 0, "20"),
            result("3", "ETHUSDT", "USDT", 0, "-1"),
        ];

        let rows = summarize_by_symbol(&trades, &results);
        assert_eq!(rows.len(), 2);

        let btc = &rows[0];
        assert_eq!(btc.symbol.as_str(), "BTCUSDT");
        assert_eq!(btc.trade_count, 2);
        assert_eq!(btc.total_qty, d("3"));
        assert_eq!(btc.total_value, d("320"));
        assert_eq!(btc.total_fees, d("1"));
        assert_eq!(btc.unconverted_fees.get(&Coin::new("BTC")), Some(&d("1")));
        assert_eq!(btc.realized_pnl, d("19"));

        assert_eq!(rows[1].symbol.as_str(), "ETHUSDT");
        assert_eq!(rows[1].realized_pnl, d("-1"));
    }

    #[test]
    fn test_daily_pnl_buckets_by_day_and_coin() {
        let results = vec![
            result("1", "BTCUSDT", "USDT", 10, "5"),
            result("2", "BTCUSDT", "USDT", 20, "-2"),
            result("3", "BTCUSD", "BTC", 30, "0.1"),
            result("4", "BTCUSDT", "USDT", DAY_MS + 5, "7"),
        ];

        let rows = daily_pnl(&results, TimeMs::new(0), TimeMs::new(i64::MAX));
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].coin.as_str(), "BTC");
        assert_eq!(rows[0].realized_pnl, d("0.1"));
        assert_eq!(rows[1].coin.as_str(), "USDT");
        assert_eq!(rows[1].realized_pnl, d("3"));
        assert_eq!(rows[1].trade_count, 2);
        assert_eq!(rows[2].day.to_string(), "1970-01-02");
        assert_eq!(rows[2].realized_pnl, d("7"));
    }

    #[test]
    fn test_daily_pnl_respects_window() {
        let results = vec![
            result("1", "BTCUSDT", "USDT", 10, "5"),
            result("2", "BTCUSDT", "USDT", DAY_MS + 5, "7"),
        ];
        let rows = daily_pnl(&results, TimeMs::new(DAY_MS), TimeMs::new(2 * DAY_MS));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].realized_pnl, d("7"));
    }

    #[test]
    fn test_pnl_by_coin_orders_by_coin() {
        let mut cumulative = BTreeMap::new();
        cumulative.insert(Coin::new("USDT"), d("10"));
        cumulative.insert(Coin::new("BTC"), d("-0.5"));
        let rows = pnl_by_coin(&cumulative);
        assert_eq!(rows[0].coin.as_str(), "BTC");
        assert_eq!(rows[1].cumulative_pnl, d("10"));
    }
}
