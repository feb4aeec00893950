//! Stable trade ordering for deterministic replay.

use crate::domain::TradeEntry;

/// Replay ordering key for trades.
///
/// Ordering: time_ms -> trade_id. The exchange-assigned id breaks ties
/// between same-millisecond trades so replay order never depends on
/// arrival order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TradeOrderingKey {
    pub time_ms: i64,
    pub trade_id: String,
}

impl TradeOrderingKey {
    pub fn from_trade(trade: &TradeEntry) -> Self {
        TradeOrderingKey {
            time_ms: trade.time_ms.as_ms(),
            trade_id: trade.trade_id.clone(),
        }
    }

    /// Returns true if `a` replays before `b`.
    pub fn should_come_before(a: &TradeEntry, b: &TradeEntry) -> bool {
        Self::from_trade(a) < Self::from_trade(b)
    }
}

/// Sort trades into replay order.
pub fn sort_trades_deterministic(trades: &mut [TradeEntry]) {
    trades.sort_by(|a, b| {
        a.time_ms
            .cmp(&b.time_ms)
            .then_with(|| a.trade_id.cmp(&b.trade_id))
    });
}
