//! Mock trade source for testing without network calls.

use super::{DataSourceError, TradeSource};
use crate::domain::{AccountId, TimeMs, TradeEntry};
use async_trait::async_trait;

/// Mock trade source that returns predefined trades.
#[derive(Debug, Clone, Default)]
pub struct MockTradeSource {
    trades: Vec<TradeEntry>,
    failure: Option<DataSourceError>,
}

impl MockTradeSource {
    /// Create a new mock trade source with no trades.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a trade to the mock trade source.
    pub fn with_trade(mut self, trade: TradeEntry) -> Self {
        self.trades.push(trade);
        self
    }

    /// Add multiple trades to the mock trade source.
    pub fn with_trades(mut self, trades: Vec<TradeEntry>) -> Self {
        self.trades.extend(trades);
        self
    }

    /// Make every fetch fail with `error`.
    pub fn with_failure(mut self, error: DataSourceError) -> Self {
        self.failure = Some(error);
        self
    }
}

#[async_trait]
impl TradeSource for MockTradeSource {
    async fn fetch_trades(
        &self,
        account: &AccountId,
        since: TimeMs,
    ) -> Result<Vec<TradeEntry>, DataSourceError> {
        if let Some(err) = &self.failure {
            return Err(err.clone());
        }

        Ok(self
            .trades
            .iter()
            .filter(|t| &t.account == account && t.time_ms >= since)
            .cloned()
            .collect())
    }
}
