//! HTTP client for an exchange execution feed.

use super::{DataSourceError, TradeSource};
use crate::domain::{AccountId, Category, Coin, Decimal, Symbol, TimeMs, TradeEntry};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Trade source reading `GET {base}/accounts/{account}/trades?fromMs=`.
///
/// The feed reports unsigned sizes with a `side`; entries are converted to
/// side-signed quantities on the way in.
#[derive(Debug, Clone)]
pub struct HttpTradeSource {
    client: Client,
    base_url: String,
    max_elapsed: Duration,
}

impl HttpTradeSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            max_elapsed: Duration::from_secs(30),
        }
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value, DataSourceError> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };

        retry(backoff, || async {
            let response = self.client.get(url).send().await.map_err(|e| {
                backoff::Error::transient(DataSourceError::NetworkError(e.to_string()))
            })?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(DataSourceError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(DataSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(DataSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| backoff::Error::permanent(DataSourceError::ParseError(e.to_string())))
        })
        .await
    }
}

#[async_trait]
impl TradeSource for HttpTradeSource {
    async fn fetch_trades(
        &self,
        account: &AccountId,
        since: TimeMs,
    ) -> Result<Vec<TradeEntry>, DataSourceError> {
        debug!(account = %account, since = since.as_ms(), "Fetching trades");

        let url = format!(
            "{}/accounts/{}/trades?fromMs={}",
            self.base_url,
            account.as_str(),
            since.as_ms()
        );
        let response = self.get_json(&url).await?;

        let items = response
            .as_array()
            .ok_or_else(|| DataSourceError::ParseError("Expected array response".to_string()))?;

        let mut trades = Vec::with_capacity(items.len());
        for item in items {
            match parse_trade(item, account) {
                Ok(trade) => trades.push(trade),
                Err(e) => warn!(account = %account, error = %e, "Skipping malformed trade"),
            }
        }

        Ok(trades)
    }
}

fn str_field<'a>(json: &'a serde_json::Value, name: &str) -> Result<&'a str, DataSourceError> {
    json.get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| DataSourceError::ParseError(format!("Missing {} field", name)))
}

fn decimal_field(json: &serde_json::Value, name: &str) -> Result<Decimal, DataSourceError> {
    let raw = str_field(json, name)?;
    Decimal::from_str_canonical(raw)
        .map_err(|e| DataSourceError::ParseError(format!("Invalid {}: {}", name, e)))
}

fn parse_trade(json: &serde_json::Value, account: &AccountId) -> Result<TradeEntry, DataSourceError> {
    let trade_id = str_field(json, "id")?;
    let symbol = str_field(json, "symbol")?;
    let category = Category::from_str(str_field(json, "category")?)
        .map_err(|e| DataSourceError::ParseError(e.to_string()))?;

    let size = decimal_field(json, "size")?;
    let qty = match str_field(json, "side")?.to_ascii_lowercase().as_str() {
        "buy" => size.abs(),
        "sell" => -size.abs(),
        other => {
            return Err(DataSourceError::ParseError(format!(
                "Invalid side: {}",
                other
            )))
        }
    };

    let price = decimal_field(json, "price")?;
    let fee = decimal_field(json, "fee")?;
    let fee_coin = str_field(json, "feeCoin")?;
    let settle_coin = str_field(json, "settleCoin")?;

    let time_ms = json
        .get("timeMs")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| DataSourceError::ParseError("Missing timeMs field".to_string()))?;

    let trade = TradeEntry::new(
        trade_id,
        account.clone(),
        Symbol::new(symbol),
        category,
        qty,
        price,
        fee,
        Coin::new(fee_coin),
        Coin::new(settle_coin),
        TimeMs::new(time_ms),
    );
    trade.validate().map_err(DataSourceError::ParseError)?;
    Ok(trade)
}
