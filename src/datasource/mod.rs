//! Trade source abstraction for pulling executions from an exchange feed.

use crate::domain::{AccountId, TimeMs, TradeEntry};
use async_trait::async_trait;
use std::fmt;

pub mod http;
pub mod mock;

pub use http::HttpTradeSource;
pub use mock::MockTradeSource;

/// Source of executed trades for an account.
///
/// Implementations must handle pagination, retry/backoff, and rate limiting.
/// Returned trades may overlap earlier batches; the ledger drops duplicates.
#[async_trait]
pub trait TradeSource: Send + Sync + fmt::Debug {
    /// Fetch trades executed at or after `since`.
    ///
    /// # Arguments
    /// * `account` - Account whose executions are fetched
    /// * `since` - Start time in milliseconds (inclusive)
    async fn fetch_trades(
        &self,
        account: &AccountId,
        since: TimeMs,
    ) -> Result<Vec<TradeEntry>, DataSourceError>;
}

/// Error type for trade source operations.
#[derive(Debug, Clone)]
pub enum DataSourceError {
    /// Network error (e.g., connection timeout, DNS failure)
    NetworkError(String),
    /// HTTP error (e.g., 429 rate limit, 5xx server error)
    HttpError { status: u16, message: String },
    /// Parsing error (invalid JSON or malformed response)
    ParseError(String),
    /// Rate limit exceeded (caller should implement backoff)
    RateLimited,
    /// Other error
    Other(String),
}

impl fmt::Display for DataSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSourceError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            DataSourceError::HttpError { status, message } => {
                write!(f, "HTTP error {}: {}", status, message)
            }
            DataSourceError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            DataSourceError::RateLimited => write!(f, "Rate limited"),
            DataSourceError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for DataSourceError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datasource_error_display() {
        let err = DataSourceError::NetworkError("connection timeout".to_string());
        assert_eq!(err.to_string(), "Network error: connection timeout");

        let err = DataSourceError::HttpError {
            status: 503,
            message: "Server error".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP error 503: Server error");

        assert_eq!(DataSourceError::RateLimited.to_string(), "Rate limited");
    }
}
