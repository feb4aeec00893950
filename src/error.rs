use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::domain::AccountId;
use crate::engine::FoldOverflow;

/// Hard failures of ledger operations.
///
/// Accounting anomalies (duplicates, out-of-order trades, over-closes) are
/// not errors: they are recovered by policy and surfaced on the meta document.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("recalculation already in progress for account {0}")]
    RecalculationInProgress(AccountId),
    #[error("meta document for account {account} changed concurrently (expected version {expected})")]
    VersionConflict { account: AccountId, expected: i64 },
    #[error("invalid trade: {0}")]
    InvalidTrade(String),
    #[error(transparent)]
    Overflow(#[from] FoldOverflow),
    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),
    #[error("meta document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal server error: {0}")]
    Internal(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::RecalculationInProgress(_) | LedgerError::VersionConflict { .. } => {
                AppError::Conflict(err.to_string())
            }
            LedgerError::InvalidTrade(msg) => AppError::BadRequest(msg),
            LedgerError::Persistence(_)
            | LedgerError::Serialization(_)
            | LedgerError::Overflow(_) => {
                AppError::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recalc_in_progress_maps_to_conflict() {
        let err: AppError = LedgerError::RecalculationInProgress(AccountId::new("a")).into();
        assert!(matches!(err, AppError::Conflict(_)));
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_invalid_trade_maps_to_bad_request() {
        let err: AppError = LedgerError::InvalidTrade("qty".to_string()).into();
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_fold_overflow_maps_to_internal_error() {
        use crate::domain::{Category, PositionKey, Symbol};

        let err: AppError = LedgerError::from(FoldOverflow {
            trade_id: "7".to_string(),
            position: PositionKey::new(Category::Linear, Symbol::new("BTCUSDT")),
        })
        .into();
        assert!(matches!(&err, AppError::Internal(msg) if msg.contains("trade 7")));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
