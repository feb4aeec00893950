//! Computed per-trade results (the output side of the accumulator).

use crate::domain::{AccountId, PositionKey, TimeMs};
use crate::engine::TradeResult;
use sqlx::SqliteConnection;

use super::{result_from_row, Repository};

const RESULT_COLUMNS: &str = "trade_id, category, symbol, settle_coin, time_ms, position_size, avg_price, gross_pnl, fee_charged, realized_pnl, cumulative_pnl, over_close";

/// Write results inside a publish transaction.
///
/// A result for an id that already has one replaces it.
pub(super) async fn insert_results(
    conn: &mut SqliteConnection,
    account: &AccountId,
    results: &[TradeResult],
) -> Result<(), sqlx::Error> {
    for result in results {
        sqlx::query(
            r#"
            INSERT INTO trade_results (
                account, trade_id, category, symbol, settle_coin, time_ms,
                position_size, avg_price, gross_pnl, fee_charged,
                realized_pnl, cumulative_pnl, over_close
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(account, trade_id) DO UPDATE SET
                category = excluded.category,
                symbol = excluded.symbol,
                settle_coin = excluded.settle_coin,
                time_ms = excluded.time_ms,
                position_size = excluded.position_size,
                avg_price = excluded.avg_price,
                gross_pnl = excluded.gross_pnl,
                fee_charged = excluded.fee_charged,
                realized_pnl = excluded.realized_pnl,
                cumulative_pnl = excluded.cumulative_pnl,
                over_close = excluded.over_close
            "#,
        )
        .bind(account.as_str())
        .bind(result.trade_id.as_str())
        .bind(result.position.category.as_str())
        .bind(result.position.symbol.as_str())
        .bind(result.settle_coin.as_str())
        .bind(result.time_ms.as_ms())
        .bind(result.position_size.to_canonical_string())
        .bind(result.avg_price.to_canonical_string())
        .bind(result.gross_pnl.to_canonical_string())
        .bind(result.fee_charged.to_canonical_string())
        .bind(result.realized_pnl.to_canonical_string())
        .bind(result.cumulative_pnl.to_canonical_string())
        .bind(result.over_close.map(|d| d.to_canonical_string()))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

impl Repository {
    /// Load computed results in replay order, optionally for one position.
    pub async fn load_trade_results(
        &self,
        account: &AccountId,
        position: Option<&PositionKey>,
    ) -> Result<Vec<TradeResult>, sqlx::Error> {
        let category = position.map(|p| p.category.as_str());
        let symbol = position.map(|p| p.symbol.as_str());

        let sql = format!(
            r#"
            SELECT {RESULT_COLUMNS}
            FROM trade_results
            WHERE account = ?
              AND (? IS NULL OR category = ?)
              AND (? IS NULL OR symbol = ?)
            ORDER BY time_ms ASC, trade_id ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(account.as_str())
            .bind(category)
            .bind(category)
            .bind(symbol)
            .bind(symbol)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().filter_map(result_from_row).collect())
    }

    /// Load results with `from <= time_ms < to` in replay order.
    pub async fn load_results_between(
        &self,
        account: &AccountId,
        from: Option<TimeMs>,
        to: Option<TimeMs>,
    ) -> Result<Vec<TradeResult>, sqlx::Error> {
        let sql = format!(
            r#"
            SELECT {RESULT_COLUMNS}
            FROM trade_results
            WHERE account = ?
              AND (? IS NULL OR time_ms >= ?)
              AND (? IS NULL OR time_ms < ?)
            ORDER BY time_ms ASC, trade_id ASC
            "#
        );
        let from = from.map(|t| t.as_ms());
        let to = to.map(|t| t.as_ms());
        let rows = sqlx::query(&sql)
            .bind(account.as_str())
            .bind(from)
            .bind(from)
            .bind(to)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().filter_map(result_from_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{d, setup_test_db};
    use super::*;
    use crate::domain::{Category, Coin, Symbol};

    fn result(id: &str, symbol: &str, time_ms: i64, realized: &str) -> TradeResult {
        TradeResult {
            trade_id: id.to_string(),
            position: PositionKey::new(Category::Linear, Symbol::new(symbol)),
            settle_coin: Coin::new("USDT"),
            time_ms: TimeMs::new(time_ms),
            position_size: d("1"),
            avg_price: d("100"),
            gross_pnl: d(realized),
            fee_charged: d("0"),
            realized_pnl: d(realized),
            cumulative_pnl: d(realized),
            over_close: None,
        }
    }

    async fn seed(repo: &Repository, results: &[TradeResult]) {
        let mut conn = repo.pool.acquire().await.unwrap();
        insert_results(&mut conn, &AccountId::new("acct"), results)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_load_trade_results_filters_by_position() {
        let (repo, _temp) = setup_test_db().await;
        seed(
            &repo,
            &[
                result("2", "BTCUSDT", 2000, "5"),
                result("1", "BTCUSDT", 1000, "0"),
                result("3", "ETHUSDT", 1500, "-1"),
            ],
        )
        .await;

        let acct = AccountId::new("acct");
        let all = repo.load_trade_results(&acct, None).await.unwrap();
        let ids: Vec<_> = all.iter().map(|r| r.trade_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3", "2"]);

        let key = PositionKey::new(Category::Linear, Symbol::new("BTCUSDT"));
        let btc = repo.load_trade_results(&acct, Some(&key)).await.unwrap();
        assert_eq!(btc.len(), 2);
        assert_eq!(btc[1].realized_pnl, d("5"));
    }

    #[tokio::test]
    async fn test_insert_results_replaces_existing_id() {
        let (repo, _temp) = setup_test_db().await;
        seed(&repo, &[result("1", "BTCUSDT", 1000, "1")]).await;
        let mut updated = result("1", "BTCUSDT", 1000, "7");
        updated.over_close = Some(d("0.5"));
        seed(&repo, &[updated.clone()]).await;

        let all = repo
            .load_trade_results(&AccountId::new("acct"), None)
            .await
            .unwrap();
        assert_eq!(all, vec![updated]);
    }

    #[tokio::test]
    async fn test_load_results_between_is_half_open() {
        let (repo, _temp) = setup_test_db().await;
        seed(
            &repo,
            &[
                result("1", "BTCUSDT", 1000, "1"),
                result("2", "BTCUSDT", 2000, "2"),
                result("3", "BTCUSDT", 3000, "3"),
            ],
        )
        .await;

        let window = repo
            .load_results_between(
                &AccountId::new("acct"),
                Some(TimeMs::new(1000)),
                Some(TimeMs::new(3000)),
            )
            .await
            .unwrap();
        let ids: Vec<_> = window.iter().map(|r| r.trade_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }
}
