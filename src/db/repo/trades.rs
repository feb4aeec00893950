//! Ledger store operations: append-only trade persistence and ordered reads.

use crate::domain::{AccountId, Category, PositionKey, Symbol, TimeMs, TradeEntry};
use crate::error::LedgerError;
use crate::recalc::{DirtyReason, RecalcMeta};
use sqlx::{Row, SqliteConnection};

use super::meta::{read_meta, write_meta};
use super::{trade_from_row, AppendOutcome, LatestTradeMeta, Repository, TradePage};

const TRADE_COLUMNS: &str = "account, trade_id, symbol, category, qty, price, fee, fee_coin, settle_coin, time_ms";

/// Insert one trade; returns false when the id already exists for the account.
async fn insert_trade(
    conn: &mut SqliteConnection,
    trade: &TradeEntry,
    ingested_at: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO trades (
            account, trade_id, symbol, category, qty, price, fee,
            fee_coin, settle_coin, time_ms, ingested_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(account, trade_id) DO NOTHING
        "#,
    )
    .bind(trade.account.as_str())
    .bind(trade.trade_id.as_str())
    .bind(trade.symbol.as_str())
    .bind(trade.category.as_str())
    .bind(trade.qty.to_canonical_string())
    .bind(trade.price.to_canonical_string())
    .bind(trade.fee.to_canonical_string())
    .bind(trade.fee_coin.as_str())
    .bind(trade.settle_coin.as_str())
    .bind(trade.time_ms.as_ms())
    .bind(ingested_at)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() > 0)
}

impl Repository {
    /// Merge trades into an account's ledger in a single transaction.
    ///
    /// Duplicate ids are ignored. The meta document is updated in the same
    /// transaction: the registration horizon widens and the status turns
    /// dirty when a new trade lands behind the checkpoint.
    ///
    /// # Errors
    /// Returns an error if the transaction fails; nothing is written then.
    pub async fn append_trades(
        &self,
        account: &AccountId,
        trades: &[TradeEntry],
    ) -> Result<AppendOutcome, LedgerError> {
        let ingested_at = TimeMs::now().as_ms();
        let mut tx = self.pool.begin().await?;

        let mut inserted = Vec::new();
        for trade in trades {
            if insert_trade(&mut *tx, trade, ingested_at).await? {
                inserted.push(trade);
            }
        }

        let mut meta = read_meta(&mut *tx, account)
            .await?
            .unwrap_or_else(|| RecalcMeta::new(account.clone()));

        let out_of_order = meta.note_ingested(
            inserted
                .iter()
                .map(|t| (t.time_ms, t.trade_id.as_str())),
        );

        if !inserted.is_empty() {
            meta.updated_at = TimeMs::now();
            let expected = meta.version;
            meta.version = write_meta(&mut *tx, &meta, expected).await?;
        }

        tx.commit().await?;

        Ok(AppendOutcome {
            inserted: inserted.len(),
            duplicates: trades.len() - inserted.len(),
            out_of_order,
            meta,
        })
    }

    /// Replace an account's whole ledger (bulk re-sync).
    ///
    /// Drops existing trades and computed results, inserts the new set and
    /// marks the meta dirty so the next recalculation runs in full.
    pub async fn replace_trades(
        &self,
        account: &AccountId,
        trades: &[TradeEntry],
    ) -> Result<AppendOutcome, LedgerError> {
        let ingested_at = TimeMs::now().as_ms();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM trades WHERE account = ?")
            .bind(account.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM trade_results WHERE account = ?")
            .bind(account.as_str())
            .execute(&mut *tx)
            .await?;

        let mut inserted = 0usize;
        for trade in trades {
            if insert_trade(&mut *tx, trade, ingested_at).await? {
                inserted += 1;
            }
        }

        let mut meta = read_meta(&mut *tx, account)
            .await?
            .unwrap_or_else(|| RecalcMeta::new(account.clone()));
        meta.registration_ms = trades.iter().map(|t| t.time_ms).min();
        meta.mark_dirty(DirtyReason::LedgerReplaced);
        meta.updated_at = TimeMs::now();
        let expected = meta.version;
        meta.version = write_meta(&mut *tx, &meta, expected).await?;

        tx.commit().await?;

        Ok(AppendOutcome {
            inserted,
            duplicates: trades.len() - inserted,
            out_of_order: 0,
            meta,
        })
    }

    /// Load a symbol's trades in replay order (time_ms, trade_id).
    ///
    /// # Arguments
    /// * `category` - restrict to one category (None for all)
    /// * `since` - only trades with `time_ms >= since` (None for all)
    pub async fn load_by_symbol(
        &self,
        account: &AccountId,
        symbol: &Symbol,
        category: Option<Category>,
        since: Option<TimeMs>,
    ) -> Result<Vec<TradeEntry>, sqlx::Error> {
        let category = category.map(|c| c.as_str());
        let since = since.unwrap_or(TimeMs::new(i64::MIN)).as_ms();

        let sql = format!(
            r#"
            SELECT {TRADE_COLUMNS}
            FROM trades
            WHERE account = ? AND symbol = ?
              AND (? IS NULL OR category = ?)
              AND time_ms >= ?
            ORDER BY time_ms ASC, trade_id ASC
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(account.as_str())
            .bind(symbol.as_str())
            .bind(category)
            .bind(category)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().filter_map(trade_from_row).collect())
    }

    /// Load every trade of an account in replay order.
    pub async fn load_all_trades(
        &self,
        account: &AccountId,
    ) -> Result<Vec<TradeEntry>, sqlx::Error> {
        let sql = format!(
            "SELECT {TRADE_COLUMNS} FROM trades WHERE account = ? ORDER BY time_ms ASC, trade_id ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(account.as_str())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().filter_map(trade_from_row).collect())
    }

    /// Paginated browse, newest first.
    ///
    /// `base_asset` matches symbols starting with it (case-insensitive),
    /// e.g. "BTC" matches "BTCUSDT".
    pub async fn load_page(
        &self,
        account: &AccountId,
        base_asset: Option<&str>,
        start_index: i64,
        limit: i64,
    ) -> Result<TradePage, sqlx::Error> {
        let base_asset = base_asset
            .map(|b| b.trim().to_ascii_uppercase())
            .filter(|b| !b.is_empty());

        let total_count: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS total
            FROM trades
            WHERE account = ? AND (? IS NULL OR substr(symbol, 1, length(?)) = ?)
            "#,
        )
        .bind(account.as_str())
        .bind(base_asset.as_deref())
        .bind(base_asset.as_deref())
        .bind(base_asset.as_deref())
        .fetch_one(&self.pool)
        .await?
        .get("total");

        let sql = format!(
            r#"
            SELECT {TRADE_COLUMNS}
            FROM trades
            WHERE account = ? AND (? IS NULL OR substr(symbol, 1, length(?)) = ?)
            ORDER BY time_ms DESC, trade_id DESC
            LIMIT ? OFFSET ?
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(account.as_str())
            .bind(base_asset.as_deref())
            .bind(base_asset.as_deref())
            .bind(base_asset.as_deref())
            .bind(limit.max(0))
            .bind(start_index.max(0))
            .fetch_all(&self.pool)
            .await?;

        Ok(TradePage {
            entries: rows.iter().filter_map(trade_from_row).collect(),
            total_count,
        })
    }

    /// Max ingested timestamp for a symbol and every id present at it.
    pub async fn latest_for_symbol(
        &self,
        account: &AccountId,
        symbol: &Symbol,
        category: Option<Category>,
    ) -> Result<LatestTradeMeta, sqlx::Error> {
        let category = category.map(|c| c.as_str());

        let latest: Option<i64> = sqlx::query(
            r#"
            SELECT MAX(time_ms) AS latest
            FROM trades
            WHERE account = ? AND symbol = ? AND (? IS NULL OR category = ?)
            "#,
        )
        .bind(account.as_str())
        .bind(symbol.as_str())
        .bind(category)
        .bind(category)
        .fetch_one(&self.pool)
        .await?
        .get("latest");

        let Some(latest) = latest else {
            return Ok(LatestTradeMeta::default());
        };

        let rows = sqlx::query(
            r#"
            SELECT trade_id
            FROM trades
            WHERE account = ? AND symbol = ? AND (? IS NULL OR category = ?) AND time_ms = ?
            ORDER BY trade_id ASC
            "#,
        )
        .bind(account.as_str())
        .bind(symbol.as_str())
        .bind(category)
        .bind(category)
        .bind(latest)
        .fetch_all(&self.pool)
        .await?;

        Ok(LatestTradeMeta {
            time_ms: Some(TimeMs::new(latest)),
            ids_at_time: rows.iter().map(|r| r.get("trade_id")).collect(),
        })
    }

    /// Positions that have at least one trade at or after `since`.
    pub async fn distinct_positions(
        &self,
        account: &AccountId,
        since: Option<TimeMs>,
    ) -> Result<Vec<PositionKey>, sqlx::Error> {
        let since = since.unwrap_or(TimeMs::new(i64::MIN)).as_ms();
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT category, symbol
            FROM trades
            WHERE account = ? AND time_ms >= ?
            ORDER BY category ASC, symbol ASC
            "#,
        )
        .bind(account.as_str())
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let symbol: String = row.get("symbol");
                let category = super::parse_category(&row.get::<String, _>("category"), &symbol)?;
                Some(PositionKey::new(category, Symbol::new(symbol)))
            })
            .collect())
    }

    /// Highest row sequence in the account's ledger (0 when empty).
    pub async fn max_trade_seq(&self, account: &AccountId) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT MAX(seq) AS max_seq FROM trades WHERE account = ?")
            .bind(account.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<Option<i64>, _>("max_seq").unwrap_or(0))
    }

    /// Latest trade timestamp in the account's ledger.
    pub async fn latest_trade_time(
        &self,
        account: &AccountId,
    ) -> Result<Option<TimeMs>, sqlx::Error> {
        let row = sqlx::query("SELECT MAX(time_ms) AS latest FROM trades WHERE account = ?")
            .bind(account.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<Option<i64>, _>("latest").map(TimeMs::new))
    }

    /// True if rows ingested after `after_seq` replay before the checkpoint.
    ///
    /// A row in the checkpoint millisecond only counts when its id sorts
    /// before `max_id_at_checkpoint`.
    pub async fn has_backfilled_trades(
        &self,
        account: &AccountId,
        after_seq: i64,
        checkpoint: TimeMs,
        max_id_at_checkpoint: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS backfilled
            FROM trades
            WHERE account = ? AND seq > ?
              AND (time_ms < ? OR (time_ms = ? AND ? IS NOT NULL AND trade_id < ?))
            "#,
        )
        .bind(account.as_str())
        .bind(after_seq)
        .bind(checkpoint.as_ms())
        .bind(checkpoint.as_ms())
        .bind(max_id_at_checkpoint)
        .bind(max_id_at_checkpoint)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get::<i64, _>("backfilled") > 0)
    }
}
