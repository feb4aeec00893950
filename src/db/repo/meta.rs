//! Versioned meta document, atomic recalculation publish, and run audit.

use crate::domain::{AccountId, TimeMs};
use crate::engine::TradeResult;
use crate::error::LedgerError;
use crate::recalc::{RecalcMeta, RecalcMode, RecalcRun};
use sqlx::{Row, SqliteConnection};
use std::str::FromStr;
use tracing::{debug, warn};
use uuid::Uuid;

use super::results::insert_results;
use super::Repository;

/// Read the meta document inside an open connection or transaction.
pub(super) async fn read_meta(
    conn: &mut SqliteConnection,
    account: &AccountId,
) -> Result<Option<RecalcMeta>, LedgerError> {
    let row = sqlx::query("SELECT version, document FROM recalc_meta WHERE account = ?")
        .bind(account.as_str())
        .fetch_optional(&mut *conn)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let mut meta: RecalcMeta = serde_json::from_str(&row.get::<String, _>("document"))?;
    // The column is authoritative for the version.
    meta.version = row.get("version");
    Ok(Some(meta))
}

/// Write the meta document if its stored version still equals `expected`.
///
/// `expected == 0` means "no document yet". Returns the new version.
///
/// # Errors
/// `LedgerError::VersionConflict` when another writer got there first.
pub(super) async fn write_meta(
    conn: &mut SqliteConnection,
    meta: &RecalcMeta,
    expected: i64,
) -> Result<i64, LedgerError> {
    let next = expected + 1;
    let mut document = meta.clone();
    document.version = next;
    let json = serde_json::to_string(&document)?;

    let result = sqlx::query(
        r#"
        INSERT INTO recalc_meta (account, version, document, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(account) DO UPDATE SET
            version = excluded.version,
            document = excluded.document,
            updated_at = excluded.updated_at
        WHERE recalc_meta.version = ?
        "#,
    )
    .bind(meta.account.as_str())
    .bind(next)
    .bind(json)
    .bind(document.updated_at.as_ms())
    .bind(expected)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(LedgerError::VersionConflict {
            account: meta.account.clone(),
            expected,
        });
    }

    Ok(next)
}

impl Repository {
    /// Load the latest meta document for an account.
    pub async fn load_meta(&self, account: &AccountId) -> Result<Option<RecalcMeta>, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        read_meta(&mut conn, account).await
    }

    /// Store a meta document with an optimistic version check.
    ///
    /// Returns the new version.
    pub async fn save_meta(&self, meta: &RecalcMeta, expected: i64) -> Result<i64, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        write_meta(&mut conn, meta, expected).await
    }

    /// Publish a recalculation pass in one transaction.
    ///
    /// Full passes drop every stored result first. The meta document is
    /// written only if its version is still `meta.version`; otherwise the
    /// whole transaction rolls back and nothing becomes visible.
    pub async fn publish_recalc(
        &self,
        meta: &RecalcMeta,
        results: &[TradeResult],
        run: &RecalcRun,
    ) -> Result<i64, LedgerError> {
        let mut tx = self.pool.begin().await?;

        if run.mode == RecalcMode::Full {
            let cleared = sqlx::query("DELETE FROM trade_results WHERE account = ?")
                .bind(meta.account.as_str())
                .execute(&mut *tx)
                .await?;
            debug!(
                account = %meta.account,
                cleared = cleared.rows_affected(),
                "Cleared results for full recalculation"
            );
        }

        insert_results(&mut *tx, &meta.account, results).await?;
        let version = write_meta(&mut *tx, meta, meta.version).await?;

        sqlx::query(
            r#"
            INSERT INTO recalc_runs (
                run_id, account, mode, trades_processed, over_closes,
                checkpoint_ms, started_at, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(run.account.as_str())
        .bind(run.mode.to_string())
        .bind(run.trades_processed as i64)
        .bind(run.over_closes as i64)
        .bind(run.checkpoint_ms.map(|t| t.as_ms()))
        .bind(run.started_at.as_ms())
        .bind(run.finished_at.as_ms())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(version)
    }

    /// Most recent recalculation runs for an account, newest first.
    pub async fn load_recent_runs(
        &self,
        account: &AccountId,
        limit: i64,
    ) -> Result<Vec<RecalcRun>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, account, mode, trades_processed, over_closes,
                   checkpoint_ms, started_at, finished_at
            FROM recalc_runs
            WHERE account = ?
            ORDER BY finished_at DESC, started_at DESC
            LIMIT ?
            "#,
        )
        .bind(account.as_str())
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let raw_id: String = row.get("run_id");
                let raw_mode: String = row.get("mode");
                let (run_id, mode) = match (Uuid::parse_str(&raw_id), RecalcMode::from_str(&raw_mode)) {
                    (Ok(id), Ok(mode)) => (id, mode),
                    _ => {
                        warn!(run_id = %raw_id, mode = %raw_mode, "Skipping malformed recalc run row");
                        return None;
                    }
                };
                Some(RecalcRun {
                    run_id,
                    account: AccountId::new(row.get::<String, _>("account")),
                    mode,
                    trades_processed: row.get::<i64, _>("trades_processed").max(0) as usize,
                    over_closes: row.get::<i64, _>("over_closes").max(0) as usize,
                    checkpoint_ms: row.get::<Option<i64>, _>("checkpoint_ms").map(TimeMs::new),
                    started_at: TimeMs::new(row.get("started_at")),
                    finished_at: TimeMs::new(row.get("finished_at")),
                })
            })
            .collect())
    }
}
