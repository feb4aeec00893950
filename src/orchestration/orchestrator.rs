use crate::db::repo::{AppendOutcome, LatestTradeMeta, TradePage};
use crate::db::Repository;
use crate::domain::{AccountId, Category, PositionKey, Symbol, TimeMs, TradeEntry};
use crate::engine::{
    daily_pnl, pnl_by_coin, summarize_by_symbol, CoinPnlRow, DailyPnlRow, SummaryRow,
    TradeResult,
};
use crate::error::LedgerError;
use crate::orchestration::locks::{AccountLocks, MetaCache};
use crate::recalc::{DirtyReason, RecalcMeta, RecalcReport, RecalcRun, RecalcSettings, Recalculator};
use std::sync::Arc;
use tracing::{info, warn};

/// Account-scoped facade over the ledger store and the recalculator.
///
/// Writes for one account (append, replace, meta restore, recalculation)
/// are serialized; reads go straight to the store or the meta cache.
#[derive(Clone)]
pub struct Orchestrator {
    repo: Arc<Repository>,
    locks: Arc<AccountLocks>,
    cache: Arc<MetaCache>,
    settings: RecalcSettings,
}

impl Orchestrator {
    pub fn new(repo: Arc<Repository>, settings: RecalcSettings) -> Self {
        Self {
            repo,
            locks: Arc::new(AccountLocks::new()),
            cache: Arc::new(MetaCache::new()),
            settings,
        }
    }

    pub fn repo(&self) -> &Arc<Repository> {
        &self.repo
    }

    fn validate(account: &AccountId, entries: &[TradeEntry]) -> Result<(), LedgerError> {
        for entry in entries {
            entry.validate().map_err(LedgerError::InvalidTrade)?;
            if &entry.account != account {
                return Err(LedgerError::InvalidTrade(format!(
                    "trade {} belongs to account {}, not {}",
                    entry.trade_id, entry.account, account
                )));
            }
        }
        Ok(())
    }

    /// Merge entries into the ledger. Duplicate ids are ignored.
    pub async fn save_trades(
        &self,
        account: &AccountId,
        entries: &[TradeEntry],
    ) -> Result<AppendOutcome, LedgerError> {
        Self::validate(account, entries)?;

        let _writer = self.locks.lock_writer(account).await;
        let outcome = self.repo.append_trades(account, entries).await?;

        if outcome.duplicates > 0 {
            info!(account = %account, duplicates = outcome.duplicates, "Ignored duplicate trades");
        }
        if outcome.out_of_order > 0 {
            warn!(
                account = %account,
                out_of_order = outcome.out_of_order,
                "Trades landed behind the checkpoint, next recalculation runs in full"
            );
        }

        self.cache.publish(outcome.meta.clone()).await;
        Ok(outcome)
    }

    /// Replace the whole ledger of an account (bulk re-sync).
    pub async fn replace_trades(
        &self,
        account: &AccountId,
        entries: &[TradeEntry],
    ) -> Result<AppendOutcome, LedgerError> {
        Self::validate(account, entries)?;

        let _writer = self.locks.lock_writer(account).await;
        let outcome = self.repo.replace_trades(account, entries).await?;
        info!(account = %account, inserted = outcome.inserted, "Ledger replaced");

        self.cache.publish(outcome.meta.clone()).await;
        Ok(outcome)
    }

    pub async fn load_entries(
        &self,
        account: &AccountId,
        base_asset: Option<&str>,
        start_index: i64,
        limit: i64,
    ) -> Result<TradePage, LedgerError> {
        Ok(self
            .repo
            .load_page(account, base_asset, start_index, limit)
            .await?)
    }

    pub async fn load_by_symbol(
        &self,
        account: &AccountId,
        symbol: &Symbol,
        category: Option<Category>,
        since: Option<TimeMs>,
    ) -> Result<Vec<TradeEntry>, LedgerError> {
        Ok(self
            .repo
            .load_by_symbol(account, symbol, category, since)
            .await?)
    }

    pub async fn load_latest_by_symbol_meta(
        &self,
        account: &AccountId,
        symbol: &Symbol,
        category: Option<Category>,
    ) -> Result<LatestTradeMeta, LedgerError> {
        Ok(self.repo.latest_for_symbol(account, symbol, category).await?)
    }

    pub async fn load_summary_by_symbol(
        &self,
        account: &AccountId,
    ) -> Result<Vec<SummaryRow>, LedgerError> {
        let trades = self.repo.load_all_trades(account).await?;
        let results = self.repo.load_trade_results(account, None).await?;
        Ok(summarize_by_symbol(&trades, &results))
    }

    /// Cumulative realized PnL per settlement coin, read from the meta.
    pub async fn load_pnl_by_settle_coin(
        &self,
        account: &AccountId,
    ) -> Result<Vec<CoinPnlRow>, LedgerError> {
        Ok(match self.load_meta(account).await? {
            Some(meta) => pnl_by_coin(&meta.cumulative_pnl),
            None => Vec::new(),
        })
    }

    /// Daily realized PnL with both bounds inclusive.
    pub async fn load_daily_pnl(
        &self,
        account: &AccountId,
        from: Option<TimeMs>,
        to: Option<TimeMs>,
    ) -> Result<Vec<DailyPnlRow>, LedgerError> {
        let upper = to.map(|t| TimeMs::new(t.as_ms().saturating_add(1)));
        let results = self.repo.load_results_between(account, from, upper).await?;
        Ok(daily_pnl(
            &results,
            from.unwrap_or(TimeMs::new(i64::MIN)),
            to.unwrap_or(TimeMs::new(i64::MAX)),
        ))
    }

    /// Latest published meta snapshot (cache first, then the store).
    pub async fn load_meta(
        &self,
        account: &AccountId,
    ) -> Result<Option<Arc<RecalcMeta>>, LedgerError> {
        if let Some(meta) = self.cache.get(account).await {
            return Ok(Some(meta));
        }
        match self.repo.load_meta(account).await? {
            Some(meta) => Ok(Some(self.cache.publish(meta).await)),
            None => Ok(None),
        }
    }

    /// Restore a meta document from outside the recalculator.
    ///
    /// The document is stored dirty (`ManualReset`) so the next pass
    /// rebuilds it; `meta.version` must match the stored version.
    pub async fn save_meta(
        &self,
        account: &AccountId,
        mut meta: RecalcMeta,
    ) -> Result<Arc<RecalcMeta>, LedgerError> {
        meta.account = account.clone();
        meta.mark_dirty(DirtyReason::ManualReset);
        meta.updated_at = TimeMs::now();

        let _writer = self.locks.lock_writer(account).await;
        let expected = meta.version;
        match self.repo.save_meta(&meta, expected).await {
            Ok(version) => {
                meta.version = version;
                info!(account = %account, version, "Meta restored, marked for full recalculation");
                Ok(self.cache.publish(meta).await)
            }
            Err(err) => {
                self.cache.invalidate(account).await;
                Err(err)
            }
        }
    }

    /// Run one recalculation pass for an account.
    ///
    /// # Errors
    /// `LedgerError::RecalculationInProgress` when a pass for the same
    /// account is already running.
    pub async fn recalculate(
        &self,
        account: &AccountId,
        from: Option<TimeMs>,
    ) -> Result<RecalcReport, LedgerError> {
        let _guard = self.locks.begin_recalc(account).await?;

        match Recalculator::recalculate(&self.repo, account, from, self.settings).await {
            Ok((meta, report)) => {
                self.cache.publish(meta).await;
                Ok(report)
            }
            Err(err) => {
                warn!(account = %account, error = %err, "Recalculation failed, previous meta kept");
                self.cache.invalidate(account).await;
                Err(err)
            }
        }
    }

    pub async fn load_trade_results(
        &self,
        account: &AccountId,
        position: Option<&PositionKey>,
    ) -> Result<Vec<TradeResult>, LedgerError> {
        Ok(self.repo.load_trade_results(account, position).await?)
    }

    pub async fn load_recent_runs(
        &self,
        account: &AccountId,
        limit: i64,
    ) -> Result<Vec<RecalcRun>, LedgerError> {
        Ok(self.repo.load_recent_runs(account, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repo::test_support::{d, make_trade, setup_test_db};
    use crate::domain::Coin;
    use crate::recalc::LedgerStatus;

    async fn setup() -> (Orchestrator, tempfile::TempDir) {
        let (repo, temp) = setup_test_db().await;
        (
            Orchestrator::new(Arc::new(repo), RecalcSettings::default()),
            temp,
        )
    }

    fn acct() -> AccountId {
        AccountId::new("acct")
    }

    #[tokio::test]
    async fn test_save_trades_rejects_zero_quantity() {
        let (orch, _temp) = setup().await;
        let err = orch
            .save_trades(&acct(), &[make_trade("1", "BTCUSDT", "0", "100", 1000)])
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTrade(_)));
    }

    #[tokio::test]
    async fn test_save_trades_rejects_foreign_account() {
        let (orch, _temp) = setup().await;
        let err = orch
            .save_trades(
                &AccountId::new("other"),
                &[make_trade("1", "BTCUSDT", "1", "100", 1000)],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTrade(_)));
    }

    #[tokio::test]
    async fn test_recalculate_publishes_to_cache() {
        let (orch, _temp) = setup().await;
        orch.save_trades(
            &acct(),
            &[
                make_trade("1", "BTCUSDT", "1", "100", 1000),
                make_trade("2", "BTCUSDT", "-1", "120", 2000),
            ],
        )
        .await
        .unwrap();

        let report = orch.recalculate(&acct(), None).await.unwrap();
        assert_eq!(report.trades_processed, 2);

        let meta = orch.load_meta(&acct()).await.unwrap().unwrap();
        assert_eq!(meta.version, report.version);
        assert_eq!(meta.cumulative_pnl_for(&Coin::new("USDT")), d("19.8"));

        let by_coin = orch.load_pnl_by_settle_coin(&acct()).await.unwrap();
        assert_eq!(by_coin.len(), 1);
        assert_eq!(by_coin[0].cumulative_pnl, d("19.8"));
    }

    #[tokio::test]
    async fn test_save_meta_marks_manual_reset() {
        let (orch, _temp) = setup().await;
        orch.save_trades(&acct(), &[make_trade("1", "BTCUSDT", "1", "100", 1000)])
            .await
            .unwrap();
        orch.recalculate(&acct(), None).await.unwrap();

        let current = orch.load_meta(&acct()).await.unwrap().unwrap();
        let restored = orch
            .save_meta(&acct(), (*current).clone())
            .await
            .unwrap();
        assert_eq!(
            restored.status,
            LedgerStatus::Dirty {
                reason: DirtyReason::ManualReset
            }
        );
        assert_eq!(restored.version, current.version + 1);

        // Stale version is refused.
        let stale = orch.save_meta(&acct(), (*current).clone()).await;
        assert!(matches!(stale, Err(LedgerError::VersionConflict { .. })));
    }

    #[tokio::test]
    async fn test_daily_pnl_bounds_are_inclusive() {
        let (orch, _temp) = setup().await;
        orch.save_trades(
            &acct(),
            &[
                make_trade("1", "BTCUSDT", "1", "100", 1000),
                make_trade("2", "BTCUSDT", "-1", "110", 2000),
            ],
        )
        .await
        .unwrap();
        orch.recalculate(&acct(), None).await.unwrap();

        let rows = orch
            .load_daily_pnl(&acct(), Some(TimeMs::new(1000)), Some(TimeMs::new(2000)))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].trade_count, 2);
        assert_eq!(rows[0].realized_pnl, d("9.8"));
    }
}
