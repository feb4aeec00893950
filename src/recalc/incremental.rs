//! Full and incremental replay of an account's ledger through the accumulator.

use crate::db::Repository;
use crate::domain::{sort_trades_deterministic, AccountId, PositionKey, TimeMs, TradeEntry};
use crate::engine::CostBasisAccumulator;
use crate::error::LedgerError;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{
    DirtyReason, LedgerStatus, RecalcMeta, RecalcMode, RecalcReport, RecalcRun, RecalcSettings,
    ReconciliationWarning,
};

/// Recalculator for checkpointed ledger replay.
pub struct Recalculator;

impl Recalculator {
    /// Decide how the next pass replays the ledger.
    ///
    /// Incremental only when a clean checkpoint exists, `from` is at or
    /// after the registration horizon, and no row ingested since the last
    /// pass sorts before the checkpoint.
    ///
    /// # Errors
    /// Returns an error if the backfill lookup fails.
    pub async fn choose_mode(
        repo: &Repository,
        meta: &RecalcMeta,
        from: Option<TimeMs>,
    ) -> Result<RecalcMode, sqlx::Error> {
        let (Some(from), Some(checkpoint)) = (from, meta.checkpoint_ms) else {
            return Ok(RecalcMode::Full);
        };

        if let Some(reason) = meta.dirty_reason() {
            debug!(account = %meta.account, %reason, "Meta is dirty, escalating to full");
            return Ok(RecalcMode::Full);
        }

        match meta.registration_ms {
            Some(registration) if from >= registration => {}
            _ => return Ok(RecalcMode::Full),
        }

        let backfilled = repo
            .has_backfilled_trades(
                &meta.account,
                meta.ledger_seq,
                checkpoint,
                meta.max_id_at_checkpoint(),
            )
            .await?;
        if backfilled {
            warn!(
                account = %meta.account,
                checkpoint = checkpoint.as_ms(),
                "Trades ingested behind the checkpoint since the last pass, escalating to full"
            );
            return Ok(RecalcMode::Full);
        }

        Ok(RecalcMode::Incremental)
    }

    /// Run one recalculation pass and publish it atomically.
    ///
    /// # Arguments
    /// * `repo` - Database repository
    /// * `account` - Account whose ledger is replayed
    /// * `from` - Requested start; `None` forces a full pass
    /// * `settings` - Rounding scale and warning retention
    ///
    /// # Returns
    /// The published meta document and a report of the pass
    ///
    /// # Errors
    /// Returns an error if storage fails or the meta document changed
    /// concurrently; in both cases nothing is published.
    pub async fn recalculate(
        repo: &Repository,
        account: &AccountId,
        from: Option<TimeMs>,
        settings: RecalcSettings,
    ) -> Result<(RecalcMeta, RecalcReport), LedgerError> {
        let started_at = TimeMs::now();
        let stored = repo
            .load_meta(account)
            .await?
            .unwrap_or_else(|| RecalcMeta::new(account.clone()));

        // Read before the trades so rows landing mid-pass count as unseen.
        let ledger_seq = repo.max_trade_seq(account).await?;

        let mode = Self::choose_mode(repo, &stored, from).await?;
        let (mode, trades, mut accumulator) = match (mode, stored.checkpoint_ms) {
            (RecalcMode::Incremental, Some(checkpoint)) => {
                let trades = Self::load_suffix(repo, &stored, checkpoint).await?;
                let accumulator = CostBasisAccumulator::resume(
                    stored.positions.clone(),
                    stored.cumulative_pnl.clone(),
                    settings.pnl_scale,
                );
                (RecalcMode::Incremental, trades, accumulator)
            }
            _ => {
                let trades = repo.load_all_trades(account).await?;
                (
                    RecalcMode::Full,
                    trades,
                    CostBasisAccumulator::new(settings.pnl_scale),
                )
            }
        };

        for trade in &trades {
            if let Err(err) = accumulator.process_trade(trade) {
                error!(account = %account, mode = %mode, error = %err, "Fold aborted, nothing published");
                return Err(err.into());
            }
        }
        let outputs = accumulator.into_outputs();

        for over in &outputs.over_closes {
            warn!(
                account = %account,
                trade_id = %over.trade_id,
                position = %over.position,
                tracked_size = %over.tracked_size,
                trade_qty = %over.trade_qty,
                excess = %over.excess,
                "Over-close: excess opened the opposite side"
            );
        }

        let mut meta = stored.clone();
        meta.positions = outputs.positions;
        meta.cumulative_pnl = outputs.cumulative_pnl;
        meta.ledger_seq = ledger_seq;
        meta.status = LedgerStatus::Clean;

        match mode {
            RecalcMode::Full => {
                meta.registration_ms = trades.first().map(|t| t.time_ms);
                meta.checkpoint_ms = None;
                meta.ids_at_checkpoint.clear();
                meta.warnings.clear();
            }
            RecalcMode::Incremental => {
                if let Some(first) = trades.first() {
                    meta.registration_ms =
                        Some(meta.registration_ms.map_or(first.time_ms, |r| r.min(first.time_ms)));
                }
            }
        }
        Self::advance_checkpoint(&mut meta, &trades);

        meta.warnings
            .extend(outputs.over_closes.iter().map(ReconciliationWarning::from));
        if meta.warnings.len() > settings.max_warnings {
            let excess = meta.warnings.len() - settings.max_warnings;
            meta.warnings.drain(..excess);
        }
        // A full pass replayed every over-close from zero state; only one
        // met while resuming asks for a rebuild.
        if mode == RecalcMode::Incremental && !outputs.over_closes.is_empty() {
            meta.mark_dirty(DirtyReason::OverClose);
        }

        let finished_at = TimeMs::now();
        meta.updated_at = finished_at;

        let run = RecalcRun {
            run_id: Uuid::new_v4(),
            account: account.clone(),
            mode,
            trades_processed: trades.len(),
            over_closes: outputs.over_closes.len(),
            checkpoint_ms: meta.checkpoint_ms,
            started_at,
            finished_at,
        };

        meta.version = repo.publish_recalc(&meta, &outputs.results, &run).await?;

        info!(
            account = %account,
            run_id = %run.run_id,
            mode = %mode,
            trades = run.trades_processed,
            over_closes = run.over_closes,
            checkpoint = meta.checkpoint_ms.map(|t| t.as_ms()),
            version = meta.version,
            "Recalculation published"
        );

        let report = RecalcReport {
            run_id: run.run_id,
            mode,
            trades_processed: run.trades_processed,
            over_closes: run.over_closes,
            checkpoint_ms: meta.checkpoint_ms,
            version: meta.version,
            status: meta.status,
        };

        Ok((meta, report))
    }

    /// Trades at or after the checkpoint that the meta has not folded yet,
    /// in replay order.
    async fn load_suffix(
        repo: &Repository,
        meta: &RecalcMeta,
        checkpoint: TimeMs,
    ) -> Result<Vec<TradeEntry>, sqlx::Error> {
        let positions = repo
            .distinct_positions(&meta.account, Some(checkpoint))
            .await?;

        let mut trades = Vec::new();
        for key in positions {
            let folded = meta.ids_at_checkpoint.get(&key);
            let suffix = repo
                .load_by_symbol(&meta.account, &key.symbol, Some(key.category), Some(checkpoint))
                .await?;
            trades.extend(suffix.into_iter().filter(|t| {
                !(t.time_ms == checkpoint
                    && folded.map_or(false, |ids| ids.contains(&t.trade_id)))
            }));
        }

        sort_trades_deterministic(&mut trades);
        Ok(trades)
    }

    /// Move the checkpoint to the last folded trade and record the ids
    /// folded in that millisecond. An empty pass keeps the old checkpoint.
    fn advance_checkpoint(meta: &mut RecalcMeta, trades: &[TradeEntry]) {
        let Some(last) = trades.last() else {
            return;
        };
        let checkpoint = last.time_ms;

        let mut ids: BTreeMap<PositionKey, BTreeSet<String>> =
            if meta.checkpoint_ms == Some(checkpoint) {
                std::mem::take(&mut meta.ids_at_checkpoint)
            } else {
                BTreeMap::new()
            };

        for trade in trades.iter().rev().take_while(|t| t.time_ms == checkpoint) {
            ids.entry(trade.position_key())
                .or_default()
                .insert(trade.trade_id.clone());
        }

        meta.checkpoint_ms = Some(checkpoint);
        meta.ids_at_checkpoint = ids;
    }
}
