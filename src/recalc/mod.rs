//! Recalculation pipeline: checkpointed meta document plus full/incremental replay.
//!
//! This module provides:
//! - `RecalcMeta`, the versioned per-account memo of the accumulator fold
//! - An explicit ledger status (`Clean` / `Dirty`) replacing ad hoc flags
//! - Checkpoint + ids-at-checkpoint bookkeeping for same-millisecond resumes
//! - The `Recalculator` that picks a mode, replays, and publishes atomically

use crate::config::Config;
use crate::domain::{AccountId, Coin, Decimal, PositionKey, TimeMs};
use crate::engine::{OverClose, PositionState};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

pub mod incremental;

pub use incremental::Recalculator;

/// Why the next recalculation must replay the whole ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DirtyReason {
    /// A trade landed before the checkpoint (or sorts before already-folded
    /// trades in the checkpoint millisecond).
    OutOfOrderTrade,
    /// The last pass closed more than a tracked position.
    OverClose,
    /// The ledger was bulk-replaced by a re-sync.
    LedgerReplaced,
    /// Meta was restored or reset from outside the recalculator.
    ManualReset,
}

impl fmt::Display for DirtyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DirtyReason::OutOfOrderTrade => "out_of_order_trade",
            DirtyReason::OverClose => "over_close",
            DirtyReason::LedgerReplaced => "ledger_replaced",
            DirtyReason::ManualReset => "manual_reset",
        };
        f.write_str(s)
    }
}

/// Finite state of the meta document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum LedgerStatus {
    /// Meta equals a replay of every trade up to the checkpoint.
    #[default]
    Clean,
    /// The next recalculation must run in full mode.
    Dirty { reason: DirtyReason },
}

/// A reconciliation problem found while folding, kept on the meta document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationWarning {
    pub trade_id: String,
    pub position: PositionKey,
    pub time_ms: TimeMs,
    pub message: String,
}

impl From<&OverClose> for ReconciliationWarning {
    fn from(over: &OverClose) -> Self {
        Self {
            trade_id: over.trade_id.clone(),
            position: over.position.clone(),
            time_ms: over.time_ms,
            message: format!(
                "trade qty {} closed tracked size {}; {} opened on the opposite side",
                over.trade_qty, over.tracked_size, over.excess
            ),
        }
    }
}

/// Durable snapshot of the accumulator fold for one account.
///
/// Never an independent source of truth: replaying all trades with
/// `time_ms <= checkpoint_ms` from zero state reproduces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalcMeta {
    pub account: AccountId,
    /// Document version; bumped by every persisted write.
    #[serde(default)]
    pub version: i64,
    /// Earliest trade horizon seen for the account.
    pub registration_ms: Option<TimeMs>,
    pub positions: BTreeMap<PositionKey, PositionState>,
    pub cumulative_pnl: BTreeMap<Coin, Decimal>,
    pub checkpoint_ms: Option<TimeMs>,
    /// Trade ids already folded at exactly `checkpoint_ms`, per position.
    pub ids_at_checkpoint: BTreeMap<PositionKey, BTreeSet<String>>,
    /// Highest ledger row sequence the fold has seen.
    pub ledger_seq: i64,
    pub status: LedgerStatus,
    pub warnings: Vec<ReconciliationWarning>,
    pub updated_at: TimeMs,
}

impl RecalcMeta {
    /// Zero state for an account that has never been recalculated.
    pub fn new(account: AccountId) -> Self {
        Self {
            account,
            version: 0,
            registration_ms: None,
            positions: BTreeMap::new(),
            cumulative_pnl: BTreeMap::new(),
            checkpoint_ms: None,
            ids_at_checkpoint: BTreeMap::new(),
            ledger_seq: 0,
            status: LedgerStatus::Clean,
            warnings: Vec::new(),
            updated_at: TimeMs::now(),
        }
    }

    pub fn is_dirty(&self) -> bool {
        matches!(self.status, LedgerStatus::Dirty { .. })
    }

    pub fn dirty_reason(&self) -> Option<DirtyReason> {
        match self.status {
            LedgerStatus::Dirty { reason } => Some(reason),
            LedgerStatus::Clean => None,
        }
    }

    /// Mark dirty. The first reason sticks until a full pass clears it.
    pub fn mark_dirty(&mut self, reason: DirtyReason) {
        if !self.is_dirty() {
            self.status = LedgerStatus::Dirty { reason };
        }
    }

    /// Largest trade id folded in the checkpoint millisecond, across positions.
    pub fn max_id_at_checkpoint(&self) -> Option<&str> {
        self.ids_at_checkpoint
            .values()
            .flat_map(|ids| ids.iter())
            .max()
            .map(String::as_str)
    }

    /// True if a trade at `time_ms` with `trade_id` would replay before
    /// something the checkpoint already covers.
    pub fn precedes_checkpoint(&self, time_ms: TimeMs, trade_id: &str) -> bool {
        match self.checkpoint_ms {
            None => false,
            Some(checkpoint) if time_ms < checkpoint => true,
            Some(checkpoint) if time_ms == checkpoint => self
                .max_id_at_checkpoint()
                .map(|max_id| trade_id < max_id)
                .unwrap_or(false),
            Some(_) => false,
        }
    }

    /// Record newly ingested trades: widen the registration horizon and flag
    /// the meta dirty when any of them lands behind the checkpoint.
    ///
    /// Returns the number of trades found out of order.
    pub fn note_ingested<'a>(
        &mut self,
        trades: impl IntoIterator<Item = (TimeMs, &'a str)>,
    ) -> usize {
        let mut out_of_order = 0;
        for (time_ms, trade_id) in trades {
            self.registration_ms = Some(match self.registration_ms {
                Some(existing) => existing.min(time_ms),
                None => time_ms,
            });
            if self.precedes_checkpoint(time_ms, trade_id) {
                out_of_order += 1;
            }
        }
        if out_of_order > 0 {
            self.mark_dirty(DirtyReason::OutOfOrderTrade);
        }
        out_of_order
    }

    pub fn cumulative_pnl_for(&self, coin: &Coin) -> Decimal {
        self.cumulative_pnl.get(coin).copied().unwrap_or_default()
    }
}

/// How a recalculation pass replays the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecalcMode {
    /// Rebuild from zero state over the whole ledger.
    Full,
    /// Resume from the checkpoint.
    Incremental,
}

impl fmt::Display for RecalcMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecalcMode::Full => write!(f, "full"),
            RecalcMode::Incremental => write!(f, "incremental"),
        }
    }
}

/// Outcome of one recalculation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalcReport {
    pub run_id: Uuid,
    pub mode: RecalcMode,
    pub trades_processed: usize,
    pub over_closes: usize,
    pub checkpoint_ms: Option<TimeMs>,
    pub version: i64,
    pub status: LedgerStatus,
}

impl std::str::FromStr for RecalcMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(RecalcMode::Full),
            "incremental" => Ok(RecalcMode::Incremental),
            other => Err(format!("unknown recalculation mode: {other}")),
        }
    }
}

/// Audit row written with every published recalculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalcRun {
    pub run_id: Uuid,
    pub account: AccountId,
    pub mode: RecalcMode,
    pub trades_processed: usize,
    pub over_closes: usize,
    pub checkpoint_ms: Option<TimeMs>,
    pub started_at: TimeMs,
    pub finished_at: TimeMs,
}

/// Numeric and bookkeeping knobs for recalculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecalcSettings {
    /// Decimal places realized PnL is rounded to per trade.
    pub pnl_scale: u32,
    /// Most recent reconciliation warnings kept on the meta document.
    pub max_warnings: usize,
}

impl Default for RecalcSettings {
    fn default() -> Self {
        Self {
            pnl_scale: 10,
            max_warnings: 100,
        }
    }
}

impl From<&Config> for RecalcSettings {
    fn from(config: &Config) -> Self {
        Self {
            pnl_scale: config.pnl_scale,
            max_warnings: config.max_warnings,
        }
    }
}
