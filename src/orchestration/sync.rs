use crate::datasource::{DataSourceError, TradeSource};
use crate::domain::{AccountId, TimeMs};
use crate::error::LedgerError;
use crate::orchestration::Orchestrator;
use crate::recalc::RecalcReport;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Pulls trades from an exchange feed into the ledger and triggers recalculation.
#[derive(Clone)]
pub struct Ingestor {
    source: Arc<dyn TradeSource>,
    orchestrator: Orchestrator,
    lookback_ms: i64,
}

impl Ingestor {
    pub fn new(source: Arc<dyn TradeSource>, orchestrator: Orchestrator, lookback_ms: i64) -> Self {
        Self {
            source,
            orchestrator,
            lookback_ms,
        }
    }

    /// Fetch start: the latest ingested trade minus the lookback window.
    ///
    /// Re-fetching the overlap is harmless because duplicates are dropped,
    /// and it picks up late trades sharing the latest millisecond.
    async fn fetch_start(&self, account: &AccountId) -> Result<TimeMs, SyncError> {
        let latest = self
            .orchestrator
            .repo()
            .latest_trade_time(account)
            .await
            .map_err(LedgerError::from)?;

        let fetch_from = match latest {
            Some(latest) => TimeMs::new(latest.as_ms().saturating_sub(self.lookback_ms).max(0)),
            None => TimeMs::new(0),
        };

        debug!(
            account = %account,
            latest = latest.map(|t| t.as_ms()),
            fetch_from = fetch_from.as_ms(),
            lookback_ms = self.lookback_ms,
            "Computed sync window"
        );
        Ok(fetch_from)
    }

    /// One sync round for an account: fetch, append, recalculate.
    ///
    /// A recalculation already running for the account is not an error;
    /// the next round picks the new trades up.
    pub async fn sync_once(&self, account: &AccountId) -> Result<SyncResult, SyncError> {
        let fetch_from = self.fetch_start(account).await?;
        let fetched = self.source.fetch_trades(account, fetch_from).await?;
        let trades_fetched = fetched.len();

        let valid: Vec<_> = fetched
            .into_iter()
            .filter(|t| match t.validate() {
                Ok(()) if &t.account == account => true,
                Ok(()) => {
                    warn!(account = %account, trade_id = %t.trade_id, "Skipping trade for another account");
                    false
                }
                Err(reason) => {
                    warn!(account = %account, %reason, "Skipping invalid trade");
                    false
                }
            })
            .collect();

        let outcome = self.orchestrator.save_trades(account, &valid).await?;

        let never_folded =
            outcome.meta.checkpoint_ms.is_none() && outcome.meta.registration_ms.is_some();
        let needs_recalc = outcome.inserted > 0 || outcome.meta.is_dirty() || never_folded;
        let recalc = if needs_recalc {
            let from = valid.iter().map(|t| t.time_ms).min().unwrap_or(fetch_from);
            match self.orchestrator.recalculate(account, Some(from)).await {
                Ok(report) => Some(report),
                Err(LedgerError::RecalculationInProgress(_)) => {
                    debug!(account = %account, "Recalculation already running, deferring");
                    None
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            None
        };

        info!(
            account = %account,
            fetched = trades_fetched,
            inserted = outcome.inserted,
            duplicates = outcome.duplicates,
            recalculated = recalc.is_some(),
            "Sync round complete"
        );

        Ok(SyncResult {
            trades_fetched,
            trades_new: outcome.inserted,
            fetch_from,
            recalc,
        })
    }

    /// Periodic sync loop over `accounts` until `shutdown` flips to true.
    ///
    /// Failures are logged and retried on the next tick.
    pub async fn run(
        &self,
        accounts: Vec<AccountId>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(accounts = accounts.len(), interval_ms = interval.as_millis() as u64, "Sync loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let rounds = join_all(accounts.iter().map(|a| self.sync_once(a))).await;
                    for (account, round) in accounts.iter().zip(rounds) {
                        if let Err(e) = round {
                            warn!(account = %account, error = %e, "Sync round failed");
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Sync loop stopped");
                        break;
                    }
                }
            }
        }
    }
}

#[derive(Debug)]
pub struct SyncResult {
    pub trades_fetched: usize,
    pub trades_new: usize,
    pub fetch_from: TimeMs,
    pub recalc: Option<RecalcReport>,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    DataSource(#[from] DataSourceError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}
