//! Ledger ingestion and recalculation through the orchestrator.

use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;
use tradeledger::db::init_db;
use tradeledger::domain::{AccountId, Category, Coin, Decimal, Symbol, TimeMs, TradeEntry};
use tradeledger::recalc::{DirtyReason, RecalcMeta, RecalcMode, RecalcSettings};
use tradeledger::{LedgerError, Orchestrator, Repository};

const DAY_MS: i64 = 86_400_000;

async fn setup() -> (Orchestrator, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));
    (
        Orchestrator::new(repo, RecalcSettings::default()),
        temp_dir,
    )
}

fn acct() -> AccountId {
    AccountId::new("main")
}

fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

#[allow(clippy::too_many_arguments)]
fn trade(
    id: &str,
    symbol: &str,
    category: Category,
    qty: &str,
    price: &str,
    fee: &str,
    coin: &str,
    time_ms: i64,
) -> TradeEntry {
    TradeEntry::new(
        id,
        acct(),
        Symbol::new(symbol),
        category,
        d(qty),
        d(price),
        d(fee),
        Coin::new(coin),
        Coin::new(coin),
        TimeMs::new(time_ms),
    )
}

fn btc(id: &str, qty: &str, price: &str, time_ms: i64) -> TradeEntry {
    trade(id, "BTCUSDT", Category::Linear, qty, price, "0.05", "USDT", time_ms)
}

/// The parts of the meta that a replay determines.
fn fold_state(
    meta: &RecalcMeta,
) -> (
    String,
    BTreeMap<Coin, Decimal>,
    Option<TimeMs>,
    String,
) {
    (
        serde_json::to_string(&meta.positions).unwrap(),
        meta.cumulative_pnl.clone(),
        meta.checkpoint_ms,
        serde_json::to_string(&meta.ids_at_checkpoint).unwrap(),
    )
}

fn mixed_ledger() -> Vec<TradeEntry> {
    vec![
        btc("1", "1", "100", 1_000),
        btc("2", "1", "120", 2_000),
        trade("3", "ETHUSDT", Category::Linear, "10", "20", "0.1", "USDT", DAY_MS + 5),
        btc("4", "-1.5", "130", DAY_MS + 10),
        trade("5", "BTCUSD", Category::Inverse, "100", "50000", "0.0001", "BTC", DAY_MS + 20),
        trade("6", "ETHUSDT", Category::Linear, "-10", "18", "0.1", "USDT", 2 * DAY_MS),
        trade("7", "BTCUSD", Category::Inverse, "-100", "51000", "0.0001", "BTC", 2 * DAY_MS + 1),
        btc("8", "-0.5", "90", 2 * DAY_MS + 2),
    ]
}

#[tokio::test]
async fn test_idempotent_append() {
    let (orch, _temp) = setup().await;
    let ledger = mixed_ledger();

    orch.save_trades(&acct(), &ledger).await.unwrap();
    orch.recalculate(&acct(), None).await.unwrap();
    let first = orch.load_meta(&acct()).await.unwrap().unwrap();
    let first_results = orch.load_trade_results(&acct(), None).await.unwrap();

    let again = orch.save_trades(&acct(), &ledger).await.unwrap();
    assert_eq!(again.inserted, 0);
    assert_eq!(again.duplicates, ledger.len());
    assert!(!again.meta.is_dirty());

    orch.recalculate(&acct(), None).await.unwrap();
    let second = orch.load_meta(&acct()).await.unwrap().unwrap();

    assert_eq!(fold_state(&first), fold_state(&second));
    assert_eq!(
        orch.load_trade_results(&acct(), None).await.unwrap(),
        first_results
    );
    let page = orch.load_entries(&acct(), None, 0, 100).await.unwrap();
    assert_eq!(page.total_count, ledger.len() as i64);
}

#[tokio::test]
async fn test_incremental_equals_full() {
    let (orch, _temp) = setup().await;
    let ledger = mixed_ledger();

    // Feed the ledger in three batches, recalculating incrementally.
    let mut modes = Vec::new();
    for batch in [&ledger[..3], &ledger[3..6], &ledger[6..]] {
        orch.save_trades(&acct(), batch).await.unwrap();
        let from = batch.iter().map(|t| t.time_ms).min();
        modes.push(orch.recalculate(&acct(), from).await.unwrap().mode);
    }
    assert_eq!(
        modes,
        vec![RecalcMode::Full, RecalcMode::Incremental, RecalcMode::Incremental]
    );

    let incremental = orch.load_meta(&acct()).await.unwrap().unwrap();
    let incremental_results = orch.load_trade_results(&acct(), None).await.unwrap();
    let incremental_summary = orch.load_summary_by_symbol(&acct()).await.unwrap();
    let incremental_daily = orch.load_daily_pnl(&acct(), None, None).await.unwrap();

    let report = orch.recalculate(&acct(), None).await.unwrap();
    assert_eq!(report.mode, RecalcMode::Full);
    let full = orch.load_meta(&acct()).await.unwrap().unwrap();

    assert_eq!(fold_state(&incremental), fold_state(&full));
    assert_eq!(
        orch.load_trade_results(&acct(), None).await.unwrap(),
        incremental_results
    );
    assert_eq!(
        orch.load_summary_by_symbol(&acct()).await.unwrap(),
        incremental_summary
    );
    assert_eq!(
        orch.load_daily_pnl(&acct(), None, None).await.unwrap(),
        incremental_daily
    );
}

#[tokio::test]
async fn test_same_millisecond_arrival_order_does_not_matter() {
    let a = btc("a", "2", "100", 5_000);
    let b = btc("b", "-1", "110", 5_000);

    let mut finals = Vec::new();
    for order in [[a.clone(), b.clone()], [b.clone(), a.clone()]] {
        let (orch, _temp) = setup().await;
        orch.save_trades(&acct(), &[btc("0", "1", "90", 1_000)])
            .await
            .unwrap();
        orch.recalculate(&acct(), None).await.unwrap();

        for entry in order {
            orch.save_trades(&acct(), &[entry.clone()]).await.unwrap();
            orch.recalculate(&acct(), Some(entry.time_ms)).await.unwrap();
        }
        let meta = orch.load_meta(&acct()).await.unwrap().unwrap();
        assert!(!meta.is_dirty());
        finals.push(fold_state(&meta));
    }

    assert_eq!(finals[0], finals[1]);
}

#[tokio::test]
async fn test_out_of_order_trade_flags_dirty_and_rebuilds() {
    let (orch, _temp) = setup().await;
    orch.save_trades(&acct(), &[btc("2", "1", "100", 2_000)])
        .await
        .unwrap();
    orch.recalculate(&acct(), None).await.unwrap();

    let late = orch
        .save_trades(&acct(), &[btc("1", "1", "80", 1_000)])
        .await
        .unwrap();
    assert_eq!(late.out_of_order, 1);
    assert_eq!(late.meta.dirty_reason(), Some(DirtyReason::OutOfOrderTrade));

    let report = orch
        .recalculate(&acct(), Some(TimeMs::new(2_000)))
        .await
        .unwrap();
    assert_eq!(report.mode, RecalcMode::Full);

    let meta = orch.load_meta(&acct()).await.unwrap().unwrap();
    assert!(!meta.is_dirty());
    let key = tradeledger::PositionKey::new(Category::Linear, Symbol::new("BTCUSDT"));
    assert_eq!(meta.positions[&key].avg_price, d("90"));
}

#[tokio::test]
async fn test_from_before_registration_runs_full() {
    let (orch, _temp) = setup().await;
    orch.save_trades(&acct(), &[btc("1", "1", "100", 10_000)])
        .await
        .unwrap();
    orch.recalculate(&acct(), None).await.unwrap();
    orch.save_trades(&acct(), &[btc("2", "1", "100", 20_000)])
        .await
        .unwrap();

    let report = orch
        .recalculate(&acct(), Some(TimeMs::new(5_000)))
        .await
        .unwrap();
    assert_eq!(report.mode, RecalcMode::Full);
}

#[tokio::test]
async fn test_daily_pnl_sums_to_coin_totals() {
    let (orch, _temp) = setup().await;
    orch.save_trades(&acct(), &mixed_ledger()).await.unwrap();
    orch.recalculate(&acct(), None).await.unwrap();

    let daily = orch.load_daily_pnl(&acct(), None, None).await.unwrap();
    let by_coin = orch.load_pnl_by_settle_coin(&acct()).await.unwrap();
    assert_eq!(by_coin.len(), 2);

    for row in &by_coin {
        let summed: Decimal = daily
            .iter()
            .filter(|r| r.coin == row.coin)
            .map(|r| r.realized_pnl)
            .sum();
        assert_eq!(summed, row.cumulative_pnl, "coin {}", row.coin.as_str());
    }

    let days: std::collections::BTreeSet<_> = daily.iter().map(|r| r.day).collect();
    assert_eq!(days.len(), 3);
}

#[tokio::test]
async fn test_concurrent_recalculation_is_rejected() {
    let (orch, _temp) = setup().await;
    orch.save_trades(&acct(), &mixed_ledger()).await.unwrap();

    let (acct_a, acct_b) = (acct(), acct());
    let (left, right) = tokio::join!(
        orch.recalculate(&acct_a, None),
        orch.recalculate(&acct_b, None)
    );

    let rejected = [&left, &right]
        .iter()
        .filter(|r| matches!(r, Err(LedgerError::RecalculationInProgress(_))))
        .count();
    let succeeded = [&left, &right].iter().filter(|r| r.is_ok()).count();
    assert_eq!(rejected, 1);
    assert_eq!(succeeded, 1);

    // The flag is released once the pass finishes.
    assert!(orch.recalculate(&acct(), None).await.is_ok());
}

#[tokio::test]
async fn test_replace_ledger_forces_full_rebuild() {
    let (orch, _temp) = setup().await;
    orch.save_trades(&acct(), &mixed_ledger()).await.unwrap();
    orch.recalculate(&acct(), None).await.unwrap();

    let replaced = orch
        .replace_trades(&acct(), &[btc("x", "1", "100", 50_000)])
        .await
        .unwrap();
    assert_eq!(replaced.meta.dirty_reason(), Some(DirtyReason::LedgerReplaced));

    let report = orch
        .recalculate(&acct(), Some(TimeMs::new(50_000)))
        .await
        .unwrap();
    assert_eq!(report.mode, RecalcMode::Full);
    assert_eq!(report.trades_processed, 1);

    let results = orch.load_trade_results(&acct(), None).await.unwrap();
    assert_eq!(results.len(), 1);
    let by_coin = orch.load_pnl_by_settle_coin(&acct()).await.unwrap();
    assert_eq!(by_coin.len(), 1);
    assert_eq!(by_coin[0].cumulative_pnl, d("-0.05"));
}

#[tokio::test]
async fn test_out_of_range_trade_is_rejected_at_entry() {
    let (orch, _temp) = setup().await;
    let err = orch
        .save_trades(
            &acct(),
            &[btc("huge", "100000000000000", "100000000000000000", 1_000)],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidTrade(_)));

    let page = orch.load_entries(&acct(), None, 0, 10).await.unwrap();
    assert_eq!(page.total_count, 0);
    assert!(orch.recalculate(&acct(), None).await.is_ok());
}

/// Meta document, computed results and run log as seen from the store.
async fn stored_snapshot(
    orch: &Orchestrator,
) -> (RecalcMeta, Vec<tradeledger::TradeResult>, usize) {
    let repo = orch.repo();
    (
        repo.load_meta(&acct()).await.unwrap().unwrap(),
        repo.load_trade_results(&acct(), None).await.unwrap(),
        repo.load_recent_runs(&acct(), 100).await.unwrap().len(),
    )
}

#[tokio::test]
async fn test_cancelled_recalculation_leaves_previous_state() {
    use futures::FutureExt;

    let (orch, _temp) = setup().await;
    let ledger = mixed_ledger();
    orch.save_trades(&acct(), &ledger[..4]).await.unwrap();
    orch.recalculate(&acct(), None).await.unwrap();
    orch.save_trades(&acct(), &ledger[4..]).await.unwrap();
    let before = stored_snapshot(&orch).await;

    // Polled once and dropped while the pass waits on the store.
    assert!(orch.recalculate(&acct(), None).now_or_never().is_none());

    assert_eq!(stored_snapshot(&orch).await, before);
    assert_eq!(
        *orch.load_meta(&acct()).await.unwrap().unwrap(),
        before.0
    );

    // The in-progress flag went with the dropped pass.
    let report = orch
        .recalculate(&acct(), ledger[4..].iter().map(|t| t.time_ms).min())
        .await
        .unwrap();
    assert_eq!(report.mode, RecalcMode::Incremental);
    assert_eq!(report.trades_processed, ledger.len() - 4);
}

#[tokio::test]
async fn test_failed_recalculation_leaves_previous_state() {
    let (orch, _temp) = setup().await;
    orch.save_trades(&acct(), &mixed_ledger()).await.unwrap();
    orch.recalculate(&acct(), None).await.unwrap();

    // Stored directly, skipping entry validation.
    orch.repo()
        .append_trades(
            &acct(),
            &[btc("huge", "100000000000000", "100000000000000000", 3 * DAY_MS)],
        )
        .await
        .unwrap();
    let before = stored_snapshot(&orch).await;

    for _ in 0..2 {
        let err = orch.recalculate(&acct(), None).await.unwrap_err();
        assert!(matches!(err, LedgerError::Overflow(_)), "{err}");
    }

    assert_eq!(stored_snapshot(&orch).await, before);
    assert_eq!(
        *orch.load_meta(&acct()).await.unwrap().unwrap(),
        before.0
    );
}
