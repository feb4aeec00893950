//! Weighted-average-cost scenarios run through the pure accumulator.

use tradeledger::domain::{
    sort_trades_deterministic, AccountId, Category, Coin, Decimal, PositionKey, Symbol, TimeMs,
    TradeEntry,
};
use tradeledger::engine::CostBasisAccumulator;

fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

fn trade(id: &str, qty: &str, price: &str, fee: &str, time_ms: i64) -> TradeEntry {
    TradeEntry::new(
        id,
        AccountId::new("acct"),
        Symbol::new("BTCUSDT"),
        Category::Linear,
        d(qty),
        d(price),
        d(fee),
        Coin::new("USDT"),
        Coin::new("USDT"),
        TimeMs::new(time_ms),
    )
}

fn btc() -> PositionKey {
    PositionKey::new(Category::Linear, Symbol::new("BTCUSDT"))
}

#[test]
fn test_weighted_average_then_full_close() {
    let mut acc = CostBasisAccumulator::new(10);

    acc.process_trade(&trade("1", "10", "100", "0", 1000)).unwrap();
    let second = acc.process_trade(&trade("2", "5", "110", "0", 2000)).unwrap().clone();
    assert_eq!(second.position_size, d("15"));
    assert_eq!(second.avg_price.round_dp(2), d("103.33"));
    assert!(second.realized_pnl.is_zero());

    let close = acc.process_trade(&trade("3", "-15", "120", "0", 3000)).unwrap().clone();
    assert_eq!(close.realized_pnl, d("250"));
    assert!(close.position_size.is_zero());
    assert!(close.over_close.is_none());
    assert_eq!(acc.cumulative_pnl(&Coin::new("USDT")), d("250"));
}

#[test]
fn test_fees_reduce_realized_pnl_only() {
    let mut acc = CostBasisAccumulator::new(10);
    acc.process_trade(&trade("1", "10", "100", "1", 1000)).unwrap();
    acc.process_trade(&trade("2", "5", "110", "0.5", 2000)).unwrap();
    let close = acc.process_trade(&trade("3", "-15", "120", "1.5", 3000)).unwrap().clone();

    assert_eq!(close.gross_pnl.round_dp(10), d("250"));
    assert_eq!(close.realized_pnl, d("248.5"));
    assert_eq!(acc.cumulative_pnl(&Coin::new("USDT")), d("247"));
}

#[test]
fn test_over_close_flips_to_short_at_trade_price() {
    let mut acc = CostBasisAccumulator::new(10);
    acc.process_trade(&trade("1", "10", "100", "0", 1000)).unwrap();
    let flip = acc.process_trade(&trade("2", "-15", "90", "0", 2000)).unwrap().clone();

    assert_eq!(flip.realized_pnl, d("-100"));
    assert_eq!(flip.position_size, d("-5"));
    assert_eq!(flip.avg_price, d("90"));
    assert!(flip.over_close.is_some());

    let state = acc.position(&btc()).unwrap();
    assert!(state.is_short());

    let outputs = acc.into_outputs();
    assert_eq!(outputs.over_closes.len(), 1);
    assert_eq!(outputs.over_closes[0].tracked_size, d("10"));
}

#[test]
fn test_short_round_trip() {
    let mut acc = CostBasisAccumulator::new(10);
    acc.process_trade(&trade("1", "-4", "50", "0", 1000)).unwrap();
    let cover = acc.process_trade(&trade("2", "4", "40", "0", 2000)).unwrap().clone();
    assert_eq!(cover.realized_pnl, d("40"));
    assert!(cover.position_size.is_zero());
}

#[test]
fn test_replay_is_independent_of_input_order() {
    let trades = vec![
        trade("b", "2", "100", "0.1", 1000),
        trade("a", "1", "105", "0.1", 1000),
        trade("c", "-2", "120", "0.1", 2000),
        trade("d", "-3", "80", "0.1", 3000),
    ];

    let mut forward = trades.clone();
    let mut reversed: Vec<_> = trades.into_iter().rev().collect();
    sort_trades_deterministic(&mut forward);
    sort_trades_deterministic(&mut reversed);

    let fold = |sorted: &[TradeEntry]| {
        let mut acc = CostBasisAccumulator::new(10);
        for t in sorted {
            acc.process_trade(t).unwrap();
        }
        acc.into_outputs()
    };

    let left = fold(&forward);
    let right = fold(&reversed);
    assert_eq!(left.positions, right.positions);
    assert_eq!(left.cumulative_pnl, right.cumulative_pnl);
    assert_eq!(left.results, right.results);
}
