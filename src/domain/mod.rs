//! Domain types and determinism layer for the trade ledger.
//!
//! This module provides:
//! - Lossless numeric handling via Decimal wrapper
//! - Domain primitives: TimeMs, AccountId, Symbol, Category, Coin, PositionKey
//! - The immutable TradeEntry record
//! - Stable (time_ms, trade_id) ordering for deterministic replay

pub mod decimal;
pub mod ordering;
pub mod primitives;
pub mod trade;

pub use decimal::Decimal;
pub use ordering::{sort_trades_deterministic, TradeOrderingKey};
pub use primitives::{
    AccountId, Category, Coin, InvalidPositionKey, PositionKey, Side, Symbol, TimeMs,
    UnknownCategory,
};
pub use trade::TradeEntry;
