pub mod api;
pub mod config;
pub mod datasource;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;
pub mod recalc;

pub use config::Config;
pub use datasource::{DataSourceError, HttpTradeSource, MockTradeSource, TradeSource};
pub use db::{init_db, Repository};
pub use domain::{
    AccountId, Category, Coin, Decimal, PositionKey, Side, Symbol, TimeMs, TradeEntry,
};
pub use engine::{CostBasisAccumulator, PositionState, TradeResult};
pub use error::{AppError, LedgerError};
pub use orchestration::{Ingestor, Orchestrator};
pub use recalc::{DirtyReason, LedgerStatus, RecalcMeta, RecalcMode, RecalcReport, Recalculator};
