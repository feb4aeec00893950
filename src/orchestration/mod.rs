//! Account-level coordination: write serialization, the meta snapshot cache,
//! the ledger facade, and the exchange sync loop.

pub mod locks;
pub mod orchestrator;
pub mod sync;

pub use locks::{AccountLocks, MetaCache, RecalcGuard};
pub use orchestrator::Orchestrator;
pub use sync::{Ingestor, SyncError, SyncResult};
