//! Per-account write serialization and the published meta snapshot cache.

use crate::domain::AccountId;
use crate::error::LedgerError;
use crate::recalc::RecalcMeta;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

#[derive(Debug, Default)]
struct AccountSlot {
    writer: Arc<Mutex<()>>,
    recalculating: Arc<AtomicBool>,
}

/// Single-writer discipline per account.
///
/// Appends wait for the account's writer lock. Recalculations also claim an
/// in-progress flag first, so a second concurrent recalculation is rejected
/// instead of queued behind the first.
#[derive(Debug, Default)]
pub struct AccountLocks {
    slots: std::sync::Mutex<HashMap<AccountId, Arc<AccountSlot>>>,
}

/// Held while a recalculation runs; clears the in-progress flag on drop.
pub struct RecalcGuard {
    _writer: OwnedMutexGuard<()>,
    _in_progress: InProgress,
}

/// Clears the flag on drop, including when the caller is cancelled while
/// waiting for the writer lock.
struct InProgress(Arc<AtomicBool>);

impl Drop for InProgress {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, account: &AccountId) -> Arc<AccountSlot> {
        let mut slots = match self.slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.entry(account.clone()).or_default().clone()
    }

    /// Wait for exclusive write access to an account.
    pub async fn lock_writer(&self, account: &AccountId) -> OwnedMutexGuard<()> {
        self.slot(account).writer.clone().lock_owned().await
    }

    /// Claim the account for a recalculation pass.
    ///
    /// # Errors
    /// `LedgerError::RecalculationInProgress` if another pass holds it.
    pub async fn begin_recalc(&self, account: &AccountId) -> Result<RecalcGuard, LedgerError> {
        let slot = self.slot(account);
        if slot
            .recalculating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(LedgerError::RecalculationInProgress(account.clone()));
        }

        let in_progress = InProgress(slot.recalculating.clone());
        let writer = slot.writer.clone().lock_owned().await;

        Ok(RecalcGuard {
            _writer: writer,
            _in_progress: in_progress,
        })
    }
}

/// Latest published meta document per account.
///
/// Publishing swaps the `Arc`; readers hold an immutable snapshot.
#[derive(Debug, Default)]
pub struct MetaCache {
    entries: RwLock<HashMap<AccountId, Arc<RecalcMeta>>>,
}

impl MetaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, account: &AccountId) -> Option<Arc<RecalcMeta>> {
        self.entries.read().await.get(account).cloned()
    }

    /// Replace the cached snapshot, ignoring documents older than the cached one.
    pub async fn publish(&self, meta: RecalcMeta) -> Arc<RecalcMeta> {
        let mut entries = self.entries.write().await;
        if let Some(current) = entries.get(&meta.account) {
            if current.version > meta.version {
                return current.clone();
            }
        }
        let snapshot = Arc::new(meta);
        entries.insert(snapshot.account.clone(), snapshot.clone());
        snapshot
    }

    pub async fn invalidate(&self, account: &AccountId) {
        self.entries.write().await.remove(account);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_second_recalc_is_rejected_while_first_holds_guard() {
        let locks = AccountLocks::new();
        let account = AccountId::new("acct");

        let guard = locks.begin_recalc(&account).await.unwrap();
        let second = locks.begin_recalc(&account).await;
        assert!(matches!(second, Err(LedgerError::RecalculationInProgress(_))));

        // Other accounts are independent.
        let other = locks.begin_recalc(&AccountId::new("other")).await;
        assert!(other.is_ok());

        drop(guard);
        assert!(locks.begin_recalc(&account).await.is_ok());
    }

    #[tokio::test]
    async fn test_recalc_waits_for_writer() {
        let locks = Arc::new(AccountLocks::new());
        let account = AccountId::new("acct");

        let writer = locks.lock_writer(&account).await;
        let pending = {
            let locks = locks.clone();
            let account = account.clone();
            tokio::spawn(async move { locks.begin_recalc(&account).await.map(|_| ()) })
        };

        tokio::task::yield_now().await;
        assert!(!pending.is_finished());
        drop(writer);
        assert!(pending.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_meta_cache_keeps_newest_version() {
        let cache = MetaCache::new();
        let account = AccountId::new("acct");

        let mut newer = RecalcMeta::new(account.clone());
        newer.version = 3;
        cache.publish(newer).await;

        let mut older = RecalcMeta::new(account.clone());
        older.version = 2;
        let kept = cache.publish(older).await;
        assert_eq!(kept.version, 3);
        assert_eq!(cache.get(&account).await.unwrap().version, 3);

        cache.invalidate(&account).await;
        assert!(cache.get(&account).await.is_none());
    }
}
