//! Per-file lock registry
//!
//! Chunk writes for a file hash take a shared guard; merge, cancel and
//! expiry take an exclusive one. Entries that nobody holds are pruned on
//! the next acquisition.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

#[derive(Clone, Default)]
pub struct FileLocks {
    inner: Arc<Mutex<HashMap<String, Arc<RwLock<()>>>>>,
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a shared guard for `file_hash`
    pub async fn shared(&self, file_hash: &str) -> OwnedRwLockReadGuard<()> {
        self.entry(file_hash).read_owned().await
    }

    /// Acquire an exclusive guard for `file_hash`
    pub async fn exclusive(&self, file_hash: &str) -> OwnedRwLockWriteGuard<()> {
        self.entry(file_hash).write_owned().await
    }

    /// Number of tracked file hashes
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, file_hash: &str) -> Arc<RwLock<()>> {
        let mut locks = self.inner.lock();
        // Held guards keep a clone of the Arc alive
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(file_hash.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_shared_guards_coexist() {
        let locks = FileLocks::new();
        let _a = locks.shared("abc").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.shared("abc")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_exclusive_waits_for_shared() {
        let locks = FileLocks::new();
        let shared = locks.shared("abc").await;

        let blocked = tokio::time::timeout(Duration::from_millis(50), locks.exclusive("abc")).await;
        assert!(blocked.is_err());

        drop(shared);
        let acquired = tokio::time::timeout(Duration::from_millis(100), locks.exclusive("abc")).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn test_distinct_hashes_do_not_block() {
        let locks = FileLocks::new();
        let _held = locks.exclusive("abc").await;
        let other = tokio::time::timeout(Duration::from_millis(100), locks.exclusive("def")).await;
        assert!(other.is_ok());
    }

    #[tokio::test]
    async fn test_released_entries_are_pruned() {
        let locks = FileLocks::new();
        {
            let _a = locks.exclusive("a").await;
            let _b = locks.shared("b").await;
            assert_eq!(locks.len(), 2);
        }
        let _c = locks.shared("c").await;
        assert_eq!(locks.len(), 1);
    }
}
