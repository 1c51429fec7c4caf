//! Upload Session Manager
//!
//! Manages upload sessions with:
//! - Ledger persistence to SQLite, keyed by file hash
//! - Automatic expiry of abandoned uploads

use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;

use super::chunk_store::ChunkStore;
use super::types::{SessionStatus, UploadError};
use crate::db::{SessionRecord, SessionRepository};

// ============================================================================
// Session Manager
// ============================================================================

/// Manages upload sessions
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionManagerInner>,
}

struct SessionManagerInner {
    db: SqlitePool,

    /// Inactivity after which an upload is abandoned
    ttl: chrono::Duration,
}

impl SessionManager {
    pub fn new(db: SqlitePool, ttl_hours: i64) -> Self {
        Self {
            inner: Arc::new(SessionManagerInner {
                db,
                ttl: chrono::Duration::hours(ttl_hours),
            }),
        }
    }

    fn repo(&self) -> SessionRepository<'_> {
        SessionRepository::new(&self.inner.db)
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Record that a chunk arrived
    pub async fn record_chunk(
        &self,
        file_hash: &str,
        file_name: Option<&str>,
        chunks_received: usize,
    ) -> Result<(), UploadError> {
        self.repo()
            .record_chunk(file_hash, file_name, chunks_received)
            .await?;
        Ok(())
    }

    /// Record a finished merge
    pub async fn mark_merged(
        &self,
        file_hash: &str,
        file_name: &str,
        size: u64,
        sha256: Option<&str>,
    ) -> Result<(), UploadError> {
        self.repo().mark_merged(file_hash, file_name, size, sha256).await?;

        tracing::info!(
            file_hash = %file_hash,
            file_name = %file_name,
            size = size,
            "Upload session completed"
        );

        Ok(())
    }

    /// Record a cancelled upload; returns false if no session existed
    pub async fn mark_cancelled(&self, file_hash: &str) -> Result<bool, UploadError> {
        let existed = self.repo().set_status(file_hash, SessionStatus::Cancelled).await?;
        if existed {
            tracing::info!(file_hash = %file_hash, "Upload session cancelled");
        }
        Ok(existed)
    }

    /// Get a session by file hash
    pub async fn get(&self, file_hash: &str) -> Result<Option<SessionRecord>, UploadError> {
        Ok(self.repo().get(file_hash).await?)
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Drop chunks of uploads idle for longer than the TTL
    ///
    /// Returns the number of sessions expired
    pub async fn cleanup_expired(&self, store: &ChunkStore) -> Result<usize, UploadError> {
        let cutoff = Utc::now() - self.inner.ttl;
        let stale = self.repo().list_stale(cutoff).await?;

        let mut count = 0;
        for session in stale {
            // Re-check under the exclusive lock so a chunk landing now keeps the session alive
            let file_hash = session.file_hash.as_str();
            let expired = store
                .cancel_if(file_hash, move || async move {
                    Ok(self.repo().expire_if_stale(file_hash, cutoff).await?)
                })
                .await?;
            let Some(removed) = expired else {
                continue;
            };

            tracing::debug!(
                file_hash = %session.file_hash,
                chunks = removed,
                "Expired idle upload session"
            );
            count += 1;
        }

        if count > 0 {
            tracing::info!(count = count, "Cleaned up expired upload sessions");
        }

        Ok(count)
    }

    /// Start background cleanup task
    pub fn start_cleanup_task(
        self,
        store: ChunkStore,
        interval: std::time::Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);

            loop {
                interval.tick().await;
                if let Err(e) = self.cleanup_expired(&store).await {
                    tracing::warn!("Session cleanup failed: {}", e);
                }
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_pool;
    use crate::upload::{ChunkUpload, StoreLimits};
    use axum::body::Bytes;
    use tempfile::TempDir;

    async fn setup(temp_dir: &TempDir, ttl_hours: i64) -> (SessionManager, ChunkStore) {
        let url = format!("sqlite://{}", temp_dir.path().join("test.db").display());
        let pool = create_pool(&url).await.unwrap();
        let store = ChunkStore::with_local_storage(temp_dir.path().join("uploads"), StoreLimits::default());
        (SessionManager::new(pool, ttl_hours), store)
    }

    fn chunk(file_hash: &str, chunk_name: &str) -> ChunkUpload {
        ChunkUpload {
            file_hash: file_hash.to_string(),
            chunk_name: chunk_name.to_string(),
            index: None,
            file_name: None,
            checksum: None,
            data: Bytes::from_static(b"chunk"),
        }
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let temp_dir = TempDir::new().unwrap();
        let (manager, _store) = setup(&temp_dir, 24).await;

        manager.record_chunk("abc", Some("a.bin"), 1).await.unwrap();
        let session = manager.get("abc").await.unwrap().unwrap();
        assert_eq!(session.status(), Some(SessionStatus::Uploading));

        manager.mark_merged("abc", "abc.bin", 10, Some("ff")).await.unwrap();
        let session = manager.get("abc").await.unwrap().unwrap();
        assert_eq!(session.status(), Some(SessionStatus::Merged));

        assert!(manager.mark_cancelled("abc").await.unwrap());
        assert!(!manager.mark_cancelled("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_expired_removes_idle_chunks() {
        let temp_dir = TempDir::new().unwrap();
        // Zero TTL: anything recorded before now is idle
        let (manager, store) = setup(&temp_dir, 0).await;

        store.store_chunk(&chunk("abc", "abc-0")).await.unwrap();
        manager.record_chunk("abc", None, 1).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        assert_eq!(manager.cleanup_expired(&store).await.unwrap(), 1);
        assert!(store.uploaded_chunks("abc").await.unwrap().is_empty());

        let session = manager.get("abc").await.unwrap().unwrap();
        assert_eq!(session.status(), Some(SessionStatus::Expired));

        assert_eq!(manager.cleanup_expired(&store).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_skips_session_touched_after_listing() {
        let temp_dir = TempDir::new().unwrap();
        let (manager, store) = setup(&temp_dir, 0).await;

        store.store_chunk(&chunk("abc", "abc-0")).await.unwrap();
        manager.record_chunk("abc", None, 1).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        // A chunk recorded after the cutoff was taken keeps the session
        let cutoff = Utc::now();
        let stale = manager.repo().list_stale(cutoff).await.unwrap();
        assert_eq!(stale.len(), 1);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        manager.record_chunk("abc", None, 2).await.unwrap();

        let ledger = &manager;
        let expired = store
            .cancel_if("abc", move || async move {
                Ok(ledger.repo().expire_if_stale("abc", cutoff).await?)
            })
            .await
            .unwrap();
        assert_eq!(expired, None);
        assert_eq!(store.uploaded_chunks("abc").await.unwrap().len(), 1);

        let session = manager.get("abc").await.unwrap().unwrap();
        assert_eq!(session.status(), Some(SessionStatus::Uploading));
    }

    #[tokio::test]
    async fn test_cleanup_keeps_active_sessions() {
        let temp_dir = TempDir::new().unwrap();
        let (manager, store) = setup(&temp_dir, 24).await;

        store.store_chunk(&chunk("abc", "abc-0")).await.unwrap();
        manager.record_chunk("abc", None, 1).await.unwrap();

        assert_eq!(manager.cleanup_expired(&store).await.unwrap(), 0);
        assert_eq!(store.uploaded_chunks("abc").await.unwrap().len(), 1);
    }
}
