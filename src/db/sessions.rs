//! Upload session ledger operations

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::error::Result;
use crate::upload::SessionStatus;

/// Fixed-width RFC 3339 timestamp, so stored values compare as strings
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Session ledger record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SessionRecord {
    pub file_hash: String,
    pub file_name: Option<String>,
    pub status: String,
    pub chunks_received: i64,
    pub final_size: Option<i64>,
    pub sha256: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl SessionRecord {
    pub fn status(&self) -> Option<SessionStatus> {
        SessionStatus::parse(&self.status)
    }
}

/// Session repository
pub struct SessionRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SessionRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Get the session for a file hash
    pub async fn get(&self, file_hash: &str) -> Result<Option<SessionRecord>> {
        let record = sqlx::query_as::<_, SessionRecord>(
            r#"
            SELECT file_hash, file_name, status, chunks_received, final_size,
                   sha256, created_at, updated_at
            FROM upload_sessions
            WHERE file_hash = ?
            "#,
        )
        .bind(file_hash)
        .fetch_optional(self.pool)
        .await?;

        Ok(record)
    }

    /// Record chunk progress, (re)opening the session as `uploading`
    ///
    /// A merged session is left as it is.
    pub async fn record_chunk(
        &self,
        file_hash: &str,
        file_name: Option<&str>,
        chunks_received: usize,
    ) -> Result<()> {
        let now = timestamp(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO upload_sessions
                (file_hash, file_name, status, chunks_received, created_at, updated_at)
            VALUES (?, ?, 'uploading', ?, ?, ?)
            ON CONFLICT(file_hash) DO UPDATE SET
                file_name = COALESCE(excluded.file_name, upload_sessions.file_name),
                status = 'uploading',
                chunks_received = excluded.chunks_received,
                final_size = NULL,
                sha256 = NULL,
                updated_at = excluded.updated_at
            WHERE upload_sessions.status != 'merged'
            "#,
        )
        .bind(file_hash)
        .bind(file_name)
        .bind(chunks_received as i64)
        .bind(now.clone())
        .bind(now)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Record a completed merge
    pub async fn mark_merged(
        &self,
        file_hash: &str,
        file_name: &str,
        size: u64,
        sha256: Option<&str>,
    ) -> Result<()> {
        let now = timestamp(Utc::now());

        sqlx::query(
            r#"
            INSERT INTO upload_sessions
                (file_hash, file_name, status, chunks_received, final_size, sha256, created_at, updated_at)
            VALUES (?, ?, 'merged', 0, ?, ?, ?, ?)
            ON CONFLICT(file_hash) DO UPDATE SET
                file_name = excluded.file_name,
                status = 'merged',
                chunks_received = 0,
                final_size = excluded.final_size,
                sha256 = COALESCE(excluded.sha256, upload_sessions.sha256),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(file_hash)
        .bind(file_name)
        .bind(size as i64)
        .bind(sha256)
        .bind(now.clone())
        .bind(now)
        .execute(self.pool)
        .await?;

        Ok(())
    }

    /// Set the status of an existing session; returns false if there is none
    pub async fn set_status(&self, file_hash: &str, status: SessionStatus) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE upload_sessions
            SET status = ?, chunks_received = 0, updated_at = ?
            WHERE file_hash = ?
            "#,
        )
        .bind(status.as_str())
        .bind(timestamp(Utc::now()))
        .bind(file_hash)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Uploading sessions with no activity since `cutoff`
    pub async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<SessionRecord>> {
        let records = sqlx::query_as::<_, SessionRecord>(
            r#"
            SELECT file_hash, file_name, status, chunks_received, final_size,
                   sha256, created_at, updated_at
            FROM upload_sessions
            WHERE status = 'uploading' AND updated_at < ?
            ORDER BY updated_at ASC
            "#,
        )
        .bind(timestamp(cutoff))
        .fetch_all(self.pool)
        .await?;

        Ok(records)
    }

    /// Mark a session expired if it is still stale; returns whether it was claimed
    pub async fn expire_if_stale(&self, file_hash: &str, cutoff: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE upload_sessions
            SET status = 'expired', chunks_received = 0, updated_at = ?
            WHERE file_hash = ? AND status = 'uploading' AND updated_at < ?
            "#,
        )
        .bind(timestamp(Utc::now()))
        .bind(file_hash)
        .bind(timestamp(cutoff))
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_pool;
    use tempfile::TempDir;

    async fn pool(temp_dir: &TempDir) -> SqlitePool {
        let url = format!("sqlite://{}", temp_dir.path().join("test.db").display());
        create_pool(&url).await.unwrap()
    }

    #[test]
    fn test_timestamp_is_fixed_width() {
        let whole = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z").unwrap().with_timezone(&Utc);
        assert_eq!(timestamp(whole), "2026-01-02T03:04:05.000000Z");
    }

    #[tokio::test]
    async fn test_record_chunk_upserts() {
        let temp_dir = TempDir::new().unwrap();
        let pool = pool(&temp_dir).await;
        let repo = SessionRepository::new(&pool);

        repo.record_chunk("abc", Some("movie.mp4"), 1).await.unwrap();
        repo.record_chunk("abc", None, 2).await.unwrap();

        let record = repo.get("abc").await.unwrap().unwrap();
        assert_eq!(record.file_name.as_deref(), Some("movie.mp4"));
        assert_eq!(record.status(), Some(SessionStatus::Uploading));
        assert_eq!(record.chunks_received, 2);

        assert!(repo.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mark_merged_and_set_status() {
        let temp_dir = TempDir::new().unwrap();
        let pool = pool(&temp_dir).await;
        let repo = SessionRepository::new(&pool);

        repo.record_chunk("abc", Some("a.txt"), 3).await.unwrap();
        repo.mark_merged("abc", "abc.txt", 42, Some("deadbeef")).await.unwrap();

        let record = repo.get("abc").await.unwrap().unwrap();
        assert_eq!(record.status(), Some(SessionStatus::Merged));
        assert_eq!(record.final_size, Some(42));
        assert_eq!(record.sha256.as_deref(), Some("deadbeef"));

        assert!(repo.set_status("abc", SessionStatus::Cancelled).await.unwrap());
        assert!(!repo.set_status("missing", SessionStatus::Cancelled).await.unwrap());
    }

    #[tokio::test]
    async fn test_record_chunk_keeps_merged_session() {
        let temp_dir = TempDir::new().unwrap();
        let pool = pool(&temp_dir).await;
        let repo = SessionRepository::new(&pool);

        repo.mark_merged("abc", "abc.txt", 42, Some("deadbeef")).await.unwrap();
        repo.record_chunk("abc", None, 1).await.unwrap();

        let record = repo.get("abc").await.unwrap().unwrap();
        assert_eq!(record.status(), Some(SessionStatus::Merged));
        assert_eq!(record.final_size, Some(42));
        assert_eq!(record.sha256.as_deref(), Some("deadbeef"));

        // Cancelled sessions still reopen
        repo.record_chunk("gone", None, 1).await.unwrap();
        repo.set_status("gone", SessionStatus::Cancelled).await.unwrap();
        repo.record_chunk("gone", None, 1).await.unwrap();
        let record = repo.get("gone").await.unwrap().unwrap();
        assert_eq!(record.status(), Some(SessionStatus::Uploading));
    }

    #[tokio::test]
    async fn test_stale_sessions() {
        let temp_dir = TempDir::new().unwrap();
        let pool = pool(&temp_dir).await;
        let repo = SessionRepository::new(&pool);

        repo.record_chunk("old", None, 1).await.unwrap();
        repo.record_chunk("merged", None, 1).await.unwrap();
        repo.mark_merged("merged", "merged.bin", 1, None).await.unwrap();

        let future = Utc::now() + chrono::Duration::seconds(5);
        let past = Utc::now() - chrono::Duration::hours(1);

        let stale = repo.list_stale(future).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].file_hash, "old");
        assert!(repo.list_stale(past).await.unwrap().is_empty());

        assert!(!repo.expire_if_stale("old", past).await.unwrap());
        assert!(repo.expire_if_stale("old", future).await.unwrap());
        let record = repo.get("old").await.unwrap().unwrap();
        assert_eq!(record.status(), Some(SessionStatus::Expired));
    }
}
