//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL)
        .execute(pool)
        .await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Upload sessions table (one row per file hash)
CREATE TABLE IF NOT EXISTS upload_sessions (
    file_hash TEXT PRIMARY KEY,
    file_name TEXT,
    status TEXT NOT NULL DEFAULT 'uploading',
    chunks_received INTEGER NOT NULL DEFAULT 0,
    final_size INTEGER,
    sha256 TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_upload_sessions_status ON upload_sessions(status, updated_at);
"#;
