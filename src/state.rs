//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::Semaphore;

use crate::config::Config;
use crate::error::AppError;
use crate::upload::{ChunkStore, SessionManager, StoreLimits, UploadError};

/// Error type for state initialization
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to prepare upload directory: {0}")]
    UploadDir(#[from] std::io::Error),

    #[error("Failed to open session ledger: {0}")]
    Database(#[from] AppError),

    #[error("Failed to recover interrupted uploads: {0}")]
    Recovery(#[from] UploadError),
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    pub config: Config,
    pub db: SqlitePool,
    pub chunk_store: ChunkStore,
    pub sessions: SessionManager,
    pub upload_permits: Arc<Semaphore>,
}

impl AppState {
    /// Create application state from an open ledger pool
    pub fn new(config: Config, db: SqlitePool) -> Self {
        let chunk_store = ChunkStore::with_local_storage(
            config.storage.upload_dir.clone(),
            StoreLimits {
                max_chunk_size: config.limits.max_chunk_size,
                max_file_size: config.limits.max_file_size,
                max_chunks: config.limits.max_chunks,
            },
        );
        let sessions = SessionManager::new(db.clone(), config.sessions.ttl_hours);
        let upload_permits = Arc::new(Semaphore::new(config.limits.max_concurrent_uploads.max(1)));

        Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                chunk_store,
                sessions,
                upload_permits,
            }),
        }
    }

    /// Prepare the upload directory, open the ledger and sweep leftovers
    /// from an interrupted run
    pub async fn connect(config: Config) -> Result<Self, StateError> {
        tokio::fs::create_dir_all(&config.storage.upload_dir).await?;

        let db = crate::db::create_pool(&config.database.url).await?;
        let state = Self::new(config, db);
        state.chunk_store().recover().await?;

        Ok(state)
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the database pool
    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    /// Get the chunk store
    pub fn chunk_store(&self) -> &ChunkStore {
        &self.inner.chunk_store
    }

    /// Get the session manager
    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    /// Permits bounding concurrent chunk uploads
    pub fn upload_permits(&self) -> &Arc<Semaphore> {
        &self.inner.upload_permits
    }
}
