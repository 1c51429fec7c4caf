//! Chunk Store
//!
//! Storage for uploaded chunks and the merged files built from them.
//! Chunks for one file live in their own directory until a merge
//! assembles them, in index order, into the final file.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::locks::FileLocks;
use super::naming::{chunk_index, final_file_name, validate_hash};
use super::types::{
    storage_error, AssembleChecks, AssembledFile, ChunkMetadata, ChunkUpload, MergeOutcome,
    MergeRequest, UploadError, VerifyResponse,
};

const PART_SUFFIX: &str = ".part";
const MERGING_SUFFIX: &str = ".merging";

/// Missing indices listed in a `MissingChunks` error
const MISSING_PREVIEW: usize = 32;

// ============================================================================
// Chunk Storage Trait
// ============================================================================

/// Trait for chunk storage backends
#[async_trait::async_trait]
pub trait ChunkStorage: Send + Sync {
    /// Store a chunk, replacing any earlier copy with the same name
    async fn store_chunk(
        &self,
        file_hash: &str,
        chunk_name: &str,
        data: &[u8],
    ) -> Result<(), UploadError>;

    /// Names of completed chunks for a file, sorted by index
    async fn list_chunks(&self, file_hash: &str) -> Result<Vec<String>, UploadError>;

    /// Read a single chunk
    async fn read_chunk(&self, file_hash: &str, chunk_name: &str) -> Result<Vec<u8>, UploadError>;

    /// Delete all chunks for a file
    async fn delete_chunks(&self, file_hash: &str) -> Result<usize, UploadError>;

    /// Size of a merged file, `None` if it does not exist
    async fn file_size(&self, file_name: &str) -> Result<Option<u64>, UploadError>;

    /// Concatenate `chunk_names` in order into `file_name`
    ///
    /// The final file only appears once every check has passed; on failure
    /// no partial output is left behind and the chunks are untouched.
    async fn assemble_file(
        &self,
        file_hash: &str,
        chunk_names: &[String],
        file_name: &str,
        checks: &AssembleChecks,
    ) -> Result<AssembledFile, UploadError>;

    /// Remove in-flight temp files left by an interrupted process
    async fn sweep_temp_files(&self) -> Result<usize, UploadError>;
}

// ============================================================================
// Chunk Store (Main Implementation)
// ============================================================================

/// Limits enforced by the chunk store
#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    pub max_chunk_size: usize,
    pub max_file_size: u64,
    pub max_chunks: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_chunk_size: crate::config::DEFAULT_MAX_CHUNK_SIZE,
            max_file_size: crate::config::DEFAULT_MAX_FILE_SIZE,
            max_chunks: crate::config::DEFAULT_MAX_CHUNKS,
        }
    }
}

/// Main chunk store with pluggable backends
#[derive(Clone)]
pub struct ChunkStore {
    inner: Arc<ChunkStoreInner>,
}

struct ChunkStoreInner {
    backend: Box<dyn ChunkStorage>,
    locks: FileLocks,
    limits: StoreLimits,
}

impl ChunkStore {
    pub fn new(backend: Box<dyn ChunkStorage>, limits: StoreLimits) -> Self {
        Self {
            inner: Arc::new(ChunkStoreInner {
                backend,
                locks: FileLocks::new(),
                limits,
            }),
        }
    }

    /// Create with local filesystem storage
    pub fn with_local_storage(base_path: PathBuf, limits: StoreLimits) -> Self {
        Self::new(Box::new(LocalChunkStorage::new(base_path)), limits)
    }

    /// Report whether a file still needs uploading, and which chunks exist
    pub async fn verify(&self, file_hash: &str, filename: &str) -> Result<VerifyResponse, UploadError> {
        let file_name = final_file_name(file_hash, filename)?;

        if self.inner.backend.file_size(&file_name).await?.is_some() {
            return Ok(VerifyResponse {
                should_upload: false,
                uploaded_list: None,
            });
        }

        let uploaded = self.inner.backend.list_chunks(file_hash).await?;
        Ok(VerifyResponse {
            should_upload: true,
            uploaded_list: Some(uploaded),
        })
    }

    /// Chunk names received so far
    pub async fn uploaded_chunks(&self, file_hash: &str) -> Result<Vec<String>, UploadError> {
        validate_hash("file hash", file_hash)?;
        self.inner.backend.list_chunks(file_hash).await
    }

    /// Validate and store a chunk
    pub async fn store_chunk(&self, upload: &ChunkUpload) -> Result<ChunkMetadata, UploadError> {
        validate_hash("file hash", &upload.file_hash)?;
        validate_hash("chunk name", &upload.chunk_name)?;

        let index = chunk_index(&upload.chunk_name)?;
        if let Some(given) = upload.index {
            if given != index {
                return Err(UploadError::ChunkIndexMismatch {
                    chunk_name: upload.chunk_name.clone(),
                    given,
                });
            }
        }

        let max_chunks = self.inner.limits.max_chunks;
        if index >= max_chunks {
            return Err(UploadError::TooManyChunks {
                count: index.saturating_add(1),
                max: max_chunks,
            });
        }

        let max = self.inner.limits.max_chunk_size;
        if upload.data.len() > max {
            return Err(UploadError::ChunkTooLarge {
                size: upload.data.len(),
                max,
            });
        }

        if let Some(expected) = &upload.checksum {
            let actual = compute_hash(&upload.data);
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(UploadError::ChunkHashMismatch {
                    expected: expected.clone(),
                    actual,
                });
            }
        }

        let _guard = self.inner.locks.shared(&upload.file_hash).await;

        if let Some(filename) = &upload.file_name {
            let file_name = final_file_name(&upload.file_hash, filename)?;
            if self.inner.backend.file_size(&file_name).await?.is_some() {
                return Err(UploadError::AlreadyMerged(file_name));
            }
        }

        self.inner
            .backend
            .store_chunk(&upload.file_hash, &upload.chunk_name, &upload.data)
            .await?;

        tracing::debug!(
            file_hash = %upload.file_hash,
            chunk_name = %upload.chunk_name,
            index = index,
            size = upload.data.len(),
            "Chunk stored"
        );

        Ok(ChunkMetadata {
            file_hash: upload.file_hash.clone(),
            chunk_name: upload.chunk_name.clone(),
            index,
            size: upload.data.len(),
            stored_at: Utc::now(),
        })
    }

    /// Merge all received chunks into the final file
    pub async fn merge(&self, request: &MergeRequest) -> Result<MergeOutcome, UploadError> {
        let file_name = final_file_name(&request.file_hash, &request.filename)?;

        let max_chunks = self.inner.limits.max_chunks;
        if let Some(count) = request.chunk_count.filter(|&count| count > max_chunks) {
            return Err(UploadError::TooManyChunks {
                count,
                max: max_chunks,
            });
        }

        let _guard = self.inner.locks.exclusive(&request.file_hash).await;

        if let Some(size) = self.inner.backend.file_size(&file_name).await? {
            let stale = self.inner.backend.delete_chunks(&request.file_hash).await?;
            tracing::info!(
                file_hash = %request.file_hash,
                file_name = %file_name,
                stale_chunks = stale,
                "File already merged"
            );
            return Ok(MergeOutcome::AlreadyMerged { file_name, size });
        }

        let chunks = self.inner.backend.list_chunks(&request.file_hash).await?;
        if chunks.is_empty() {
            return Err(UploadError::NoChunks(request.file_hash.clone()));
        }

        let ordered = plan_merge(chunks, request.chunk_count)?;

        tracing::info!(
            file_hash = %request.file_hash,
            file_name = %file_name,
            chunks = ordered.len(),
            "Assembling file from chunks"
        );

        let checks = AssembleChecks {
            file_size: request.file_size,
            chunk_size: request.chunk_size,
            sha256: request.sha256.clone(),
            max_file_size: self.inner.limits.max_file_size,
        };

        let assembled = self
            .inner
            .backend
            .assemble_file(&request.file_hash, &ordered, &file_name, &checks)
            .await?;

        // The file is in place; leftover chunks are removed by the next merge
        if let Err(e) = self.inner.backend.delete_chunks(&request.file_hash).await {
            tracing::warn!(
                file_hash = %request.file_hash,
                "Failed to remove chunks after merge: {}",
                e
            );
        }

        tracing::info!(
            file_name = %assembled.file_name,
            size = assembled.size,
            sha256 = %assembled.sha256,
            "File merged"
        );

        Ok(MergeOutcome::Merged(assembled))
    }

    /// Drop every chunk received for a file
    pub async fn cancel(&self, file_hash: &str) -> Result<usize, UploadError> {
        validate_hash("file hash", file_hash)?;
        let _guard = self.inner.locks.exclusive(file_hash).await;
        self.inner.backend.delete_chunks(file_hash).await
    }

    /// Drop every chunk for a file if `confirm` still agrees once no chunk
    /// write is in flight
    ///
    /// Returns `None` when `confirm` declined.
    pub async fn cancel_if<F, Fut>(
        &self,
        file_hash: &str,
        confirm: F,
    ) -> Result<Option<usize>, UploadError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<bool, UploadError>>,
    {
        validate_hash("file hash", file_hash)?;
        let _guard = self.inner.locks.exclusive(file_hash).await;

        if !confirm().await? {
            return Ok(None);
        }
        self.inner.backend.delete_chunks(file_hash).await.map(Some)
    }

    /// Clean up temp files from an interrupted run
    pub async fn recover(&self) -> Result<usize, UploadError> {
        let removed = self.inner.backend.sweep_temp_files().await?;
        if removed > 0 {
            tracing::info!(count = removed, "Removed interrupted chunk and merge files");
        }
        Ok(removed)
    }
}

/// Order chunk names by index and check the sequence is complete
///
/// Indices must form `0..n` without duplicates, and `n` must equal
/// `expected_count` when one is given.
pub fn plan_merge(
    chunk_names: Vec<String>,
    expected_count: Option<usize>,
) -> Result<Vec<String>, UploadError> {
    let mut by_index = BTreeMap::new();
    for name in chunk_names {
        let index = chunk_index(&name)?;
        if by_index.insert(index, name).is_some() {
            return Err(UploadError::DuplicateChunk(index));
        }
    }

    let highest = match by_index.keys().next_back() {
        Some(&index) => index.checked_add(1).ok_or(UploadError::TooManyChunks {
            count: usize::MAX,
            max: usize::MAX - 1,
        })?,
        None => 0,
    };
    let total = expected_count.unwrap_or(0).max(highest);

    // Every index is below `total`, so the gap count is exact
    let count = total - by_index.len();
    if count > 0 {
        let first = (0..total)
            .filter(|i| !by_index.contains_key(i))
            .take(MISSING_PREVIEW)
            .collect();
        return Err(UploadError::MissingChunks { first, count });
    }

    if let Some(expected) = expected_count {
        if by_index.len() > expected {
            return Err(UploadError::ChunkCountMismatch {
                expected,
                actual: by_index.len(),
            });
        }
    }

    Ok(by_index.into_values().collect())
}

// ============================================================================
// Local Filesystem Storage
// ============================================================================

/// Local filesystem chunk storage
///
/// ```text
/// <base>/files/<fileHash><ext>
/// <base>/chunks/<fileHash>/<chunkName>
/// ```
pub struct LocalChunkStorage {
    base_path: PathBuf,
}

impl LocalChunkStorage {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn files_dir(&self) -> PathBuf {
        self.base_path.join("files")
    }

    fn chunks_root(&self) -> PathBuf {
        self.base_path.join("chunks")
    }

    fn chunk_dir(&self, file_hash: &str) -> PathBuf {
        self.chunks_root().join(file_hash)
    }

    fn chunk_path(&self, file_hash: &str, chunk_name: &str) -> PathBuf {
        self.chunk_dir(file_hash).join(chunk_name)
    }

    fn file_path(&self, file_name: &str) -> PathBuf {
        self.files_dir().join(file_name)
    }

    async fn write_assembled(
        &self,
        file_hash: &str,
        chunk_names: &[String],
        temp_path: &Path,
        checks: &AssembleChecks,
    ) -> Result<(u64, String), UploadError> {
        let file = tokio::fs::File::create(temp_path).await.map_err(storage_error)?;
        let mut writer = tokio::io::BufWriter::new(file);
        let mut hasher = Sha256::new();
        let mut size: u64 = 0;
        let last = chunk_names.len().saturating_sub(1);

        for (i, name) in chunk_names.iter().enumerate() {
            let data = self.read_chunk(file_hash, name).await?;
            let len = data.len() as u64;

            if let Some(expected) = checks.chunk_size {
                let fits = if i < last { len == expected } else { len <= expected };
                if !fits {
                    return Err(UploadError::ChunkSizeMismatch {
                        index: i,
                        expected,
                        actual: len,
                    });
                }
            }

            size += len;
            if size > checks.max_file_size {
                return Err(UploadError::FileTooLarge {
                    max: checks.max_file_size,
                });
            }

            hasher.update(&data);
            writer.write_all(&data).await.map_err(storage_error)?;
        }

        writer.flush().await.map_err(storage_error)?;
        writer.into_inner().sync_all().await.map_err(storage_error)?;

        let sha256 = hex::encode(hasher.finalize());

        if let Some(expected) = checks.file_size {
            if expected != size {
                return Err(UploadError::SizeMismatch {
                    expected,
                    actual: size,
                });
            }
        }

        if let Some(expected) = &checks.sha256 {
            if !expected.eq_ignore_ascii_case(&sha256) {
                return Err(UploadError::FileHashMismatch {
                    expected: expected.clone(),
                    actual: sha256,
                });
            }
        }

        Ok((size, sha256))
    }
}

#[async_trait::async_trait]
impl ChunkStorage for LocalChunkStorage {
    async fn store_chunk(
        &self,
        file_hash: &str,
        chunk_name: &str,
        data: &[u8],
    ) -> Result<(), UploadError> {
        let dir = self.chunk_dir(file_hash);
        tokio::fs::create_dir_all(&dir).await.map_err(storage_error)?;

        // Write beside the target and rename so readers never see half a chunk
        let temp_path = dir.join(format!(".{}.{}{}", chunk_name, Uuid::new_v4(), PART_SUFFIX));
        if let Err(e) = tokio::fs::write(&temp_path, data).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(storage_error(e));
        }

        tokio::fs::rename(&temp_path, self.chunk_path(file_hash, chunk_name))
            .await
            .map_err(storage_error)
    }

    async fn list_chunks(&self, file_hash: &str) -> Result<Vec<String>, UploadError> {
        let dir = self.chunk_dir(file_hash);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_error(e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(storage_error)? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            names.push(name);
        }

        names.sort_by_key(|name| (chunk_index(name).unwrap_or(usize::MAX), name.clone()));
        Ok(names)
    }

    async fn read_chunk(&self, file_hash: &str, chunk_name: &str) -> Result<Vec<u8>, UploadError> {
        let path = self.chunk_path(file_hash, chunk_name);
        tokio::fs::read(&path)
            .await
            .map_err(|e| UploadError::StorageError(format!("Failed to read chunk {}: {}", chunk_name, e)))
    }

    async fn delete_chunks(&self, file_hash: &str) -> Result<usize, UploadError> {
        let dir = self.chunk_dir(file_hash);
        let count = match tokio::fs::read_dir(&dir).await {
            Ok(mut entries) => {
                let mut count = 0;
                while let Some(entry) = entries.next_entry().await.map_err(storage_error)? {
                    if !entry.file_name().to_string_lossy().starts_with('.') {
                        count += 1;
                    }
                }
                count
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(storage_error(e)),
        };

        tokio::fs::remove_dir_all(&dir).await.map_err(storage_error)?;
        Ok(count)
    }

    async fn file_size(&self, file_name: &str) -> Result<Option<u64>, UploadError> {
        match tokio::fs::metadata(self.file_path(file_name)).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_error(e)),
        }
    }

    async fn assemble_file(
        &self,
        file_hash: &str,
        chunk_names: &[String],
        file_name: &str,
        checks: &AssembleChecks,
    ) -> Result<AssembledFile, UploadError> {
        let files_dir = self.files_dir();
        tokio::fs::create_dir_all(&files_dir).await.map_err(storage_error)?;

        let temp_path = files_dir.join(format!(".{}.{}{}", file_name, Uuid::new_v4(), MERGING_SUFFIX));

        match self.write_assembled(file_hash, chunk_names, &temp_path, checks).await {
            Ok((size, sha256)) => {
                if let Err(e) = tokio::fs::rename(&temp_path, self.file_path(file_name)).await {
                    let _ = tokio::fs::remove_file(&temp_path).await;
                    return Err(storage_error(e));
                }
                Ok(AssembledFile {
                    file_name: file_name.to_string(),
                    size,
                    sha256,
                })
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&temp_path).await;
                Err(e)
            }
        }
    }

    async fn sweep_temp_files(&self) -> Result<usize, UploadError> {
        let mut removed = remove_temp_entries(&self.files_dir(), MERGING_SUFFIX).await?;

        let mut chunk_dirs = match tokio::fs::read_dir(self.chunks_root()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
            Err(e) => return Err(storage_error(e)),
        };

        while let Some(entry) = chunk_dirs.next_entry().await.map_err(storage_error)? {
            if entry.file_type().await.map_err(storage_error)?.is_dir() {
                removed += remove_temp_entries(&entry.path(), PART_SUFFIX).await?;
            }
        }

        Ok(removed)
    }
}

async fn remove_temp_entries(dir: &Path, suffix: &str) -> Result<usize, UploadError> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(storage_error(e)),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await.map_err(storage_error)? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') && name.ends_with(suffix) {
            tokio::fs::remove_file(entry.path()).await.map_err(storage_error)?;
            removed += 1;
        }
    }

    Ok(removed)
}

// ============================================================================
// Helpers
// ============================================================================

/// Compute SHA-256 hash of data
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ============================================================================
// Tests
// ============================================================================
