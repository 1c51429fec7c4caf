//! Upload types for the verify / upload / merge protocol

use axum::body::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

// ============================================================================
// Verify Types
// ============================================================================

/// Request asking whether a file still needs uploading
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    /// Content hash of the complete file
    pub file_hash: String,

    /// Original file name (only its extension is used)
    pub filename: String,
}

/// Response to a verify request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    /// False when the merged file already exists
    pub should_upload: bool,

    /// Chunk names already received, omitted when nothing needs uploading
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_list: Option<Vec<String>>,
}

// ============================================================================
// Chunk Upload Types
// ============================================================================

/// A single chunk as received from the multipart form
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    /// Hash of the file this chunk belongs to
    pub file_hash: String,

    /// Client chunk name, `<anything>-<index>`
    pub chunk_name: String,

    /// Optional explicit index, must agree with the chunk name
    pub index: Option<usize>,

    /// Optional original file name
    pub file_name: Option<String>,

    /// Optional SHA-256 of the chunk bytes
    pub checksum: Option<String>,

    pub data: Bytes,
}

/// Response after uploading a chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadResponse {
    pub code: i32,
    pub message: String,
    pub file_hash: String,
    pub chunk_name: String,
    pub index: usize,
    pub size: usize,

    /// Number of chunks stored for this file so far
    pub chunks_received: usize,
}

/// Metadata for a stored chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub file_hash: String,
    pub chunk_name: String,
    pub index: usize,
    pub size: usize,
    pub stored_at: DateTime<Utc>,
}

// ============================================================================
// Merge Types
// ============================================================================

/// Request to merge all received chunks into the final file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    /// Original file name (only its extension is used)
    pub filename: String,

    /// File hash; older clients send it as `hash`
    #[serde(alias = "hash")]
    pub file_hash: String,

    /// Expected size of the merged file in bytes
    #[serde(default)]
    pub file_size: Option<u64>,

    /// Size every chunk but the last must have
    #[serde(default)]
    pub chunk_size: Option<u64>,

    /// Number of chunks the client produced
    #[serde(default)]
    pub chunk_count: Option<usize>,

    /// Expected SHA-256 of the merged file
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Response after merging
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResponse {
    pub code: i32,
    pub message: String,
    pub file_name: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    /// True when the file had already been merged by an earlier request
    pub already_merged: bool,
}

/// Checks applied while assembling the final file
#[derive(Debug, Clone, Default)]
pub struct AssembleChecks {
    pub file_size: Option<u64>,
    pub chunk_size: Option<u64>,
    pub sha256: Option<String>,
    pub max_file_size: u64,
}

/// Result of a successful assembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledFile {
    pub file_name: String,
    pub size: u64,
    pub sha256: String,
}

/// Outcome of a merge request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Chunks were assembled by this request
    Merged(AssembledFile),
    /// The final file already existed
    AlreadyMerged { file_name: String, size: u64 },
}

// ============================================================================
// Session Types
// ============================================================================

/// Session status as persisted in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Chunks are being received
    Uploading,
    /// File assembled and stored
    Merged,
    /// Cancelled by the client
    Cancelled,
    /// Chunks removed after inactivity
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Merged => "merged",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "uploading" => Some(Self::Uploading),
            "merged" => Some(Self::Merged),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

/// Session status response for `GET /uploads/:file_hash`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub file_hash: String,
    pub file_name: Option<String>,
    pub status: SessionStatus,
    pub uploaded_list: Vec<String>,
    pub chunks_received: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Invalid {kind}: {value:?}")]
    InvalidHash { kind: &'static str, value: String },

    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("Invalid chunk name: {0:?} (expected <name>-<index>)")]
    InvalidChunkName(String),

    #[error("Chunk index {given} does not match chunk name {chunk_name:?}")]
    ChunkIndexMismatch { chunk_name: String, given: usize },

    #[error("Missing form field: {0}")]
    MissingField(&'static str),

    #[error("Malformed multipart body: {0}")]
    Multipart(String),

    #[error("Chunk hash mismatch: expected {expected}, got {actual}")]
    ChunkHashMismatch { expected: String, actual: String },

    #[error("File hash mismatch: expected {expected}, got {actual}")]
    FileHashMismatch { expected: String, actual: String },

    #[error("File size mismatch: expected {expected} bytes, assembled {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Chunk {index} has {actual} bytes, expected {expected}")]
    ChunkSizeMismatch { index: usize, expected: u64, actual: u64 },

    #[error("Chunk too large: {size} bytes (max: {max})")]
    ChunkTooLarge { size: usize, max: usize },

    #[error("File too large: exceeds {max} bytes")]
    FileTooLarge { max: u64 },

    #[error("Duplicate chunk index: {0}")]
    DuplicateChunk(usize),

    #[error("Received {actual} chunks, client declared {expected}")]
    ChunkCountMismatch { expected: usize, actual: usize },

    #[error("Missing {count} chunks, starting with {first:?}")]
    MissingChunks { first: Vec<usize>, count: usize },

    #[error("File would need {count} chunks (max: {max})")]
    TooManyChunks { count: usize, max: usize },

    #[error("No chunks received for {0}")]
    NoChunks(String),

    #[error("File already merged: {0}")]
    AlreadyMerged(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Too many concurrent uploads (max: {max})")]
    Busy { max: usize },

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::InvalidHash { .. } => StatusCode::BAD_REQUEST,
            Self::InvalidFileName(_) => StatusCode::BAD_REQUEST,
            Self::InvalidChunkName(_) => StatusCode::BAD_REQUEST,
            Self::ChunkIndexMismatch { .. } => StatusCode::BAD_REQUEST,
            Self::MissingField(_) => StatusCode::BAD_REQUEST,
            Self::Multipart(_) => StatusCode::BAD_REQUEST,
            Self::ChunkHashMismatch { .. } => StatusCode::CONFLICT,
            Self::FileHashMismatch { .. } => StatusCode::CONFLICT,
            Self::SizeMismatch { .. } => StatusCode::CONFLICT,
            Self::ChunkSizeMismatch { .. } => StatusCode::CONFLICT,
            Self::ChunkTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::DuplicateChunk(_) => StatusCode::CONFLICT,
            Self::ChunkCountMismatch { .. } => StatusCode::CONFLICT,
            Self::MissingChunks { .. } => StatusCode::BAD_REQUEST,
            Self::TooManyChunks { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NoChunks(_) => StatusCode::NOT_FOUND,
            Self::AlreadyMerged(_) => StatusCode::CONFLICT,
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::Busy { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::StorageError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidHash { .. } => "INVALID_HASH",
            Self::InvalidFileName(_) => "INVALID_FILE_NAME",
            Self::InvalidChunkName(_) => "INVALID_CHUNK_NAME",
            Self::ChunkIndexMismatch { .. } => "CHUNK_INDEX_MISMATCH",
            Self::MissingField(_) => "MISSING_FIELD",
            Self::Multipart(_) => "MALFORMED_MULTIPART",
            Self::ChunkHashMismatch { .. } => "CHUNK_HASH_MISMATCH",
            Self::FileHashMismatch { .. } => "FILE_HASH_MISMATCH",
            Self::SizeMismatch { .. } => "SIZE_MISMATCH",
            Self::ChunkSizeMismatch { .. } => "CHUNK_SIZE_MISMATCH",
            Self::ChunkTooLarge { .. } => "CHUNK_TOO_LARGE",
            Self::FileTooLarge { .. } => "FILE_TOO_LARGE",
            Self::DuplicateChunk(_) => "DUPLICATE_CHUNK",
            Self::ChunkCountMismatch { .. } => "CHUNK_COUNT_MISMATCH",
            Self::MissingChunks { .. } => "MISSING_CHUNKS",
            Self::TooManyChunks { .. } => "TOO_MANY_CHUNKS",
            Self::NoChunks(_) => "NO_CHUNKS",
            Self::AlreadyMerged(_) => "ALREADY_MERGED",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::Busy { .. } => "BUSY",
            Self::StorageError(_) => "STORAGE_ERROR",
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<AppError> for UploadError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Database(e) => Self::DatabaseError(e.to_string()),
            AppError::Io(e) => Self::StorageError(e.to_string()),
            other => Self::InternalError(other.to_string()),
        }
    }
}

/// Map an I/O failure to a storage error
pub(crate) fn storage_error(err: std::io::Error) -> UploadError {
    UploadError::StorageError(err.to_string())
}
