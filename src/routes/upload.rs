//! Upload Routes
//!
//! HTTP endpoints for the chunked upload protocol.
//!
//! Endpoints:
//! - POST /verify - Check whether a file exists and which chunks are stored
//! - POST /upload - Upload one chunk (multipart)
//! - POST /merge - Assemble the final file
//! - GET /uploads/:file_hash - Get session status
//! - DELETE /uploads/:file_hash - Cancel upload

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::state::AppState;
use crate::upload::{
    ChunkUpload, ChunkUploadResponse, MergeOutcome, MergeRequest, MergeResponse, SessionStatus,
    SessionStatusResponse, UploadError, VerifyRequest, VerifyResponse,
};

/// Room for multipart boundaries and the small text fields
const MULTIPART_OVERHEAD: usize = 64 * 1024;

// ============================================================================
// Error Response
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "Upload request failed: {}", self);
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code().to_string(),
        });

        let mut response = (status, body).into_response();
        if matches!(self, UploadError::Busy { .. }) {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
pub fn router(state: &AppState) -> Router<AppState> {
    let body_limit = state.config().limits.max_chunk_size + MULTIPART_OVERHEAD;

    Router::new()
        .route("/verify", post(verify))
        .route(
            "/upload",
            post(upload_chunk).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/merge", post(merge))
        .route("/uploads/:file_hash", get(get_status).delete(cancel_upload))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /verify
///
/// Tell the client whether to upload, and which chunks it can skip.
async fn verify(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, UploadError> {
    let response = state
        .chunk_store()
        .verify(&request.file_hash, &request.filename)
        .await?;

    tracing::debug!(
        file_hash = %request.file_hash,
        should_upload = response.should_upload,
        uploaded = response.uploaded_list.as_ref().map(Vec::len).unwrap_or(0),
        "Verify"
    );

    Ok(Json(response))
}

/// POST /upload
///
/// Store a single chunk. Answers 503 when too many uploads are in flight.
async fn upload_chunk(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ChunkUploadResponse>, UploadError> {
    let _permit = state
        .upload_permits()
        .clone()
        .try_acquire_owned()
        .map_err(|_| UploadError::Busy {
            max: state.config().limits.max_concurrent_uploads,
        })?;

    let upload = read_chunk_form(&mut multipart, state.config().limits.max_chunk_size).await?;

    // Clients may omit `filename`, so the ledger decides whether the file is done
    if let Some(session) = state.sessions().get(&upload.file_hash).await? {
        if session.status() == Some(SessionStatus::Merged) {
            return Err(UploadError::AlreadyMerged(
                session.file_name.unwrap_or_else(|| upload.file_hash.clone()),
            ));
        }
    }

    let metadata = state.chunk_store().store_chunk(&upload).await?;

    let chunks_received = state
        .chunk_store()
        .uploaded_chunks(&upload.file_hash)
        .await?
        .len();

    state
        .sessions()
        .record_chunk(&upload.file_hash, upload.file_name.as_deref(), chunks_received)
        .await?;

    Ok(Json(ChunkUploadResponse {
        code: 0,
        message: "received file chunk".to_string(),
        file_hash: metadata.file_hash,
        chunk_name: metadata.chunk_name,
        index: metadata.index,
        size: metadata.size,
        chunks_received,
    }))
}

/// POST /merge
///
/// Assemble the received chunks into the final file.
async fn merge(
    State(state): State<AppState>,
    Json(request): Json<MergeRequest>,
) -> Result<Json<MergeResponse>, UploadError> {
    let outcome = state.chunk_store().merge(&request).await.map_err(|e| {
        tracing::warn!(file_hash = %request.file_hash, "Merge refused: {}", e);
        e
    })?;

    let response = match outcome {
        MergeOutcome::Merged(file) => {
            state
                .sessions()
                .mark_merged(&request.file_hash, &file.file_name, file.size, Some(&file.sha256))
                .await?;

            MergeResponse {
                code: 0,
                message: "file merged success".to_string(),
                file_name: file.file_name,
                size: file.size,
                sha256: Some(file.sha256),
                already_merged: false,
            }
        }
        MergeOutcome::AlreadyMerged { file_name, size } => {
            let sha256 = state
                .sessions()
                .get(&request.file_hash)
                .await?
                .and_then(|session| session.sha256);

            MergeResponse {
                code: 0,
                message: "file merged success".to_string(),
                file_name,
                size,
                sha256,
                already_merged: true,
            }
        }
    };

    Ok(Json(response))
}

/// GET /uploads/:file_hash
///
/// Get upload session status.
async fn get_status(
    State(state): State<AppState>,
    Path(file_hash): Path<String>,
) -> Result<Json<SessionStatusResponse>, UploadError> {
    let uploaded_list = state.chunk_store().uploaded_chunks(&file_hash).await?;
    let session = state.sessions().get(&file_hash).await?;

    let response = match session {
        None if uploaded_list.is_empty() => {
            return Err(UploadError::SessionNotFound(file_hash));
        }
        // Chunks on disk without a ledger row, e.g. written before a crash
        None => SessionStatusResponse {
            file_hash,
            file_name: None,
            status: SessionStatus::Uploading,
            chunks_received: uploaded_list.len(),
            uploaded_list,
            size: None,
            sha256: None,
            created_at: None,
            updated_at: None,
        },
        Some(session) => SessionStatusResponse {
            status: session.status().unwrap_or(SessionStatus::Uploading),
            file_hash,
            file_name: session.file_name,
            chunks_received: uploaded_list.len(),
            uploaded_list,
            size: session.final_size.map(|size| size as u64),
            sha256: session.sha256,
            created_at: Some(session.created_at),
            updated_at: Some(session.updated_at),
        },
    };

    Ok(Json(response))
}

/// DELETE /uploads/:file_hash
///
/// Cancel an upload and drop its chunks.
async fn cancel_upload(
    State(state): State<AppState>,
    Path(file_hash): Path<String>,
) -> Result<StatusCode, UploadError> {
    let session = state.sessions().get(&file_hash).await?;
    if let Some(session) = &session {
        if session.status() == Some(SessionStatus::Merged) {
            return Err(UploadError::AlreadyMerged(
                session.file_name.clone().unwrap_or_else(|| file_hash.clone()),
            ));
        }
    }

    let removed = state.chunk_store().cancel(&file_hash).await?;
    let existed = state.sessions().mark_cancelled(&file_hash).await?;

    if removed == 0 && !existed {
        return Err(UploadError::SessionNotFound(file_hash));
    }

    tracing::info!(file_hash = %file_hash, chunks = removed, "Upload cancelled");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Helpers
// ============================================================================

/// Collect the chunk form fields; the file part may come before or after
/// the text fields
async fn read_chunk_form(
    multipart: &mut Multipart,
    max_chunk_size: usize,
) -> Result<ChunkUpload, UploadError> {
    let to_error = |e: MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            UploadError::ChunkTooLarge {
                size: max_chunk_size + 1,
                max: max_chunk_size,
            }
        } else {
            UploadError::Multipart(e.to_string())
        }
    };

    let mut data = None;
    let mut chunk_name = None;
    let mut file_hash = None;
    let mut file_name = None;
    let mut index = None;
    let mut checksum = None;

    while let Some(field) = multipart.next_field().await.map_err(to_error)? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "chunk" => data = Some(field.bytes().await.map_err(to_error)?),
            "hash" => chunk_name = Some(field.text().await.map_err(to_error)?),
            "fileHash" => file_hash = Some(field.text().await.map_err(to_error)?),
            "filename" => file_name = Some(field.text().await.map_err(to_error)?),
            "chunkHash" => checksum = Some(field.text().await.map_err(to_error)?),
            "index" => {
                let text = field.text().await.map_err(to_error)?;
                let parsed = text
                    .trim()
                    .parse()
                    .map_err(|_| UploadError::InvalidChunkName(format!("index {}", text)))?;
                index = Some(parsed);
            }
            other => {
                tracing::debug!(field = %other, "Ignoring unknown form field");
            }
        }
    }

    Ok(ChunkUpload {
        file_hash: file_hash.ok_or(UploadError::MissingField("fileHash"))?,
        chunk_name: chunk_name.ok_or(UploadError::MissingField("hash"))?,
        index,
        file_name: file_name.filter(|name| !name.is_empty()),
        checksum: checksum.filter(|sum| !sum.is_empty()),
        data: data.ok_or(UploadError::MissingField("chunk"))?,
    })
}
