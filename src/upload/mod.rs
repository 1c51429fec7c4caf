//! Chunked Upload Module
//!
//! Implements resumable large file uploads with:
//! - Per-chunk storage keyed by file hash and chunk name
//! - Index-ordered, integrity-checked merges with atomic rename
//! - A session ledger that survives restarts
//!
//! Protocol Flow:
//! 1. Client asks `/verify` whether the file exists and which chunks are stored
//! 2. Client uploads the missing chunks to `/upload`
//! 3. Client asks `/merge` to assemble the final file

pub mod chunk_store;
pub mod locks;
pub mod naming;
pub mod session;
pub mod types;

pub use chunk_store::{compute_hash, plan_merge, ChunkStorage, ChunkStore, LocalChunkStorage, StoreLimits};
pub use locks::FileLocks;
pub use session::SessionManager;
pub use types::*;
