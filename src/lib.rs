//! Chunked Upload Server Library
//!
//! Resumable large-file uploads: clients upload hash-named chunks, query
//! which chunks the server already holds, and ask for a merge once every
//! chunk has arrived. The server binary is in main.rs.
//!
//! # Modules
//!
//! - `upload`: chunk storage, merge planning, per-file locking, session ledger
//! - `routes`: the HTTP surface (`/verify`, `/upload`, `/merge`, `/uploads/:file_hash`)
//! - `db`: SQLite persistence for upload sessions

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
pub mod upload;
