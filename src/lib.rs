//! Big Upload Library
//!
//! Resumable chunked uploads for files that would otherwise hit proxy or
//! request body limits. The server side rebuilds the files and hands them to
//! an ordinary upload handler; the client side plans and sends the chunks.
//!
//! # Modules
//!
//! - `upload`: Protocol phases (start, chunk, end) and the cleanup sweeper
//! - `storage`: Blob backends for chunk storage (local disk, S3, memory)
//! - `db`: SQLite session store
//! - `routes`: The axum endpoint that exposes the protocol
//! - `client`: Chunk planner and HTTP client

pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
pub mod storage;
pub mod upload;

pub use error::{Result, StorageError, UploadError};
