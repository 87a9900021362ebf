//! Chunked Upload Module
//!
//! Lets large files slip past proxy and body-size limits by sending them in
//! pieces, then rebuilds them into what an ordinary upload handler expects.
//!
//! Protocol Flow:
//! 1. `start`: client declares every file (name, size, chunk count), gets a session ID
//! 2. `chunk`: client sends each chunk, addressed by file and chunk ordinal
//! 3. `end`: server concatenates the chunks and runs the downstream handler
//!
//! Abandoned sessions are swept lazily whenever a new session starts.

pub mod handler;
pub mod reassembler;
pub mod receiver;
pub mod registrar;
pub mod service;
pub mod session;
pub mod sweeper;
pub mod types;

pub use handler::{AllowAll, Authorizer, BearerTokenAuthorizer, CompletedUpload, StoreFilesHandler, UploadHandler};
pub use reassembler::{EndRequest, Finalized, Reassembler};
pub use receiver::ChunkReceiver;
pub use registrar::{parse_manifest, Registrar};
pub use service::{BigUpload, UploadOptions};
pub use session::{MemorySessionStore, SessionStore};
pub use sweeper::Sweeper;
pub use types::*;
