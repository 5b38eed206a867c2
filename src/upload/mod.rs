//! Resumable chunked upload pipeline
//!
//! Flow:
//! 1. Client creates a session declaring a file name and chunk count
//! 2. Chunks arrive in any order, idempotent under retry, and are staged
//!    on disk while receipts are recorded in the session store
//! 3. Finalize validates the staged set, streams it in index order into
//!    the blob store, and marks the session COMPLETED
//! 4. Playback is served from the blob store under HTTP Range semantics

pub mod lifecycle;
pub mod reassembly;
pub mod staging;
pub mod types;

pub use lifecycle::Lifecycle;
pub use reassembly::{FinalizeOutcome, Reassembler};
pub use staging::ChunkStaging;
pub use types::*;
