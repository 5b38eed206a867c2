//! MediaVault Server Library
//!
//! Resumable chunked uploads reassembled into a range-addressable blob
//! store, served under HTTP Range semantics. The crate is a library so
//! integration tests can drive the real router; the server binary is in
//! main.rs.
//!
//! # Modules
//!
//! - `upload`: staging, reassembly, and lifecycle of upload sessions
//! - `storage`: blob store backends (local filesystem, S3, legacy files)
//! - `db`: durable session records in SQLite
//! - `routes`: HTTP surface

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;
pub mod storage;
pub mod upload;
