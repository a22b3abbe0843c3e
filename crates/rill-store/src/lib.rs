//! Storage backends for the rill stream store.
//!
//! This crate defines the low-level per-stream provider contract and its two
//! implementations. A provider owns the stream data, the idempotency index,
//! the snapshots, and the session table for its backend; everything above it
//! (the stream handle, the registry) is policy-free plumbing.
//!
//! # Backends
//!
//! All backends implement the [`StreamProvider`] trait:
//!
//! - [`InMemoryProvider`] — map-based store for tests and embedding
//! - [`FileProvider`] — one directory per stream, one file per item, with
//!   the version and idempotency key encoded in file names so lookups are
//!   directory scans rather than an index
//!
//! # Design Rules
//!
//! 1. Items are immutable once appended; versions are dense and 1-based.
//! 2. The session is the single gate: every operation except
//!    [`StreamProvider::open_session`] validates its session id against the
//!    backend's active-session table before touching data.
//! 3. At most one non-expired session exists per stream across all
//!    processes sharing a backend.
//! 4. Every suspending operation takes a cancellation token and surfaces
//!    [`StreamError::Cancelled`] when it fires at a suspension point.
//! 5. All I/O errors are propagated, never silently ignored.

pub mod config;
pub mod error;
pub mod file;
pub mod memory;
pub mod naming;
pub mod session;
pub mod traits;

pub use config::StoreConfig;
pub use error::{StoreResult, StreamError};
pub use file::FileProvider;
pub use memory::InMemoryProvider;
pub use session::SessionRecord;
pub use traits::StreamProvider;
