//! High-level stream API for the rill stream store.
//!
//! A [`StreamHandle`] is the per-stream façade over a
//! [`StreamProvider`](rill_store::StreamProvider): append, slice reads,
//! snapshot-aware full reads, and snapshot management, with the session
//! protocol hidden behind lazy acquisition. A [`StreamStore`] vends handles
//! by stream id, one shared handle per id.
//!
//! Handles surface provider errors verbatim -- there is no error
//! translation layer, so callers can reason about the protocol directly
//! from [`StreamError`](rill_store::StreamError).

pub mod handle;
pub mod registry;

pub use handle::StreamHandle;
pub use registry::StreamStore;
