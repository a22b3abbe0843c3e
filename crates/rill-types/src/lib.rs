//! Foundation types for the rill stream store.
//!
//! This crate provides the item, identifier, and environment-contract types
//! used throughout rill. Every other rill crate depends on `rill-types`.
//!
//! # Key Types
//!
//! - [`Item`] — an immutable `(idempotency_key, version, payload)` triple
//! - [`ItemDraft`] — a not-yet-versioned item awaiting append
//! - [`StreamResult`] — the outcome of a stream read: items plus the stream version
//! - [`StreamId`] / [`SessionId`] — validated identifier newtypes
//! - [`Clock`] — wall-clock contract, with [`SystemClock`] as the default
//! - [`IdGenerator`] — opaque-id contract, with [`UuidGenerator`] (UUID v7) as the default

pub mod clock;
pub mod error;
pub mod ids;
pub mod item;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::TypeError;
pub use ids::{IdGenerator, SessionId, StreamId, UuidGenerator};
pub use item::{Item, ItemDraft, StreamResult};
