//! Item wire-format contract for the rill stream store.
//!
//! The store treats item serialization as an opaque encode/decode of a
//! single item. Codecs advertise a short `format_tag` that the file backend
//! uses verbatim as the file extension, so tags must be filesystem-safe
//! (`[A-Za-z0-9_-]+`).
//!
//! [`JsonItemCodec`] is the default implementation; any payload that is
//! `Serialize + DeserializeOwned` works with it.

pub mod error;
pub mod json;
pub mod traits;

pub use error::{CodecError, CodecResult};
pub use json::JsonItemCodec;
pub use traits::{validate_format_tag, ItemCodec};
