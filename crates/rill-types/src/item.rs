//! The immutable stream item and read-result types.

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::ids::key_char_ok;

const MAX_KEY_LEN: usize = 255;

fn validate_key(key: &str) -> Result<(), TypeError> {
    if key.is_empty() {
        return Err(TypeError::InvalidIdempotencyKey {
            key: key.into(),
            reason: "idempotency key must not be empty".into(),
        });
    }
    if key.len() > MAX_KEY_LEN {
        return Err(TypeError::InvalidIdempotencyKey {
            key: key.into(),
            reason: format!("idempotency key exceeds {MAX_KEY_LEN} bytes"),
        });
    }
    if let Some(bad) = key.chars().find(|c| !key_char_ok(*c)) {
        return Err(TypeError::InvalidIdempotencyKey {
            key: key.into(),
            reason: format!("contains forbidden character: {bad:?}"),
        });
    }
    Ok(())
}

/// An immutable stream item: `(idempotency_key, version, payload)`.
///
/// The idempotency key is unique within its stream; the version is the
/// item's dense 1-based position. Items are constructed once, at append
/// time, and never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item<T> {
    idempotency_key: String,
    version: u64,
    payload: T,
}

impl<T> Item<T> {
    /// Construct an item, validating the key and version.
    ///
    /// The key must be non-empty and filesystem-safe (`[A-Za-z0-9_-]`, at
    /// most 255 bytes); the version must be at least 1.
    pub fn new(
        idempotency_key: impl Into<String>,
        version: u64,
        payload: T,
    ) -> Result<Self, TypeError> {
        let idempotency_key = idempotency_key.into();
        validate_key(&idempotency_key)?;
        if version == 0 {
            return Err(TypeError::ZeroVersion);
        }
        Ok(Self {
            idempotency_key,
            version,
            payload,
        })
    }

    pub fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Consume the item, yielding its payload.
    pub fn into_payload(self) -> T {
        self.payload
    }
}

/// A not-yet-versioned item: what callers hand to an append.
///
/// The store assigns the version at append time; drafts carry only the
/// caller-chosen idempotency key and the payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemDraft<T> {
    idempotency_key: String,
    payload: T,
}

impl<T> ItemDraft<T> {
    /// Construct a draft, validating the key.
    pub fn new(idempotency_key: impl Into<String>, payload: T) -> Result<Self, TypeError> {
        let idempotency_key = idempotency_key.into();
        validate_key(&idempotency_key)?;
        Ok(Self {
            idempotency_key,
            payload,
        })
    }

    pub fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Promote the draft to a full item at the given version.
    pub fn into_item(self, version: u64) -> Result<Item<T>, TypeError> {
        Item::new(self.idempotency_key, version, self.payload)
    }
}

/// Outcome of a stream read: the items plus the stream's version.
///
/// `version` is the highest item version included, or the stream's
/// current version at read time when `items` is empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamResult<T> {
    pub items: Vec<Item<T>>,
    pub version: u64,
}

impl<T> StreamResult<T> {
    pub fn new(items: Vec<Item<T>>, version: u64) -> Self {
        Self { items, version }
    }

    /// An empty result for a stream at the given version.
    pub fn empty(version: u64) -> Self {
        Self {
            items: Vec::new(),
            version,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
