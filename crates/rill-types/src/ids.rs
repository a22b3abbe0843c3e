//! Identifier newtypes and the opaque-id generation contract.
//!
//! Stream ids become directory names and idempotency keys become filename
//! segments in the file backend, so both are validated against a
//! filesystem-safe grammar at construction. Session ids are opaque; the
//! store only requires them to be non-empty and collision-resistant.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Characters permitted in a stream id. Stream ids are single path
/// segments on the target filesystem.
fn stream_id_char_ok(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-'
}

/// Characters permitted in an idempotency key. Keys are embedded between
/// dots in item file names, so `.` is excluded from the alphabet.
pub(crate) fn key_char_ok(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

const MAX_ID_LEN: usize = 255;

/// Identifier of a stream: a validated, filesystem-safe path segment.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StreamId(String);

impl StreamId {
    /// Validate and wrap a stream id.
    ///
    /// Valid stream ids are non-empty, at most 255 bytes, contain only
    /// `[A-Za-z0-9._-]`, and do not begin with a dot (which also rules out
    /// `.` and `..` traversal segments).
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        if id.is_empty() {
            return Err(TypeError::InvalidStreamId {
                id,
                reason: "stream id must not be empty".into(),
            });
        }
        if id.len() > MAX_ID_LEN {
            return Err(TypeError::InvalidStreamId {
                id,
                reason: format!("stream id exceeds {MAX_ID_LEN} bytes"),
            });
        }
        if id.starts_with('.') {
            return Err(TypeError::InvalidStreamId {
                id,
                reason: "stream id must not begin with '.'".into(),
            });
        }
        if let Some(bad) = id.chars().find(|c| !stream_id_char_ok(*c)) {
            return Err(TypeError::InvalidStreamId {
                id,
                reason: format!("contains forbidden character: {bad:?}"),
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StreamId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StreamId> for String {
    fn from(id: StreamId) -> Self {
        id.0
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({})", self.0)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque identifier of a session lease on a stream.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Wrap a session id. The only structural requirement is non-emptiness;
    /// collision resistance is the generator's responsibility.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        if id.is_empty() {
            return Err(TypeError::InvalidSessionId {
                reason: "session id must not be empty".into(),
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short: String = self.0.chars().take(8).collect();
        write!(f, "SessionId({short}…)")
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of opaque, collision-resistant identifier strings.
///
/// Used by providers to mint session ids. Implementations must be cheap to
/// call and safe to share across tasks.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Default [`IdGenerator`]: time-ordered UUID v7 strings.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::now_v7().to_string()
    }
}
