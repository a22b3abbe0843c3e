use rill_types::{SessionId, StreamId, TypeError};

/// Errors from stream provider and handle operations.
///
/// The handle performs no translation on provider failures -- callers see
/// these kinds verbatim at every layer.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The session id is not the active session for the stream, or it
    /// has expired.
    #[error("no active session {session_id} on stream {stream_id}")]
    InvalidSession {
        stream_id: StreamId,
        session_id: SessionId,
    },

    /// `open_session` exhausted its retry budget.
    #[error("timed out acquiring a session on stream {stream_id} after {waited_ms} ms")]
    SessionTimeout { stream_id: StreamId, waited_ms: u64 },

    /// Cancellation observed at a suspension point.
    #[error("operation cancelled")]
    Cancelled,

    #[error("stream {stream_id} has no item at version {version}")]
    VersionNotFound { stream_id: StreamId, version: u64 },

    #[error("stream {stream_id} has no item with idempotency key {key:?}")]
    IdempotencyNotFound { stream_id: StreamId, key: String },

    #[error("stream {stream_id} has no snapshot at version {version}")]
    SnapshotVersionNotFound { stream_id: StreamId, version: u64 },

    #[error("version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u64, actual: u64 },

    #[error("idempotency key {key:?} already present at version {existing_version}")]
    DuplicateIdempotency { key: String, existing_version: u64 },

    /// More than one file on disk matches a version or idempotency key.
    /// Fatal consistency error; never auto-repaired.
    #[error("duplicate files on disk for {what} in stream {stream_id}")]
    DuplicateOnDisk { stream_id: StreamId, what: String },

    /// Empty or malformed identifier, or a range out of bounds.
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// Required settings unset at construction.
    #[error("missing configuration: {0}")]
    ConfigMissing(String),

    /// Underlying storage failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Item encode/decode failure in the file backend.
    #[error("codec error: {0}")]
    Codec(String),
}

impl From<TypeError> for StreamError {
    fn from(err: TypeError) -> Self {
        Self::BadArgument(err.to_string())
    }
}

impl From<rill_codec::CodecError> for StreamError {
    fn from(err: rill_codec::CodecError) -> Self {
        match err {
            rill_codec::CodecError::Io(io) => Self::Io(io),
            other => Self::Codec(other.to_string()),
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StreamError>;
