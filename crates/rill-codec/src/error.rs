/// Errors from item encoding and decoding.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),

    /// I/O failure while writing to a sink or reading from a source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid format tag {tag:?}: {reason}")]
    InvalidFormatTag { tag: String, reason: String },
}

/// Result alias for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;
