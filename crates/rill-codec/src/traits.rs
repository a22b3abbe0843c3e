use std::io::{Read, Write};

use rill_types::Item;

use crate::error::{CodecError, CodecResult};

/// Wire format for a single stream item.
///
/// Implementations must be deterministic enough that an encoded item
/// decodes back to an equal item; the store relies on nothing else about
/// the byte layout. The `format_tag` names the format in item file
/// extensions and must be filesystem-safe.
pub trait ItemCodec<T>: Send + Sync {
    /// Encode an item to a byte buffer.
    fn encode(&self, item: &Item<T>) -> CodecResult<Vec<u8>>;

    /// Decode an item from a byte buffer.
    fn decode(&self, bytes: &[u8]) -> CodecResult<Item<T>>;

    /// Encode an item into a sink.
    ///
    /// Default implementation encodes to a buffer and writes it out.
    /// Codecs with streaming encoders may override.
    fn encode_to(&self, sink: &mut dyn Write, item: &Item<T>) -> CodecResult<()> {
        let bytes = self.encode(item)?;
        sink.write_all(&bytes)?;
        Ok(())
    }

    /// Decode an item from a source, reading it to the end.
    fn decode_from(&self, source: &mut dyn Read) -> CodecResult<Item<T>> {
        let mut bytes = Vec::new();
        source.read_to_end(&mut bytes)?;
        self.decode(&bytes)
    }

    /// Short format name, used verbatim as the item file extension.
    fn format_tag(&self) -> &str;
}

/// Validate a codec's format tag: non-empty and `[A-Za-z0-9_-]+`.
///
/// The tag lands in file names after the final dot; the filename grammar
/// forbids `.` and path separators inside it.
pub fn validate_format_tag(tag: &str) -> CodecResult<()> {
    if tag.is_empty() {
        return Err(CodecError::InvalidFormatTag {
            tag: tag.into(),
            reason: "format tag must not be empty".into(),
        });
    }
    if let Some(bad) = tag
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(CodecError::InvalidFormatTag {
            tag: tag.into(),
            reason: format!("contains forbidden character: {bad:?}"),
        });
    }
    Ok(())
}
