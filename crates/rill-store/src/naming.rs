//! Item and snapshot file naming.
//!
//! The file backend encodes the version and idempotency key in file names
//! so that lookups are directory scans rather than an index:
//!
//! ```text
//! <root>/<stream_id>/Data/<version>.<key>.<format_tag>
//! <root>/<stream_id>/Data/Snapshots/<version>.<format_tag>
//! ```
//!
//! Grammar: `<version> := [0-9]+`, the key must not contain `.` or `/`,
//! and the format tag must not contain `.`. An item name therefore splits
//! unambiguously at its first and last dot.

/// Parsed item file name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemFileName {
    pub version: u64,
    pub key: String,
    pub tag: String,
}

/// Render an item file name for `(version, key, tag)`.
pub fn item_file_name(version: u64, key: &str, tag: &str) -> String {
    format!("{version}.{key}.{tag}")
}

/// Parse an item file name, `None` if the name does not match the grammar.
pub fn parse_item_file_name(name: &str) -> Option<ItemFileName> {
    let first = name.find('.')?;
    let last = name.rfind('.')?;
    if first == last {
        return None;
    }

    let version_part = &name[..first];
    if version_part.is_empty() || !version_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let version = version_part.parse().ok()?;

    let key = &name[first + 1..last];
    let tag = &name[last + 1..];
    if key.is_empty() || tag.is_empty() {
        return None;
    }

    Some(ItemFileName {
        version,
        key: key.to_string(),
        tag: tag.to_string(),
    })
}

/// Render a snapshot file name for `(version, tag)`.
pub fn snapshot_file_name(version: u64, tag: &str) -> String {
    format!("{version}.{tag}")
}

/// Parse a snapshot file name (`<version>.<tag>`, exactly one dot).
pub fn parse_snapshot_file_name(name: &str) -> Option<(u64, String)> {
    let dot = name.find('.')?;
    if name.rfind('.') != Some(dot) {
        return None;
    }

    let version_part = &name[..dot];
    if version_part.is_empty() || !version_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let version = version_part.parse().ok()?;

    let tag = &name[dot + 1..];
    if tag.is_empty() {
        return None;
    }
    Some((version, tag.to_string()))
}
