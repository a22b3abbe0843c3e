use std::marker::PhantomData;

use rill_types::Item;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CodecError, CodecResult};
use crate::traits::ItemCodec;

/// JSON item codec; the default wire format.
///
/// Works with any payload type that is `Serialize + DeserializeOwned`.
/// The format tag is `json`.
pub struct JsonItemCodec<T> {
    _payload: PhantomData<fn() -> T>,
}

impl<T> JsonItemCodec<T> {
    pub fn new() -> Self {
        Self {
            _payload: PhantomData,
        }
    }
}

impl<T> Default for JsonItemCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ItemCodec<T> for JsonItemCodec<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    fn encode(&self, item: &Item<T>) -> CodecResult<Vec<u8>> {
        serde_json::to_vec(item).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<Item<T>> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }

    fn format_tag(&self) -> &str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(key: &str, version: u64, payload: &str) -> Item<String> {
        Item::new(key, version, payload.to_string()).unwrap()
    }

    #[test]
    fn roundtrip() {
        let codec = JsonItemCodec::<String>::new();
        let original = item("order-1", 3, "payload data");
        let bytes = codec.encode(&original).unwrap();
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn roundtrip_through_sink_and_source() {
        let codec = JsonItemCodec::<String>::new();
        let original = item("k1", 1, "x");

        let mut buf = Vec::new();
        codec.encode_to(&mut buf, &original).unwrap();
        let decoded = codec.decode_from(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn decode_garbage_fails() {
        let codec = JsonItemCodec::<String>::new();
        let err = codec.decode(b"not json at all").unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn format_tag_is_filesystem_safe() {
        let codec = JsonItemCodec::<String>::new();
        assert_eq!(codec.format_tag(), "json");
        crate::traits::validate_format_tag(codec.format_tag()).unwrap();
    }

    #[test]
    fn structured_payload_roundtrip() {
        #[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
        struct Order {
            sku: String,
            quantity: u32,
        }

        let codec = JsonItemCodec::<Order>::new();
        let original = Item::new(
            "order-42",
            7,
            Order {
                sku: "A-100".into(),
                quantity: 3,
            },
        )
        .unwrap();

        let bytes = codec.encode(&original).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), original);
    }
}
