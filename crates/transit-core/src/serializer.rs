//! The codec seam between protocol maps and bytes on the wire.

use crate::error::{DecodeError, EncodingError};
use crate::payload::Payload;
use serde_json::{Map, Value};

/// Converts between plain maps, [`Payload`] views and wire bytes.
pub trait Serializer: Send + Sync {
    /// Build a message from a plain map. Fails when the map holds a value
    /// the codec cannot represent.
    fn map_to_payload(&self, map: &Map<String, Value>) -> Result<Payload, EncodingError>;

    fn payload_to_bytes(&self, payload: &Payload) -> Result<Vec<u8>, EncodingError>;

    fn bytes_to_payload(&self, bytes: &[u8]) -> Result<Payload, DecodeError>;

    /// The plain map behind a decoded REQ, with `level` and `timeout`
    /// coerced to integers.
    fn payload_to_context_map(&self, payload: &Payload) -> Map<String, Value>;
}

/// JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl Serializer for JsonSerializer {
    fn map_to_payload(&self, map: &Map<String, Value>) -> Result<Payload, EncodingError> {
        // Round-trip through the encoder so the result is exactly what a
        // remote node would decode.
        let bytes = serde_json::to_vec(map)?;
        let value: Value = serde_json::from_slice(&bytes)?;
        Ok(Payload::new(value))
    }

    fn payload_to_bytes(&self, payload: &Payload) -> Result<Vec<u8>, EncodingError> {
        match payload.as_value() {
            Some(value @ Value::Object(_)) => Ok(serde_json::to_vec(value)?),
            Some(other) => Err(EncodingError::NotAMap(value_kind(other))),
            None => Err(EncodingError::NotAMap("nothing")),
        }
    }

    fn bytes_to_payload(&self, bytes: &[u8]) -> Result<Payload, DecodeError> {
        Ok(Payload::new(serde_json::from_slice(bytes)?))
    }

    fn payload_to_context_map(&self, payload: &Payload) -> Map<String, Value> {
        let mut map = payload.raw_map().unwrap_or_default();
        let level = payload.get("level");
        map.insert("level".into(), Value::from(level.int64().max(1)));
        let timeout = payload.get("timeout");
        if timeout.exists() && !timeout.value().is_null() {
            map.insert("timeout".into(), Value::from(timeout.uint()));
        }
        map
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::time_to_value;
    use serde_json::json;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn map_round_trip_keeps_scalars() {
        let sent = UNIX_EPOCH + Duration::from_secs(1_000);
        let map = json!({
            "s": "hello",
            "i": -12,
            "i64": 9_000_000_000i64,
            "u": 18_000_000_000_000_000_000u64,
            "f": 1.5,
            "b": true,
            "t": time_to_value(sent),
            "empty": "",
        });
        let map = map.as_object().unwrap();

        let codec = JsonSerializer::new();
        let payload = codec.map_to_payload(map).unwrap();
        let decoded = codec
            .bytes_to_payload(&codec.payload_to_bytes(&payload).unwrap())
            .unwrap();

        assert_eq!(decoded.get("s").string(), "hello");
        assert_eq!(decoded.get("i").int(), -12);
        assert_eq!(decoded.get("i64").int64(), 9_000_000_000);
        assert_eq!(decoded.get("u").uint(), 18_000_000_000_000_000_000);
        assert_eq!(decoded.get("f").float(), 1.5);
        assert!(decoded.get("b").bool());
        assert_eq!(decoded.get("t").time(), sent);

        let empty = decoded.get("empty");
        assert!(empty.exists());
        assert_eq!(empty.string(), "");
        let absent = decoded.get("absent");
        assert!(!absent.exists());
        assert_eq!(absent.int64(), 0);
    }

    #[test]
    fn only_maps_go_on_the_wire() {
        let codec = JsonSerializer::new();
        let err = codec.payload_to_bytes(&Payload::new(json!([1, 2]))).unwrap_err();
        assert!(matches!(err, EncodingError::NotAMap("an array")));
        assert!(codec.payload_to_bytes(&Payload::missing()).is_err());
    }

    #[test]
    fn malformed_bytes_are_rejected() {
        let codec = JsonSerializer::new();
        assert!(codec.bytes_to_payload(b"{not json").is_err());
    }

    #[test]
    fn context_map_coerces_numbers() {
        let codec = JsonSerializer::new();
        let payload = Payload::new(json!({"id": "c1", "level": 2.0, "timeout": "500"}));
        let map = codec.payload_to_context_map(&payload);
        assert_eq!(map["level"], json!(2));
        assert_eq!(map["timeout"], json!(500));

        let bare = codec.payload_to_context_map(&Payload::new(json!({"id": "c2"})));
        assert_eq!(bare["level"], json!(1));
        assert!(!bare.contains_key("timeout"));
    }
}
