//! Frame formatters: translate raw bytes from/to the router's internal
//! JSON frame representation (spec §4.J "Formatter contract").

use serde_json::{Map, Value};

/// Decodes raw bytes into a frame, or encodes a frame back into bytes.
/// `decode` returning `None` means a control/non-data frame and the router
/// silently drops it; there is no error variant because a formatter is not
/// expected to fail on malformed input, only to say "nothing to forward".
pub trait Formatter: Send + Sync {
    /// Parses `raw` into a frame map, or `None` to drop it silently.
    fn decode(&self, raw: &[u8]) -> Option<Map<String, Value>>;

    /// Serializes `frame` back into bytes for the destination endpoint.
    fn encode(&self, frame: &Map<String, Value>) -> Vec<u8>;
}

/// Default formatter used when an endpoint configures none: plain
/// `json.loads`/`json.dumps` (spec §4.J "or `json.decode`/`json.encode` if
/// absent").
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn decode(&self, raw: &[u8]) -> Option<Map<String, Value>> {
        match serde_json::from_slice::<Value>(raw) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    }

    fn encode(&self, frame: &Map<String, Value>) -> Vec<u8> {
        serde_json::to_vec(frame).unwrap_or_default()
    }
}

/// Passes the raw payload through as a hex string under `data`, with no
/// other interpretation (`router_formatter_raw.py`'s `raw_to_json`/
/// `json_to_raw`, used by the ground-station uplink/downlink endpoints).
#[derive(Debug, Clone, Copy, Default)]
pub struct RawHexFormatter;

impl Formatter for RawHexFormatter {
    fn decode(&self, raw: &[u8]) -> Option<Map<String, Value>> {
        let mut frame = Map::new();
        frame.insert("data".to_string(), Value::String(hex::encode(raw)));
        Some(frame)
    }

    fn encode(&self, frame: &Map<String, Value>) -> Vec<u8> {
        frame
            .get("data")
            .and_then(Value::as_str)
            .and_then(|s| hex::decode(s).ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_formatter_round_trips_an_object() {
        let formatter = JsonFormatter;
        let mut frame = Map::new();
        frame.insert("data".to_string(), Value::String("ab".to_string()));
        let bytes = formatter.encode(&frame);
        let decoded = formatter.decode(&bytes).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn json_formatter_drops_non_object_payloads() {
        let formatter = JsonFormatter;
        assert!(formatter.decode(b"42").is_none());
        assert!(formatter.decode(b"not json").is_none());
    }

    #[test]
    fn raw_hex_formatter_round_trips_bytes() {
        let formatter = RawHexFormatter;
        let frame = formatter.decode(&[0xde, 0xad, 0xbe, 0xef]).unwrap();
        assert_eq!(frame["data"], "deadbeef");
        assert_eq!(formatter.encode(&frame), vec![0xde, 0xad, 0xbe, 0xef]);
    }
}
