//! The combined `ciphertext ‖ json` envelope
//!
//! Wire shape: `len: u32 little-endian ‖ ciphertext[len] ‖ utf8 json`.
//! The JSON tail is simply the rest of the buffer, no separator and no
//! terminator.

use serde_json::{Map, Value};
use tracing::trace;

use crate::error::{OnionError, OnionResult};

/// A parsed envelope: the binary half and the JSON control half
#[derive(Debug, Clone, PartialEq)]
pub struct FramedPayload {
    pub ciphertext: Vec<u8>,
    pub json: Map<String, Value>,
}

/// Split an envelope into its ciphertext and JSON halves.
///
/// A buffer too short for the declared ciphertext is
/// [`OnionError::InvalidCiphertext`]; a tail that is not a JSON object
/// is [`OnionError::InvalidJson`].
pub fn parse_payload(payload: &[u8]) -> OnionResult<FramedPayload> {
    trace!(len = payload.len(), "parsing combined payload");

    if payload.len() < 4 {
        return Err(OnionError::InvalidCiphertext);
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&payload[..4]);
    let n = u32::from_le_bytes(len_bytes) as usize;

    let rest = &payload[4..];
    if rest.len() < n {
        return Err(OnionError::InvalidCiphertext);
    }

    let (ciphertext, tail) = rest.split_at(n);

    let json = match serde_json::from_slice::<Value>(tail) {
        Ok(Value::Object(map)) => map,
        _ => return Err(OnionError::InvalidJson),
    };

    Ok(FramedPayload {
        ciphertext: ciphertext.to_vec(),
        json,
    })
}

/// The inverse of [`parse_payload`]
pub fn encode_payload(ciphertext: &[u8], json: &Map<String, Value>) -> Vec<u8> {
    let tail = Value::Object(json.clone()).to_string();

    let mut out = Vec::with_capacity(4 + ciphertext.len() + tail.len());
    out.extend_from_slice(&(ciphertext.len() as u32).to_le_bytes());
    out.extend_from_slice(ciphertext);
    out.extend_from_slice(tail.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_round_trip() {
        let json = obj(json!({"headers": "", "json": true}));
        let ciphertext = b"\x00\x01binary blob\xff";

        let encoded = encode_payload(ciphertext, &json);
        let parsed = parse_payload(&encoded).unwrap();

        assert_eq!(parsed.ciphertext, ciphertext);
        assert_eq!(parsed.json, json);
    }

    #[test]
    fn test_empty_ciphertext() {
        let json = obj(json!({}));
        let parsed = parse_payload(&encode_payload(b"", &json)).unwrap();
        assert!(parsed.ciphertext.is_empty());
    }

    #[test]
    fn test_short_buffer_is_invalid_ciphertext() {
        assert!(matches!(
            parse_payload(b"\x01"),
            Err(OnionError::InvalidCiphertext)
        ));
    }

    #[test]
    fn test_truncated_ciphertext() {
        // Declares 100 bytes but carries 3
        let mut buf = 100u32.to_le_bytes().to_vec();
        buf.extend_from_slice(b"abc");
        assert!(matches!(
            parse_payload(&buf),
            Err(OnionError::InvalidCiphertext)
        ));
    }

    #[test]
    fn test_garbage_tail_is_invalid_json() {
        let mut buf = 3u32.to_le_bytes().to_vec();
        buf.extend_from_slice(b"abc");
        buf.extend_from_slice(b"not json");
        assert!(matches!(parse_payload(&buf), Err(OnionError::InvalidJson)));
    }

    #[test]
    fn test_non_object_tail_is_invalid_json() {
        let mut buf = 0u32.to_le_bytes().to_vec();
        buf.extend_from_slice(b"[1, 2, 3]");
        assert!(matches!(parse_payload(&buf), Err(OnionError::InvalidJson)));
    }

    #[test]
    fn test_length_prefix_is_little_endian() {
        let mut buf = vec![2, 0, 0, 0];
        buf.extend_from_slice(b"xy");
        buf.extend_from_slice(b"{}");
        let parsed = parse_payload(&buf).unwrap();
        assert_eq!(parsed.ciphertext, b"xy");
    }
}
