//! Per-hop onion payload classification
//!
//! After a layer decrypts, the inner payload is itself a
//! `ciphertext ‖ json` envelope. The JSON decides what happens next,
//! checked in order: `"headers"` means we are the exit, `"host"` means
//! forward to an external server, anything else is a relay to the next
//! node. First match wins.

use serde_json::{Map, Value};
use tracing::{debug, trace};

use swarmnode_crypto::{Ed25519Pubkey, EncType};

use crate::error::OnionError;
use crate::frame::parse_payload;

/// Why an onion payload could not be classified
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// The envelope itself was unusable
    InvalidCiphertext,
    /// The control JSON was missing, malformed, or incomplete
    InvalidJson,
}

/// What one decrypted onion layer asks this node to do
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedOnion {
    /// We are the exit; hand the body to the local RPC subsystem
    Terminal {
        body: Vec<u8>,
        want_json: bool,
        want_base64: bool,
    },

    /// Forward to another node; the ephemeral key stays in its hex
    /// transport form until the forward actually happens
    RelayToNode {
        ciphertext: Vec<u8>,
        ephemeral_key: String,
        enc_type: EncType,
        next_node: Ed25519Pubkey,
    },

    /// Forward to an external HTTP(S) server; the payload is the whole
    /// outer plaintext, not just the ciphertext half
    RelayToServer {
        payload: Vec<u8>,
        host: String,
        port: u16,
        protocol: String,
        target: String,
    },

    /// The payload could not be understood
    Error(ParseError),
}

/// Classify a decrypted inner payload.
///
/// Every parse failure past the envelope split collapses to
/// `Error(InvalidJson)`; an unusable envelope is
/// `Error(InvalidCiphertext)`.
pub fn process_inner_request(plaintext: &[u8]) -> ParsedOnion {
    let frame = match parse_payload(plaintext) {
        Ok(frame) => frame,
        Err(OnionError::InvalidCiphertext) => {
            return ParsedOnion::Error(ParseError::InvalidCiphertext)
        }
        Err(_) => return ParsedOnion::Error(ParseError::InvalidJson),
    };

    match classify(frame.ciphertext, &frame.json, plaintext) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!("Error parsing inner JSON in onion request: {e}");
            ParsedOnion::Error(ParseError::InvalidJson)
        }
    }
}

fn classify(
    ciphertext: Vec<u8>,
    json: &Map<String, Value>,
    plaintext: &[u8],
) -> Result<ParsedOnion, OnionError> {
    // The presence of (possibly empty) "headers" marks the final
    // destination.
    if json.contains_key("headers") {
        trace!(len = ciphertext.len(), "found terminal body");
        return Ok(ParsedOnion::Terminal {
            body: ciphertext,
            want_json: optional_bool(json, "json")?,
            want_base64: optional_bool(json, "base64")?,
        });
    }

    if let Some(host) = json.get("host") {
        let host = as_string(host)?;
        let target = as_string(json.get("target").ok_or(OnionError::InvalidJson)?)?;

        let port = match json.get("port") {
            Some(value) => u16::try_from(value.as_u64().ok_or(OnionError::InvalidJson)?)
                .map_err(|_| OnionError::InvalidJson)?,
            None => 443,
        };
        let protocol = match json.get("protocol") {
            Some(value) => as_string(value)?,
            None => "https".to_string(),
        };

        return Ok(ParsedOnion::RelayToServer {
            payload: plaintext.to_vec(),
            host,
            port,
            protocol,
            target,
        });
    }

    // No "headers", no "host": pass the ciphertext on to the next node.
    let destination = as_string(json.get("destination").ok_or(OnionError::InvalidJson)?)?;
    let next_node =
        Ed25519Pubkey::from_hex(&destination).map_err(|_| OnionError::InvalidJson)?;

    let ephemeral_key = as_string(json.get("ephemeral_key").ok_or(OnionError::InvalidJson)?)?;

    let enc_type = match json.get("enc_type") {
        Some(value) => {
            EncType::parse(&as_string(value)?).map_err(|_| OnionError::InvalidJson)?
        }
        None => EncType::AesGcm,
    };

    Ok(ParsedOnion::RelayToNode {
        ciphertext,
        ephemeral_key,
        enc_type,
        next_node,
    })
}

fn as_string(value: &Value) -> Result<String, OnionError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or(OnionError::InvalidJson)
}

fn optional_bool(json: &Map<String, Value>, key: &str) -> Result<bool, OnionError> {
    match json.get(key) {
        Some(value) => value.as_bool().ok_or(OnionError::InvalidJson),
        None => Ok(false),
    }
}

/// Whether a relay target passes the external-server URL filter:
/// a `/loki/` or `/oxen/` prefix, a `/lsrpc` suffix, and no query
/// string. Case sensitive.
pub fn is_server_url_allowed(url: &str) -> bool {
    (url.starts_with("/loki/") || url.starts_with("/oxen/"))
        && url.ends_with("/lsrpc")
        && !url.contains('?')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_payload;
    use serde_json::json;

    const CIPHERTEXT: &[u8] = b"ciphertext";

    fn payload(inner: Value) -> Vec<u8> {
        match inner {
            Value::Object(map) => encode_payload(CIPHERTEXT, &map),
            _ => panic!("inner json must be an object"),
        }
    }

    // Provided "headers", so the request terminates at this node.
    #[test]
    fn test_final_destination() {
        let plaintext = payload(json!({"headers": "something"}));

        let res = process_inner_request(&plaintext);

        assert_eq!(
            res,
            ParsedOnion::Terminal {
                body: CIPHERTEXT.to_vec(),
                want_json: false,
                want_base64: false,
            }
        );
    }

    #[test]
    fn test_final_destination_flags() {
        let plaintext = payload(json!({"headers": "", "json": true, "base64": true}));

        match process_inner_request(&plaintext) {
            ParsedOnion::Terminal {
                want_json,
                want_base64,
                ..
            } => {
                assert!(want_json);
                assert!(want_base64);
            }
            other => panic!("expected terminal, got {other:?}"),
        }
    }

    // Provided "host", so the request goes to an external server.
    // Default values are used for port and protocol.
    #[test]
    fn test_relay_to_server_legacy() {
        let plaintext = payload(json!({"host": "host", "target": "target"}));

        let res = process_inner_request(&plaintext);

        assert_eq!(
            res,
            ParsedOnion::RelayToServer {
                payload: plaintext.clone(),
                host: "host".to_string(),
                port: 443,
                protocol: "https".to_string(),
                target: "target".to_string(),
            }
        );
    }

    #[test]
    fn test_relay_to_server_explicit() {
        let plaintext = payload(json!({
            "host": "host",
            "target": "target",
            "port": 80,
            "protocol": "http"
        }));

        let res = process_inner_request(&plaintext);

        assert_eq!(
            res,
            ParsedOnion::RelayToServer {
                payload: plaintext.clone(),
                host: "host".to_string(),
                port: 80,
                protocol: "http".to_string(),
                target: "target".to_string(),
            }
        );
    }

    // No "host" or "headers": forward to another node.
    #[test]
    fn test_relay_to_node() {
        let dest = "ffffeeeeddddccccbbbbaaaa9999888877776666555544443333222211110000";
        let plaintext = payload(json!({
            "destination": dest,
            "ephemeral_key": "ephemeral_key"
        }));

        let res = process_inner_request(&plaintext);

        assert_eq!(
            res,
            ParsedOnion::RelayToNode {
                ciphertext: CIPHERTEXT.to_vec(),
                ephemeral_key: "ephemeral_key".to_string(),
                enc_type: EncType::AesGcm,
                next_node: Ed25519Pubkey::from_hex(dest).unwrap(),
            }
        );
    }

    #[test]
    fn test_relay_to_node_enc_types() {
        let dest = "ffffeeeeddddccccbbbbaaaa9999888877776666555544443333222211110000";
        for (name, expected) in [
            ("gcm", EncType::AesGcm),
            ("aes-cbc", EncType::AesCbc),
            ("xchacha20", EncType::XChaCha20),
        ] {
            let plaintext = payload(json!({
                "destination": dest,
                "ephemeral_key": "e",
                "enc_type": name
            }));
            match process_inner_request(&plaintext) {
                ParsedOnion::RelayToNode { enc_type, .. } => assert_eq!(enc_type, expected),
                other => panic!("expected relay, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_unknown_enc_type_is_fatal() {
        let dest = "ffffeeeeddddccccbbbbaaaa9999888877776666555544443333222211110000";
        let plaintext = payload(json!({
            "destination": dest,
            "ephemeral_key": "e",
            "enc_type": "rot13"
        }));
        assert_eq!(
            process_inner_request(&plaintext),
            ParsedOnion::Error(ParseError::InvalidJson)
        );
    }

    #[test]
    fn test_missing_required_fields() {
        // host without target
        let plaintext = payload(json!({"host": "host"}));
        assert_eq!(
            process_inner_request(&plaintext),
            ParsedOnion::Error(ParseError::InvalidJson)
        );

        // relay without destination
        let plaintext = payload(json!({"ephemeral_key": "e"}));
        assert_eq!(
            process_inner_request(&plaintext),
            ParsedOnion::Error(ParseError::InvalidJson)
        );

        // destination that is not valid hex
        let plaintext = payload(json!({"destination": "xx", "ephemeral_key": "e"}));
        assert_eq!(
            process_inner_request(&plaintext),
            ParsedOnion::Error(ParseError::InvalidJson)
        );
    }

    #[test]
    fn test_bad_envelope() {
        assert_eq!(
            process_inner_request(b"\x01"),
            ParsedOnion::Error(ParseError::InvalidCiphertext)
        );
        // valid length prefix, garbage tail
        let mut buf = 0u32.to_le_bytes().to_vec();
        buf.extend_from_slice(b"not json at all");
        assert_eq!(
            process_inner_request(&buf),
            ParsedOnion::Error(ParseError::InvalidJson)
        );
    }

    #[test]
    fn test_headers_wins_over_host() {
        // Decision order: "headers" is checked first
        let plaintext = payload(json!({"headers": "", "host": "host", "target": "t"}));
        assert!(matches!(
            process_inner_request(&plaintext),
            ParsedOnion::Terminal { .. }
        ));
    }

    #[test]
    fn test_correctly_filters_urls() {
        assert!(is_server_url_allowed("/loki/v3/lsrpc"));
        assert!(is_server_url_allowed("/loki/oxen/v4/lsrpc"));
        assert!(is_server_url_allowed("/oxen/v3/lsrpc"));

        assert!(!is_server_url_allowed("/not_loki/v3/lsrpc"));
        assert!(!is_server_url_allowed("/loki/v3"));
        assert!(!is_server_url_allowed("/loki/v3/lsrpc?foo=bar"));
    }
}
