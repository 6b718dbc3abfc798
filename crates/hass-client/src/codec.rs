//! Wire codec: JSON text frames to typed messages and back

use serde_json::{Map, Value};

use crate::error::{ClientError, ClientResult};
use crate::messages::{AuthCommandMessage, CommandMessage, IncomingMessage};

/// Decode one inbound frame
///
/// Unknown `type` values and malformed frames are protocol errors.
pub fn decode_frame(text: &str) -> ClientResult<IncomingMessage> {
    serde_json::from_str(text).map_err(|e| {
        let kind = serde_json::from_str::<Value>(text)
            .ok()
            .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_string));
        match kind {
            Some(kind) => ClientError::protocol(format!("invalid '{}' frame: {}", kind, e)),
            None => ClientError::protocol(format!("undecodable frame: {}", e)),
        }
    })
}

/// Encode the auth command
pub fn encode_auth(access_token: &str) -> ClientResult<String> {
    let msg = AuthCommandMessage {
        msg_type: "auth",
        access_token,
    };
    Ok(serde_json::to_string(&msg)?)
}

/// Check that a command payload is an object with a string `type`
///
/// Any `id` already present is dropped; the correlator owns identifiers.
pub fn validate_command(payload: Value) -> ClientResult<Map<String, Value>> {
    let mut map = match payload {
        Value::Object(map) => map,
        other => {
            return Err(ClientError::InvalidCommand(format!(
                "payload must be a JSON object, got {}",
                other
            )))
        }
    };
    match map.get("type") {
        Some(Value::String(_)) => {}
        _ => {
            return Err(ClientError::InvalidCommand(
                "payload must carry a string 'type'".to_string(),
            ))
        }
    }
    map.remove("id");
    Ok(map)
}

/// Encode a command with its correlation identifier
pub fn encode_command(id: u64, payload: Map<String, Value>) -> ClientResult<String> {
    Ok(serde_json::to_string(&CommandMessage { id, payload })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_auth_required() {
        let msg = decode_frame(r#"{"type": "auth_required", "ha_version": "2026.1.1"}"#).unwrap();
        match msg {
            IncomingMessage::AuthRequired(m) => {
                assert_eq!(m.ha_version.as_deref(), Some("2026.1.1"));
            }
            other => panic!("Expected AuthRequired, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_auth_invalid() {
        let msg =
            decode_frame(r#"{"type": "auth_invalid", "message": "Invalid password"}"#).unwrap();
        match msg {
            IncomingMessage::AuthInvalid(m) => {
                assert_eq!(m.message.as_deref(), Some("Invalid password"));
            }
            other => panic!("Expected AuthInvalid, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_result_with_list() {
        let msg = decode_frame(
            r#"{"id": 4, "type": "result", "success": true, "result": [{"entity_id": "sun.sun"}]}"#,
        )
        .unwrap();
        match msg {
            IncomingMessage::Result(r) => {
                assert_eq!(r.id, 4);
                assert!(r.success);
                assert!(r.result.unwrap().is_array());
            }
            other => panic!("Expected Result, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_failed_result() {
        let msg = decode_frame(
            r#"{"id": 9, "type": "result", "success": false, "error": {"code": "not_found", "message": "Service not found."}}"#,
        )
        .unwrap();
        match msg {
            IncomingMessage::Result(r) => {
                assert!(!r.success);
                let error = r.error.unwrap();
                assert_eq!(error.code, "not_found");
                assert_eq!(error.message, "Service not found.");
            }
            other => panic!("Expected Result, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_event_and_pong() {
        let msg =
            decode_frame(r#"{"id": 2, "type": "event", "event": {"a": {}}}"#).unwrap();
        assert_eq!(msg.kind(), "event");
        let msg = decode_frame(r#"{"id": 3, "type": "pong"}"#).unwrap();
        assert!(matches!(msg, IncomingMessage::Pong(p) if p.id == 3));
    }

    #[test]
    fn test_unknown_type_is_protocol_error() {
        let err = decode_frame(r#"{"id": 1, "type": "telepathy"}"#).unwrap_err();
        assert!(matches!(err, ClientError::Protocol { .. }));
        let err = decode_frame("not json").unwrap_err();
        assert!(matches!(err, ClientError::Protocol { .. }));
    }

    #[test]
    fn test_encode_auth() {
        let text = encode_auth("secret").unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"type": "auth", "access_token": "secret"}));
    }

    #[test]
    fn test_encode_command_stamps_id() {
        let payload = validate_command(json!({"type": "get_states", "id": 99})).unwrap();
        let text = encode_command(7, payload).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({"id": 7, "type": "get_states"}));
    }

    #[test]
    fn test_validate_rejects_bad_payloads() {
        assert!(matches!(
            validate_command(json!(["get_states"])),
            Err(ClientError::InvalidCommand(_))
        ));
        assert!(matches!(
            validate_command(json!({"type": 5})),
            Err(ClientError::InvalidCommand(_))
        ));
    }
}
