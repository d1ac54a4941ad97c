//! OCPP-J message framing
//!
//! Wire envelope for the persistent-connection device family:
//!
//! - **Call**       `[2, "<messageId>", "<action>", {<payload>}]`
//! - **CallResult** `[3, "<messageId>", {<payload>}]`
//! - **CallError**  `[4, "<messageId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`
//!
//! Decoding is strict: every failure is reported as a [`FrameError`], which
//! the dispatcher answers with a `FormationViolation` CallError.

use serde_json::{Map, Value};

use crate::domain::ErrorCode;

// ── Message-type constants ─────────────────────────────────────

const MSG_TYPE_CALL: u64 = 2;
const MSG_TYPE_CALL_RESULT: u64 = 3;
const MSG_TYPE_CALL_ERROR: u64 = 4;

/// Message ids are UUID-sized at most.
pub const MAX_MESSAGE_ID_LEN: usize = 36;

/// Unordered string-keyed payload carried by Call and CallResult.
pub type Payload = Map<String, Value>;

// ── OcppFrame ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum OcppFrame {
    /// `[2, messageId, action, payload]`
    Call {
        message_id: String,
        action: String,
        payload: Payload,
    },
    /// `[3, messageId, payload]`
    CallResult { message_id: String, payload: Payload },
    /// `[4, messageId, errorCode, errorDescription, errorDetails]`
    CallError {
        message_id: String,
        error_code: ErrorCode,
        error_description: String,
        error_details: Payload,
    },
}

impl OcppFrame {
    // ── Decoding ───────────────────────────────────────────

    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, FrameError> {
        let Value::Array(mut arr) = value else {
            return Err(FrameError::NotAnArray);
        };
        if arr.is_empty() {
            return Err(FrameError::EmptyArray);
        }

        let msg_type = arr[0].as_u64().ok_or(FrameError::InvalidMessageType)?;
        let expected = match msg_type {
            MSG_TYPE_CALL => 4..=4,
            MSG_TYPE_CALL_RESULT => 3..=3,
            MSG_TYPE_CALL_ERROR => 4..=5,
            other => return Err(FrameError::UnknownMessageType(other)),
        };
        if !expected.contains(&arr.len()) {
            return Err(FrameError::FieldCount {
                expected: *expected.end(),
                got: arr.len(),
            });
        }

        let message_id = take_message_id(&arr[1])?;

        match msg_type {
            MSG_TYPE_CALL => {
                let payload = take_object(arr.pop(), "payload")?;
                let action = take_string(&arr[2], "action")?;
                if action.is_empty() {
                    return Err(FrameError::FieldTypeMismatch("action must not be empty"));
                }
                Ok(Self::Call {
                    message_id,
                    action,
                    payload,
                })
            }
            MSG_TYPE_CALL_RESULT => {
                let payload = take_object(arr.pop(), "payload")?;
                Ok(Self::CallResult {
                    message_id,
                    payload,
                })
            }
            _ => {
                let error_details = if arr.len() == 5 {
                    take_object(arr.pop(), "errorDetails")?
                } else {
                    Payload::new()
                };
                let error_code = ErrorCode::from_wire(&take_string(&arr[2], "errorCode")?);
                let error_description = take_string(&arr[3], "errorDescription")?;
                Ok(Self::CallError {
                    message_id,
                    error_code,
                    error_description,
                    error_details,
                })
            }
        }
    }

    /// Best-effort recovery of the message id from a frame that failed to
    /// decode, so the CallError can still be correlated by the peer.
    pub fn salvage_message_id(text: &str) -> Option<String> {
        let value: Value = serde_json::from_str(text).ok()?;
        let id = value.as_array()?.get(1)?.as_str()?;
        (!id.is_empty() && id.len() <= MAX_MESSAGE_ID_LEN).then(|| id.to_string())
    }

    // ── Encoding ───────────────────────────────────────────

    pub fn to_value(&self) -> Value {
        match self {
            Self::Call {
                message_id,
                action,
                payload,
            } => Value::Array(vec![
                Value::from(MSG_TYPE_CALL),
                Value::String(message_id.clone()),
                Value::String(action.clone()),
                Value::Object(payload.clone()),
            ]),

            Self::CallResult {
                message_id,
                payload,
            } => Value::Array(vec![
                Value::from(MSG_TYPE_CALL_RESULT),
                Value::String(message_id.clone()),
                Value::Object(payload.clone()),
            ]),

            Self::CallError {
                message_id,
                error_code,
                error_description,
                error_details,
            } => Value::Array(vec![
                Value::from(MSG_TYPE_CALL_ERROR),
                Value::String(message_id.clone()),
                Value::String(error_code.as_str().to_string()),
                Value::String(error_description.clone()),
                Value::Object(error_details.clone()),
            ]),
        }
    }

    pub fn serialize(&self) -> String {
        // Display of a Value cannot fail
        self.to_value().to_string()
    }

    // ── Constructors / helpers ─────────────────────────────

    pub fn call(message_id: impl Into<String>, action: impl Into<String>, payload: Payload) -> Self {
        Self::Call {
            message_id: message_id.into(),
            action: action.into(),
            payload,
        }
    }

    pub fn result(message_id: impl Into<String>, payload: Payload) -> Self {
        Self::CallResult {
            message_id: message_id.into(),
            payload,
        }
    }

    pub fn error(
        message_id: impl Into<String>,
        error_code: ErrorCode,
        error_description: impl Into<String>,
    ) -> Self {
        Self::CallError {
            message_id: message_id.into(),
            error_code,
            error_description: error_description.into(),
            error_details: Payload::new(),
        }
    }

    pub fn message_id(&self) -> &str {
        match self {
            Self::Call { message_id, .. }
            | Self::CallResult { message_id, .. }
            | Self::CallError { message_id, .. } => message_id,
        }
    }

    /// Short frame kind label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Call { .. } => "call",
            Self::CallResult { .. } => "call_result",
            Self::CallError { .. } => "call_error",
        }
    }
}

fn take_message_id(value: &Value) -> Result<String, FrameError> {
    let id = take_string(value, "messageId")?;
    if id.is_empty() || id.len() > MAX_MESSAGE_ID_LEN {
        return Err(FrameError::InvalidMessageId(id.len()));
    }
    Ok(id)
}

fn take_string(value: &Value, field: &'static str) -> Result<String, FrameError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or(FrameError::FieldTypeMismatch(field))
}

fn take_object(value: Option<Value>, field: &'static str) -> Result<Payload, FrameError> {
    match value {
        Some(Value::Object(map)) => Ok(map),
        _ => Err(FrameError::FieldTypeMismatch(field)),
    }
}

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Frame is not a JSON array")]
    NotAnArray,
    #[error("Empty OCPP message array")]
    EmptyArray,
    #[error("Message type is not a number")]
    InvalidMessageType,
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u64),
    #[error("Expected {expected} fields, got {got}")]
    FieldCount { expected: usize, got: usize },
    #[error("Field type mismatch: {0}")]
    FieldTypeMismatch(&'static str),
    #[error("Message id length {0} outside 1..=36")]
    InvalidMessageId(usize),
}

impl FrameError {
    /// Wire code reported back to the peer.
    pub fn error_code(&self) -> ErrorCode {
        ErrorCode::FormationViolation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn parse_call() {
        let text = r#"[2,"19223201","BootNotification",{"chargePointVendor":"VendorX","chargePointModel":"SingleSocketCharger"}]"#;
        let frame = OcppFrame::parse(text).unwrap();
        match frame {
            OcppFrame::Call {
                message_id,
                action,
                payload,
            } => {
                assert_eq!(message_id, "19223201");
                assert_eq!(action, "BootNotification");
                assert_eq!(payload["chargePointVendor"], "VendorX");
            }
            _ => panic!("Expected Call"),
        }
    }

    #[test]
    fn parse_call_result() {
        let text = r#"[3,"19223201",{"status":"Accepted","currentTime":"2013-02-01T20:53:32.486Z","interval":300}]"#;
        let frame = OcppFrame::parse(text).unwrap();
        assert_eq!(frame.message_id(), "19223201");
        assert_eq!(frame.kind(), "call_result");
    }

    #[test]
    fn parse_call_error_with_and_without_details() {
        let full = r#"[4,"162376037","NotSupported","SetDisplayMessageRequest not implemented",{}]"#;
        match OcppFrame::parse(full).unwrap() {
            OcppFrame::CallError {
                error_code,
                error_description,
                ..
            } => {
                assert_eq!(error_code, ErrorCode::NotSupported);
                assert_eq!(error_description, "SetDisplayMessageRequest not implemented");
            }
            _ => panic!("Expected CallError"),
        }

        let short = r#"[4,"162376037","Whatever","boom"]"#;
        match OcppFrame::parse(short).unwrap() {
            OcppFrame::CallError {
                error_code,
                error_details,
                ..
            } => {
                assert_eq!(error_code, ErrorCode::GenericError);
                assert!(error_details.is_empty());
            }
            _ => panic!("Expected CallError"),
        }
    }

    #[test]
    fn call_roundtrip_preserves_frame() {
        let frames = [
            OcppFrame::call("a-1", "Heartbeat", Payload::new()),
            OcppFrame::call(
                "a-2",
                "MeterValues",
                payload(json!({"connectorId": 1, "meterValue": [{"sampledValue": [{"value": "12.5"}]}]})),
            ),
            OcppFrame::result("a-3", payload(json!({"currentTime": "2024-01-01T00:00:00Z"}))),
            OcppFrame::error("a-4", ErrorCode::InternalError, "oops"),
        ];
        for frame in frames {
            let decoded = OcppFrame::parse(&frame.serialize()).unwrap();
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn encoding_keeps_field_order() {
        let frame = OcppFrame::error("x", ErrorCode::FormationViolation, "bad");
        assert_eq!(
            frame.serialize(),
            r#"[4,"x","FormationViolation","bad",{}]"#
        );
        let call = OcppFrame::call("y", "Heartbeat", Payload::new());
        assert_eq!(call.serialize(), r#"[2,"y","Heartbeat",{}]"#);
    }

    #[test]
    fn unknown_discriminator_fails() {
        for text in [r#"[5,"id",{}]"#, r#"[0,"id","A",{}]"#, r#"[1]"#] {
            let err = OcppFrame::parse(text).unwrap_err();
            assert!(matches!(err, FrameError::UnknownMessageType(_)));
            assert_eq!(err.error_code(), ErrorCode::FormationViolation);
        }
    }

    #[test]
    fn malformed_frames_fail() {
        let cases = [
            "not json",
            r#"{"a":1}"#,
            "[]",
            r#"["2","id","Heartbeat",{}]"#,
            r#"[2,"id","Heartbeat"]"#,
            r#"[2,"id","Heartbeat",{},{}]"#,
            r#"[2,42,"Heartbeat",{}]"#,
            r#"[2,"id",7,{}]"#,
            r#"[2,"id","Heartbeat",[]]"#,
            r#"[2,"","Heartbeat",{}]"#,
            r#"[3,"id","nope"]"#,
            r#"[4,"id","GenericError"]"#,
            r#"[4,"id","GenericError","desc","details"]"#,
        ];
        for text in cases {
            assert!(OcppFrame::parse(text).is_err(), "expected failure for {text}");
        }
    }

    #[test]
    fn message_id_length_is_bounded() {
        let long_id = "x".repeat(MAX_MESSAGE_ID_LEN + 1);
        let text = format!(r#"[2,"{long_id}","Heartbeat",{{}}]"#);
        assert_eq!(
            OcppFrame::parse(&text).unwrap_err(),
            FrameError::InvalidMessageId(MAX_MESSAGE_ID_LEN + 1)
        );
    }

    #[test]
    fn salvage_message_id_from_broken_frame() {
        assert_eq!(
            OcppFrame::salvage_message_id(r#"[2,"abc","Heartbeat","oops"]"#),
            Some("abc".to_string())
        );
        assert_eq!(OcppFrame::salvage_message_id("garbage"), None);
        assert_eq!(OcppFrame::salvage_message_id(r#"[2,17]"#), None);
    }
}
