//! Normalized request/response shape shared by every device family

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::ProtocolType;
use crate::support::ocpp_frame::Payload;

/// Operations a `ProtocolService` accepts through `handle_request`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestAction {
    Heartbeat,
    Status,
    Start,
    Stop,
    Register,
}

impl RequestAction {
    pub const ALL: &'static [RequestAction] = &[
        Self::Heartbeat,
        Self::Status,
        Self::Start,
        Self::Stop,
        Self::Register,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Heartbeat => "heartbeat",
            Self::Status => "status",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Register => "register",
        }
    }
}

impl fmt::Display for RequestAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|a| a.as_str().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolRequest {
    pub request_id: String,
    /// Resolved by the manager when absent.
    pub protocol_type: Option<ProtocolType>,
    pub device_code: String,
    pub session_id: Option<String>,
    pub action: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Payload,
    pub api_version: Option<String>,
}

impl ProtocolRequest {
    pub fn new(
        protocol_type: Option<ProtocolType>,
        device_code: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            protocol_type,
            device_code: device_code.into(),
            session_id: None,
            action: action.into(),
            timestamp: Utc::now(),
            data: Payload::new(),
            api_version: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_payload(mut self, data: Payload) -> Self {
        self.data = data;
        self
    }

    pub fn parsed_action(&self) -> Option<RequestAction> {
        self.action.parse().ok()
    }

    pub fn data_i64(&self, key: &str) -> Option<i64> {
        self.data.get(key).and_then(Value::as_i64)
    }

    pub fn data_f64(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(Value::as_f64)
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }
}

/// Uniform success/failure envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolResponse {
    pub code: String,
    pub message: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_type: Option<ProtocolType>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Correlation id of the Call sent to an OCPP device, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl ProtocolResponse {
    pub fn ok() -> Self {
        Self::build(true, "200", "Success")
    }

    pub fn ok_with(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::ok()
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::build(false, code, message)
    }

    fn build(success: bool, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            success,
            request_id: None,
            protocol_type: None,
            timestamp: Utc::now(),
            data: None,
            message_id: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_protocol_type(mut self, protocol_type: ProtocolType) -> Self {
        self.protocol_type = Some(protocol_type);
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn action_parse_is_case_insensitive() {
        assert_eq!("HEARTBEAT".parse(), Ok(RequestAction::Heartbeat));
        assert_eq!(" stop ".parse(), Ok(RequestAction::Stop));
        assert_eq!("reboot".parse::<RequestAction>(), Err(()));
    }

    #[test]
    fn request_data_accessors() {
        let req = ProtocolRequest::new(None, "CP-1", "status")
            .with_data("status", 3)
            .with_data("energy", 12.5)
            .with_data("reason", "Local");
        assert_eq!(req.data_i64("status"), Some(3));
        assert_eq!(req.data_f64("energy"), Some(12.5));
        assert_eq!(req.data_str("reason"), Some("Local"));
        assert_eq!(req.data_i64("missing"), None);
        assert_eq!(req.parsed_action(), Some(RequestAction::Status));
    }

    #[test]
    fn response_envelope_serializes_camel_case() {
        let resp = ProtocolResponse::ok_with(json!({"status": "received"}))
            .with_request_id("r-1")
            .with_protocol_type(ProtocolType::CloudCharge);
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["code"], "200");
        assert_eq!(v["success"], true);
        assert_eq!(v["requestId"], "r-1");
        assert_eq!(v["protocolType"], "CLOUD_CHARGE");
        assert_eq!(v["data"]["status"], "received");
        assert!(v.get("messageId").is_none());
    }

    #[test]
    fn failure_keeps_code() {
        let resp = ProtocolResponse::failure("404", "Unsupported action: reboot");
        assert!(!resp.is_success());
        assert_eq!(resp.code, "404");
    }
}
