//! CloudCharge signed request envelope

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;
use validator::Validate;

use crate::infrastructure::crypto::SignedFields;

/// Body of every `/api/cloudcharge/*` call.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CloudChargeRequest {
    #[validate(length(min = 1, max = 64))]
    pub request_id: String,
    #[serde(default)]
    pub api_version: Option<String>,
    /// RFC 3339 or ISO local date-time
    #[validate(length(min = 1))]
    pub timestamp: String,
    /// Lower-case hex HMAC-SHA256
    #[validate(length(min = 1))]
    pub signature: String,
    #[validate(length(min = 1, max = 64))]
    pub device_code: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub data: Option<Map<String, Value>>,
}

impl CloudChargeRequest {
    pub fn signed_fields(&self) -> SignedFields<'_> {
        SignedFields {
            request_id: &self.request_id,
            api_version: self.api_version.as_deref().unwrap_or(""),
            timestamp: &self.timestamp,
            device_code: &self.device_code,
            session_id: self.session_id.as_deref(),
            action: self.action.as_deref(),
            data: self.data.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_minimal_body() {
        let body: CloudChargeRequest = serde_json::from_value(json!({
            "requestId": "r-1",
            "timestamp": "2024-01-01T00:00:00Z",
            "signature": "ab",
            "deviceCode": "CC-1"
        }))
        .unwrap();
        assert!(body.validate().is_ok());
        assert!(body.data.is_none());
        assert_eq!(body.signed_fields().api_version, "");
    }

    #[test]
    fn blank_device_code_fails_validation() {
        let body: CloudChargeRequest = serde_json::from_value(json!({
            "requestId": "r-1",
            "timestamp": "t",
            "signature": "ab",
            "deviceCode": ""
        }))
        .unwrap();
        assert!(body.validate().is_err());
    }
}
