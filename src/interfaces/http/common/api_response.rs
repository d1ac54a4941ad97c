//! Uniform response envelope

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::application::protocol::ProtocolResponse;

/// `{code, message, success, data, timestamp}` returned by every endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse {
    /// "200" on success, otherwise an HTTP-like failure code
    pub code: String,
    pub message: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ApiResponse {
    pub fn success(data: Value) -> Self {
        Self {
            code: "200".to_string(),
            message: "Success".to_string(),
            success: true,
            data: Some(data),
            request_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            success: false,
            data: None,
            request_id: None,
            timestamp: Utc::now(),
        }
    }
}

impl From<ProtocolResponse> for ApiResponse {
    fn from(resp: ProtocolResponse) -> Self {
        Self {
            code: resp.code,
            message: resp.message,
            success: resp.success,
            data: resp.data,
            request_id: resp.request_id,
            timestamp: resp.timestamp,
        }
    }
}
