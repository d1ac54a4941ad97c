//! Protocol events
//!
//! Facts about device activity, forwarded to business collaborators
//! (billing, order management). Never visible on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ProtocolType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ProtocolEvent {
    Heartbeat(HeartbeatEvent),
    StatusChange(StatusChangeEvent),
    TransactionStartAck(TransactionStartAckEvent),
    TransactionStopAck(TransactionStopAckEvent),
}

impl ProtocolEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ProtocolEvent::Heartbeat(_) => "heartbeat",
            ProtocolEvent::StatusChange(_) => "status_change",
            ProtocolEvent::TransactionStartAck(_) => "transaction_start_ack",
            ProtocolEvent::TransactionStopAck(_) => "transaction_stop_ack",
        }
    }

    pub fn device_id(&self) -> &str {
        match self {
            ProtocolEvent::Heartbeat(e) => &e.device_id,
            ProtocolEvent::StatusChange(e) => &e.device_id,
            ProtocolEvent::TransactionStartAck(e) => &e.device_id,
            ProtocolEvent::TransactionStopAck(e) => &e.device_id,
        }
    }

    pub fn protocol_type(&self) -> ProtocolType {
        match self {
            ProtocolEvent::Heartbeat(e) => e.protocol_type,
            ProtocolEvent::StatusChange(e) => e.protocol_type,
            ProtocolEvent::TransactionStartAck(e) => e.protocol_type,
            ProtocolEvent::TransactionStopAck(e) => e.protocol_type,
        }
    }

    pub fn heartbeat(device_id: impl Into<String>, protocol_type: ProtocolType) -> Self {
        ProtocolEvent::Heartbeat(HeartbeatEvent {
            device_id: device_id.into(),
            protocol_type,
            timestamp: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatEvent {
    pub device_id: String,
    pub protocol_type: ProtocolType,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChangeEvent {
    pub device_id: String,
    pub protocol_type: ProtocolType,
    pub connector_id: Option<u32>,
    /// Previously reported code for the connector, if any
    pub old_status: Option<i32>,
    pub new_status: i32,
    pub error_code: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionStartAckEvent {
    pub device_id: String,
    pub protocol_type: ProtocolType,
    pub session_id: String,
    pub transaction_id: Option<i32>,
    pub accepted: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionStopAckEvent {
    pub device_id: String,
    pub protocol_type: ProtocolType,
    pub session_id: Option<String>,
    pub transaction_id: Option<i32>,
    pub accepted: bool,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}
