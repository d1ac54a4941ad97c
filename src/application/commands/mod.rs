//! Outbound commands, Central System → device
//!
//! Fire-and-forget: a command is encoded as a Call, pushed onto the
//! device's transport and its message id returned. Matching the device's
//! CallResult to that id is left to the caller.

pub mod remote_start;
pub mod remote_stop;
pub mod trigger_message;

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::application::session::SharedSessionRegistry;
use crate::support::ocpp_frame::{OcppFrame, Payload};

pub use remote_start::remote_start_transaction;
pub use remote_stop::remote_stop_transaction;
pub use trigger_message::trigger_boot_notification;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Device not connected: {0}")]
    NotConnected(String),
    #[error("Failed to send: {0}")]
    SendFailed(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub struct CommandSender {
    registry: SharedSessionRegistry,
}

pub type SharedCommandSender = Arc<CommandSender>;

impl CommandSender {
    pub fn new(registry: SharedSessionRegistry) -> Self {
        Self { registry }
    }

    pub fn generate_message_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Send `action` to a live device. Returns the Call's message id.
    pub fn send_command(
        &self,
        device_id: &str,
        action: &str,
        payload: Payload,
    ) -> Result<String, CommandError> {
        let session = self
            .registry
            .get(device_id)
            .filter(|s| s.is_live())
            .ok_or_else(|| CommandError::NotConnected(device_id.to_string()))?;

        let message_id = Self::generate_message_id();
        let frame = OcppFrame::call(message_id.clone(), action, payload);
        session
            .send(frame.serialize())
            .map_err(|e| CommandError::SendFailed(e.to_string()))?;

        info!(device_id, action, %message_id, "Command sent");
        Ok(message_id)
    }
}

/// Serialize a typed request into a Call payload.
pub(crate) fn to_payload<T: Serialize>(request: &T) -> Result<Payload, CommandError> {
    match serde_json::to_value(request) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(CommandError::InvalidRequest(
            "request did not serialize to an object".to_string(),
        )),
        Err(e) => Err(CommandError::InvalidRequest(e.to_string())),
    }
}
