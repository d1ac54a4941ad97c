//! OCPP 1.6 action handlers
//!
//! One free function per device-initiated action. Each takes the owning
//! dispatcher (settings, event sink, id source) and the caller's session.

mod handle_authorize;
mod handle_boot_notification;
mod handle_heartbeat;
mod handle_meter_values;
mod handle_start_transaction;
mod handle_status_notification;
mod handle_stop_transaction;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use handle_authorize::handle_authorize;
use handle_boot_notification::handle_boot_notification;
use handle_heartbeat::handle_heartbeat;
use handle_meter_values::handle_meter_values;
use handle_start_transaction::handle_start_transaction;
use handle_status_notification::handle_status_notification;
use handle_stop_transaction::handle_stop_transaction;

use super::dispatcher::{Action, HandlerError, HandlerResult, MessageDispatcher};
use crate::application::session::Session;
use crate::support::ocpp_frame::Payload;

pub fn action_matcher(
    dispatcher: &MessageDispatcher,
    session: &Session,
    action: Action,
    payload: Payload,
) -> HandlerResult {
    match action {
        Action::BootNotification => handle_boot_notification(dispatcher, session, payload),
        Action::Heartbeat => handle_heartbeat(dispatcher, session, payload),
        Action::StatusNotification => handle_status_notification(dispatcher, session, payload),
        Action::Authorize => handle_authorize(dispatcher, session, payload),
        Action::StartTransaction => handle_start_transaction(dispatcher, session, payload),
        Action::StopTransaction => handle_stop_transaction(dispatcher, session, payload),
        Action::MeterValues => handle_meter_values(dispatcher, session, payload),
    }
}

/// Deserialize a request payload into its typed message.
fn parse<T: DeserializeOwned>(action: Action, payload: Payload) -> Result<T, HandlerError> {
    serde_json::from_value(Value::Object(payload))
        .map_err(|e| HandlerError::Formation(format!("Invalid {} payload: {}", action.as_str(), e)))
}

/// Serialize a typed response into a CallResult payload.
fn respond<T: Serialize>(response: &T) -> HandlerResult {
    match serde_json::to_value(response) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(HandlerError::Internal(format!(
            "Response serialized to non-object: {other}"
        ))),
        Err(e) => Err(HandlerError::Internal(format!("Serialization failed: {e}"))),
    }
}

// Session attribute keys shared between handlers and the protocol service.

pub(crate) fn connector_status_key(connector_id: u32) -> String {
    format!("connector.{connector_id}.status")
}

pub(crate) fn connector_energy_key(connector_id: u32) -> String {
    format!("connector.{connector_id}.energy")
}

/// Backend session id waiting for the device's StartTransaction.
pub(crate) fn pending_session_key(connector_id: u32) -> String {
    format!("connector.{connector_id}.pendingSession")
}

pub(crate) fn transaction_session_key(transaction_id: i32) -> String {
    format!("transaction.{transaction_id}")
}

pub(crate) const ACTIVE_TRANSACTION_KEY: &str = "activeTransactionId";
