//! StatusNotification handler

use chrono::Utc;
use rust_ocpp::v1_6::messages::status_notification::{
    StatusNotificationRequest, StatusNotificationResponse,
};
use tracing::info;

use super::{connector_status_key, parse, respond};
use crate::application::handlers::dispatcher::{Action, HandlerResult, MessageDispatcher};
use crate::application::session::Session;
use crate::domain::ocpp::status_code;
use crate::domain::{ProtocolEvent, StatusChangeEvent};
use crate::support::ocpp_frame::Payload;

pub fn handle_status_notification(
    dispatcher: &MessageDispatcher,
    session: &Session,
    payload: Payload,
) -> HandlerResult {
    let req: StatusNotificationRequest = parse(Action::StatusNotification, payload)?;

    let new_status = status_code(&req.status);
    let key = connector_status_key(req.connector_id);
    let old_status = session
        .attribute(&key)
        .and_then(|v| v.as_i64())
        .and_then(|v| i32::try_from(v).ok());
    session.set_attribute(key, new_status);

    let error_code = serde_json::to_value(&req.error_code)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .filter(|code| code != "NoError");

    info!(
        device_id = session.device_code(),
        connector_id = req.connector_id,
        status = ?req.status,
        error_code = ?error_code,
        "StatusNotification"
    );

    dispatcher.emit(ProtocolEvent::StatusChange(StatusChangeEvent {
        device_id: session.device_code().to_string(),
        protocol_type: session.protocol_type(),
        connector_id: Some(req.connector_id),
        old_status,
        new_status,
        error_code,
        timestamp: req.timestamp.unwrap_or_else(Utc::now),
    }));

    respond(&StatusNotificationResponse {})
}
