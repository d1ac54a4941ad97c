//! Heartbeat handler

use chrono::Utc;
use rust_ocpp::v1_6::messages::heart_beat::HeartbeatResponse;
use tracing::debug;

use super::respond;
use crate::application::handlers::dispatcher::{HandlerResult, MessageDispatcher};
use crate::application::session::Session;
use crate::domain::ProtocolEvent;
use crate::support::ocpp_frame::Payload;

pub fn handle_heartbeat(
    dispatcher: &MessageDispatcher,
    session: &Session,
    _payload: Payload,
) -> HandlerResult {
    debug!(device_id = session.device_code(), "Heartbeat");

    dispatcher.emit(ProtocolEvent::heartbeat(
        session.device_code(),
        session.protocol_type(),
    ));

    respond(&HeartbeatResponse {
        current_time: Utc::now(),
    })
}
