//! StopTransaction handler

use rust_ocpp::v1_6::messages::stop_transaction::{
    StopTransactionRequest, StopTransactionResponse,
};
use rust_ocpp::v1_6::types::{AuthorizationStatus, IdTagInfo};
use serde_json::Value;
use tracing::info;

use super::{parse, respond, transaction_session_key, ACTIVE_TRANSACTION_KEY};
use crate::application::handlers::dispatcher::{Action, HandlerResult, MessageDispatcher};
use crate::application::session::Session;
use crate::domain::{ProtocolEvent, TransactionStopAckEvent};
use crate::support::ocpp_frame::Payload;

pub fn handle_stop_transaction(
    dispatcher: &MessageDispatcher,
    session: &Session,
    payload: Payload,
) -> HandlerResult {
    let req: StopTransactionRequest = parse(Action::StopTransaction, payload)?;

    info!(
        device_id = session.device_code(),
        transaction_id = req.transaction_id,
        meter_stop = req.meter_stop,
        reason = ?req.reason,
        "StopTransaction"
    );

    let session_id = session
        .remove_attribute(&transaction_session_key(req.transaction_id))
        .and_then(|v| v.as_str().map(str::to_string));
    if session.attribute(ACTIVE_TRANSACTION_KEY) == Some(Value::from(req.transaction_id)) {
        session.remove_attribute(ACTIVE_TRANSACTION_KEY);
    }

    dispatcher.emit(ProtocolEvent::TransactionStopAck(TransactionStopAckEvent {
        device_id: session.device_code().to_string(),
        protocol_type: session.protocol_type(),
        session_id,
        transaction_id: Some(req.transaction_id),
        accepted: true,
        message: format!("Transaction stopped at meter {}", req.meter_stop),
        timestamp: req.timestamp,
    }));

    // idTagInfo is only returned when the device sent an idTag.
    let id_tag_info = req.id_tag.as_ref().map(|_| IdTagInfo {
        status: AuthorizationStatus::Accepted,
        expiry_date: None,
        parent_id_tag: None,
    });

    respond(&StopTransactionResponse { id_tag_info })
}
