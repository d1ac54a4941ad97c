//! StartTransaction handler

use chrono::Utc;
use rust_ocpp::v1_6::messages::start_transaction::{
    StartTransactionRequest, StartTransactionResponse,
};
use rust_ocpp::v1_6::types::{AuthorizationStatus, IdTagInfo};
use tracing::{info, warn};

use super::{
    parse, pending_session_key, respond, transaction_session_key, ACTIVE_TRANSACTION_KEY,
};
use crate::application::handlers::dispatcher::{Action, HandlerResult, MessageDispatcher};
use crate::application::session::Session;
use crate::domain::{ProtocolEvent, TransactionStartAckEvent};
use crate::support::ocpp_frame::Payload;

pub fn handle_start_transaction(
    dispatcher: &MessageDispatcher,
    session: &Session,
    payload: Payload,
) -> HandlerResult {
    let req: StartTransactionRequest = parse(Action::StartTransaction, payload)?;

    info!(
        device_id = session.device_code(),
        connector_id = req.connector_id,
        id_tag = req.id_tag.as_str(),
        meter_start = req.meter_start,
        "StartTransaction"
    );

    // A remote start from the backend leaves its session id on the connector.
    let pending = session
        .remove_attribute(&pending_session_key(req.connector_id))
        .and_then(|v| v.as_str().map(str::to_string));

    if req.id_tag.trim().is_empty() {
        warn!(device_id = session.device_code(), "StartTransaction with blank idTag");
        dispatcher.emit(ProtocolEvent::TransactionStartAck(TransactionStartAckEvent {
            device_id: session.device_code().to_string(),
            protocol_type: session.protocol_type(),
            session_id: pending.unwrap_or_default(),
            transaction_id: None,
            accepted: false,
            message: "Invalid id tag".to_string(),
            timestamp: Utc::now(),
        }));
        return respond(&StartTransactionResponse {
            transaction_id: 0,
            id_tag_info: IdTagInfo {
                status: AuthorizationStatus::Invalid,
                expiry_date: None,
                parent_id_tag: None,
            },
        });
    }

    let transaction_id = dispatcher.transactions().next();
    let session_id = pending.unwrap_or_else(|| format!("TXN_{transaction_id}"));
    session.set_attribute(transaction_session_key(transaction_id), session_id.clone());
    session.set_attribute(ACTIVE_TRANSACTION_KEY, transaction_id);

    dispatcher.emit(ProtocolEvent::TransactionStartAck(TransactionStartAckEvent {
        device_id: session.device_code().to_string(),
        protocol_type: session.protocol_type(),
        session_id,
        transaction_id: Some(transaction_id),
        accepted: true,
        message: "Transaction started".to_string(),
        timestamp: req.timestamp,
    }));

    respond(&StartTransactionResponse {
        transaction_id,
        id_tag_info: IdTagInfo {
            status: AuthorizationStatus::Accepted,
            expiry_date: None,
            parent_id_tag: None,
        },
    })
}
