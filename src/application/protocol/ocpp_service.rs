//! OCPP family service
//!
//! Devices reach the gateway over their own WebSocket; this service only
//! acts on sessions the transport has already admitted. Backend requests
//! become outbound Calls, and their outcome arrives later through the
//! device's own StartTransaction / StopTransaction.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashSet;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::application::commands::{
    remote_start_transaction, remote_stop_transaction, trigger_boot_notification,
    SharedCommandSender,
};
use crate::application::events::{SharedEventListener, SharedEventSink};
use crate::application::handlers::{
    connector_status_key, pending_session_key, ACTIVE_TRANSACTION_KEY,
};
use crate::application::session::{EvictionReason, Session, SharedSessionRegistry};
use crate::domain::{ProtocolEvent, ProtocolType, StatusChangeEvent};

use super::request::{ProtocolRequest, ProtocolResponse, RequestAction};
use super::service::{ProtocolError, ProtocolService};

const DEFAULT_CONNECTOR: u32 = 1;

pub struct OcppProtocolService {
    registry: SharedSessionRegistry,
    commands: SharedCommandSender,
    events: SharedEventSink,
    /// Devices announced by the backend that have not opened a socket yet.
    awaiting: DashSet<String>,
}

impl OcppProtocolService {
    pub fn new(
        registry: SharedSessionRegistry,
        commands: SharedCommandSender,
        events: SharedEventSink,
    ) -> Self {
        Self {
            registry,
            commands,
            events,
            awaiting: DashSet::new(),
        }
    }

    pub fn is_awaiting(&self, device_id: &str) -> bool {
        self.awaiting.contains(device_id)
    }

    fn live_session(&self, device_id: &str) -> Result<Arc<Session>, ProtocolError> {
        self.registry
            .get(device_id)
            .filter(|s| s.is_live() && s.protocol_type() == ProtocolType::Ocpp)
            .ok_or_else(|| ProtocolError::NotConnected(device_id.to_string()))
    }

    fn heartbeat(&self, session: &Session) -> ProtocolResponse {
        // Devices send their own Heartbeat; this only refreshes liveness.
        session.touch();
        ProtocolResponse::ok_with(json!({
            "timestamp": Utc::now(),
            "status": session.status().as_str(),
        }))
    }

    fn status(
        &self,
        session: &Session,
        request: &ProtocolRequest,
    ) -> Result<ProtocolResponse, ProtocolError> {
        let status = request
            .data_i64("status")
            .and_then(|s| i32::try_from(s).ok())
            .ok_or_else(|| ProtocolError::InvalidRequest("status is required".to_string()))?;
        let connector_id = request
            .data_i64("connectorId")
            .and_then(|c| u32::try_from(c).ok());

        let old_status = connector_id.and_then(|id| {
            session
                .attribute(&connector_status_key(id))
                .and_then(|v| v.as_i64())
                .and_then(|v| i32::try_from(v).ok())
        });
        if let Some(id) = connector_id {
            session.set_attribute(connector_status_key(id), status);
        }

        info!(device_id = session.device_code(), ?connector_id, status, "Status updated via OCPP service");
        self.events.emit(ProtocolEvent::StatusChange(StatusChangeEvent {
            device_id: session.device_code().to_string(),
            protocol_type: ProtocolType::Ocpp,
            connector_id,
            old_status,
            new_status: status,
            error_code: request.data_str("errorCode").map(str::to_string),
            timestamp: Utc::now(),
        }));

        Ok(ProtocolResponse::ok_with(json!({
            "timestamp": Utc::now(),
            "status": "received",
        })))
    }

    fn start(
        &self,
        session: &Session,
        request: &ProtocolRequest,
    ) -> Result<ProtocolResponse, ProtocolError> {
        let session_id = request
            .session_id
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ProtocolError::InvalidRequest("sessionId is required".to_string()))?;
        let connector_id = request
            .data_i64("connectorId")
            .and_then(|c| u32::try_from(c).ok())
            .unwrap_or(DEFAULT_CONNECTOR);
        let id_tag = request.data_str("idTag").unwrap_or(session_id);

        session.set_attribute(pending_session_key(connector_id), session_id);
        let message_id = match remote_start_transaction(
            &self.commands,
            session.device_code(),
            id_tag,
            Some(connector_id),
        ) {
            Ok(id) => id,
            Err(e) => {
                session.remove_attribute(&pending_session_key(connector_id));
                return Err(e.into());
            }
        };

        Ok(ProtocolResponse::ok_with(json!({
            "sessionId": session_id,
            "connectorId": connector_id,
            "timestamp": Utc::now(),
            "status": "pending",
        }))
        .with_message("Charging start command sent")
        .with_message_id(message_id))
    }

    fn stop(
        &self,
        session: &Session,
        request: &ProtocolRequest,
    ) -> Result<ProtocolResponse, ProtocolError> {
        let transaction_id = request
            .data_i64("transactionId")
            .or_else(|| {
                session
                    .attribute(ACTIVE_TRANSACTION_KEY)
                    .as_ref()
                    .and_then(Value::as_i64)
            })
            .and_then(|t| i32::try_from(t).ok())
            .ok_or_else(|| {
                ProtocolError::InvalidRequest("transactionId is required".to_string())
            })?;

        let message_id =
            remote_stop_transaction(&self.commands, session.device_code(), transaction_id)?;

        Ok(ProtocolResponse::ok_with(json!({
            "sessionId": request.session_id,
            "transactionId": transaction_id,
            "timestamp": Utc::now(),
            "status": "stopping",
        }))
        .with_message("Charging stop command sent")
        .with_message_id(message_id))
    }
}

impl ProtocolService for OcppProtocolService {
    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::Ocpp
    }

    fn connect(&self, device_id: &str) -> bool {
        if self.registry.is_live(device_id) {
            info!(device_id, "Device already connected via OCPP");
        } else {
            info!(device_id, "Waiting for device to open its OCPP connection");
            self.awaiting.insert(device_id.to_string());
        }
        true
    }

    fn disconnect(&self, device_id: &str) {
        self.awaiting.remove(device_id);
        if !self.registry.evict_with(device_id, EvictionReason::Requested) {
            debug!(device_id, "No OCPP session to disconnect");
        }
    }

    fn handle_request(&self, request: &ProtocolRequest) -> Result<ProtocolResponse, ProtocolError> {
        if let Some(got) = request.protocol_type.filter(|t| *t != ProtocolType::Ocpp) {
            return Err(ProtocolError::WrongProtocol {
                expected: ProtocolType::Ocpp,
                got,
            });
        }
        let action = request
            .parsed_action()
            .ok_or_else(|| ProtocolError::UnsupportedAction(request.action.clone()))?;
        let session = self.live_session(&request.device_code)?;
        match action {
            RequestAction::Heartbeat => Ok(self.heartbeat(&session)),
            RequestAction::Status => self.status(&session, request),
            RequestAction::Start => self.start(&session, request),
            RequestAction::Stop => self.stop(&session, request),
            RequestAction::Register => self.register_device(request),
        }
    }

    fn register_device(
        &self,
        request: &ProtocolRequest,
    ) -> Result<ProtocolResponse, ProtocolError> {
        let session = self.live_session(&request.device_code)?;
        let message_id = trigger_boot_notification(&self.commands, session.device_code())?;
        self.awaiting.remove(session.device_code());
        Ok(ProtocolResponse::ok()
            .with_message("BootNotification requested")
            .with_message_id(message_id))
    }

    fn set_event_listener(&self, listener: SharedEventListener) {
        self.events.set(listener);
    }

    fn is_connected(&self, device_id: &str) -> bool {
        self.registry
            .get(device_id)
            .is_some_and(|s| s.is_live() && s.protocol_type() == ProtocolType::Ocpp)
    }
}
