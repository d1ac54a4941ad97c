//! CloudCharge family service
//!
//! Request/response devices have no transport. Each one is represented by
//! a transport-less session so heartbeat and idle checks treat both
//! families alike. A request from an unknown device admits it implicitly.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};

use crate::application::events::{SharedEventListener, SharedEventSink};
use crate::application::handlers::connector_status_key;
use crate::application::session::{EvictionReason, Session, SharedSessionRegistry};
use crate::config::CloudChargeConfig;
use crate::domain::{
    ProtocolEvent, ProtocolType, StatusChangeEvent, TransactionStartAckEvent,
    TransactionStopAckEvent,
};

use super::request::{ProtocolRequest, ProtocolResponse, RequestAction};
use super::service::{ProtocolError, ProtocolService};

const ACTIVE_SESSION_KEY: &str = "activeSessionId";

#[derive(Debug, Clone)]
pub struct CloudChargeSettings {
    /// Seconds until the device's next heartbeat, returned on every heartbeat.
    pub next_heartbeat: u32,
    pub api_version: String,
}

impl Default for CloudChargeSettings {
    fn default() -> Self {
        Self::from(&CloudChargeConfig::default())
    }
}

impl From<&CloudChargeConfig> for CloudChargeSettings {
    fn from(cfg: &CloudChargeConfig) -> Self {
        Self {
            next_heartbeat: cfg.next_heartbeat,
            api_version: cfg.api_version.clone(),
        }
    }
}

pub struct CloudChargeProtocolService {
    registry: SharedSessionRegistry,
    events: SharedEventSink,
    settings: CloudChargeSettings,
}

impl CloudChargeProtocolService {
    pub fn new(
        registry: SharedSessionRegistry,
        events: SharedEventSink,
        settings: CloudChargeSettings,
    ) -> Self {
        Self {
            registry,
            events,
            settings,
        }
    }

    /// Live session for `device_id`, admitting a fresh one if needed.
    /// A live session of another family is never replaced.
    fn session(&self, device_id: &str) -> Result<Arc<Session>, ProtocolError> {
        let (session, admitted) = self.registry.get_or_admit(device_id, || {
            Session::new(
                device_id,
                ProtocolType::CloudCharge,
                self.settings.next_heartbeat,
            )
        })?;

        if session.protocol_type() != ProtocolType::CloudCharge {
            return Err(ProtocolError::WrongProtocol {
                expected: ProtocolType::CloudCharge,
                got: session.protocol_type(),
            });
        }
        if admitted {
            session.authenticate();
            info!(device_id, "CloudCharge device admitted");
        }
        Ok(session)
    }

    fn heartbeat(&self, session: &Session) -> ProtocolResponse {
        debug!(device_id = session.device_code(), "CloudCharge heartbeat");
        self.events.emit(ProtocolEvent::heartbeat(
            session.device_code(),
            ProtocolType::CloudCharge,
        ));
        ProtocolResponse::ok_with(json!({
            "timestamp": Utc::now(),
            "nextHeartbeat": self.settings.next_heartbeat,
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
            .and_then(|c| u32::try_from(c).ok())
            .unwrap_or(0);

        let key = connector_status_key(connector_id);
        let old_status = session
            .attribute(&key)
            .and_then(|v| v.as_i64())
            .and_then(|v| i32::try_from(v).ok());
        session.set_attribute(key, status);

        info!(device_id = session.device_code(), status, ?old_status, "CloudCharge status");
        self.events.emit(ProtocolEvent::StatusChange(StatusChangeEvent {
            device_id: session.device_code().to_string(),
            protocol_type: ProtocolType::CloudCharge,
            connector_id: (connector_id != 0).then_some(connector_id),
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

        info!(device_id = session.device_code(), session_id, "CloudCharge start");
        session.set_attribute(ACTIVE_SESSION_KEY, session_id);

        let message = "Charging started successfully";
        self.events
            .emit(ProtocolEvent::TransactionStartAck(TransactionStartAckEvent {
                device_id: session.device_code().to_string(),
                protocol_type: ProtocolType::CloudCharge,
                session_id: session_id.to_string(),
                transaction_id: None,
                accepted: true,
                message: message.to_string(),
                timestamp: Utc::now(),
            }));

        Ok(ProtocolResponse::ok_with(json!({
            "sessionId": session_id,
            "timestamp": Utc::now(),
            "status": "charging",
        }))
        .with_message(message))
    }

    fn stop(&self, session: &Session, request: &ProtocolRequest) -> ProtocolResponse {
        let session_id = request.session_id.clone().or_else(|| {
            session
                .remove_attribute(ACTIVE_SESSION_KEY)
                .and_then(|v| v.as_str().map(str::to_string))
        });
        let energy = request.data_f64("energy").unwrap_or(0.0);
        let duration = request.data_i64("duration").unwrap_or(0);
        let reason = request.data_str("reason").unwrap_or("Manual stop");

        info!(
            device_id = session.device_code(),
            ?session_id,
            energy,
            duration,
            reason,
            "CloudCharge stop"
        );

        let message = "Charging stopped successfully";
        self.events
            .emit(ProtocolEvent::TransactionStopAck(TransactionStopAckEvent {
                device_id: session.device_code().to_string(),
                protocol_type: ProtocolType::CloudCharge,
                session_id: session_id.clone(),
                transaction_id: None,
                accepted: true,
                message: message.to_string(),
                timestamp: Utc::now(),
            }));

        ProtocolResponse::ok_with(json!({
            "sessionId": session_id,
            "timestamp": Utc::now(),
            "status": "stopped",
            "energy": energy,
            "duration": duration,
        }))
        .with_message(message)
    }
}

impl ProtocolService for CloudChargeProtocolService {
    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::CloudCharge
    }

    fn connect(&self, device_id: &str) -> bool {
        match self.session(device_id) {
            Ok(_) => true,
            Err(e) => {
                info!(device_id, error = %e, "CloudCharge connect refused");
                false
            }
        }
    }

    fn disconnect(&self, device_id: &str) {
        if !self.registry.evict_with(device_id, EvictionReason::Requested) {
            debug!(device_id, "No CloudCharge session to disconnect");
        }
    }

    fn handle_request(&self, request: &ProtocolRequest) -> Result<ProtocolResponse, ProtocolError> {
        if let Some(got) = request
            .protocol_type
            .filter(|t| *t != ProtocolType::CloudCharge)
        {
            return Err(ProtocolError::WrongProtocol {
                expected: ProtocolType::CloudCharge,
                got,
            });
        }
        let action = request
            .parsed_action()
            .ok_or_else(|| ProtocolError::UnsupportedAction(request.action.clone()))?;

        let session = self.session(&request.device_code)?;
        self.registry.touch(session.device_code());

        let response = match action {
            RequestAction::Heartbeat => self.heartbeat(&session),
            RequestAction::Status => self.status(&session, request)?,
            RequestAction::Start => self.start(&session, request)?,
            RequestAction::Stop => self.stop(&session, request),
            RequestAction::Register => self.register_device(request)?,
        };
        Ok(response)
    }

    fn register_device(
        &self,
        request: &ProtocolRequest,
    ) -> Result<ProtocolResponse, ProtocolError> {
        let session = self.session(&request.device_code)?;
        for (key, value) in &request.data {
            session.set_attribute(key.clone(), value.clone());
        }
        info!(device_id = session.device_code(), "CloudCharge device registered");
        Ok(ProtocolResponse::ok_with(json!({
            "deviceCode": session.device_code(),
            "apiVersion": self.settings.api_version,
            "registered": true,
        })))
    }

    fn set_event_listener(&self, listener: SharedEventListener) {
        self.events.set(listener);
    }

    fn is_connected(&self, device_id: &str) -> bool {
        self.registry
            .get(device_id)
            .is_some_and(|s| s.is_live() && s.protocol_type() == ProtocolType::CloudCharge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::testing::RecordingListener;
    use crate::application::events::EventSink;
    use crate::application::protocol::ProtocolManager;
    use crate::application::session::{EvictionListener, RegistryLimits, SessionRegistry};
    use crate::domain::SessionStatus;
    use std::sync::Weak;

    fn fixture(
        limits: RegistryLimits,
    ) -> (
        SharedSessionRegistry,
        Arc<RecordingListener>,
        CloudChargeProtocolService,
    ) {
        let registry = SessionRegistry::shared(limits);
        let listener = Arc::new(RecordingListener::default());
        let events = EventSink::shared(Some(listener.clone()));
        let service = CloudChargeProtocolService::new(
            registry.clone(),
            events,
            CloudChargeSettings::default(),
        );
        (registry, listener, service)
    }

    fn request(action: &str) -> ProtocolRequest {
        ProtocolRequest::new(Some(ProtocolType::CloudCharge), "CC-1", action)
    }

    #[test]
    fn connect_admits_authenticated_session_without_transport() {
        let (registry, _, service) = fixture(RegistryLimits::default());
        assert!(service.connect("CC-1"));
        let session = registry.get("CC-1").unwrap();
        assert_eq!(session.status(), SessionStatus::Authenticated);
        assert!(!session.has_transport());
        assert!(service.is_connected("CC-1"));
    }

    #[test]
    fn connect_refused_at_capacity() {
        let limits = RegistryLimits {
            max_sessions: 0,
            ..RegistryLimits::default()
        };
        let (_, _, service) = fixture(limits);
        assert!(!service.connect("CC-1"));
    }

    #[test]
    fn heartbeat_admits_implicitly_and_emits() {
        let (registry, listener, service) = fixture(RegistryLimits::default());
        let resp = service.handle_request(&request("heartbeat")).unwrap();
        assert!(resp.success);
        assert_eq!(resp.data.as_ref().unwrap()["nextHeartbeat"], 60);
        assert!(registry.contains("CC-1"));
        assert!(matches!(&listener.events()[..], [ProtocolEvent::Heartbeat(_)]));
    }

    #[test]
    fn status_tracks_previous_value() {
        let (_, listener, service) = fixture(RegistryLimits::default());
        service
            .handle_request(&request("status").with_data("status", 1))
            .unwrap();
        service
            .handle_request(&request("status").with_data("status", 3))
            .unwrap();

        let events = listener.events();
        match &events[1] {
            ProtocolEvent::StatusChange(e) => {
                assert_eq!(e.old_status, Some(1));
                assert_eq!(e.new_status, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn status_without_value_is_invalid() {
        let (_, listener, service) = fixture(RegistryLimits::default());
        let err = service.handle_request(&request("status")).unwrap_err();
        assert_eq!(err.code(), "400");
        assert!(listener.events().is_empty());
    }

    #[test]
    fn start_emits_accepted_ack() {
        let (_, listener, service) = fixture(RegistryLimits::default());
        let resp = service
            .handle_request(&request("start").with_session_id("S-1"))
            .unwrap();
        assert_eq!(resp.message, "Charging started successfully");
        assert_eq!(resp.data.as_ref().unwrap()["status"], "charging");

        match &listener.events()[..] {
            [ProtocolEvent::TransactionStartAck(e)] => {
                assert!(e.accepted);
                assert_eq!(e.session_id, "S-1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn stop_reports_energy_and_duration() {
        let (_, listener, service) = fixture(RegistryLimits::default());
        service
            .handle_request(&request("start").with_session_id("S-1"))
            .unwrap();
        let resp = service
            .handle_request(
                &request("stop")
                    .with_data("energy", 7.5)
                    .with_data("duration", 600),
            )
            .unwrap();

        let data = resp.data.unwrap();
        assert_eq!(data["sessionId"], "S-1");
        assert_eq!(data["status"], "stopped");
        assert_eq!(data["energy"], 7.5);
        assert_eq!(data["duration"], 600);
        assert!(matches!(
            listener.events().last(),
            Some(ProtocolEvent::TransactionStopAck(e)) if e.accepted
        ));
    }

    #[test]
    fn ocpp_session_is_not_taken_over() {
        let (registry, _, service) = fixture(RegistryLimits::default());
        let (ocpp, mut rx) = Session::channel("CC-1", ProtocolType::Ocpp, 60);
        let ocpp = Arc::new(ocpp);
        registry.admit(ocpp.clone()).unwrap();

        let err = service.handle_request(&request("heartbeat")).unwrap_err();
        assert_eq!(err.code(), "400");
        assert!(!service.connect("CC-1"));
        assert!(ocpp.is_live());
        assert!(Arc::ptr_eq(&registry.get("CC-1").unwrap(), &ocpp));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn concurrent_first_requests_share_one_session() {
        let (registry, listener, service) = fixture(RegistryLimits::default());
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    assert!(service.handle_request(&request("heartbeat")).unwrap().success);
                });
            }
        });

        let session = registry.get("CC-1").unwrap();
        assert_eq!(session.status(), SessionStatus::Authenticated);
        assert_eq!(session.message_count(), 8);
        assert_eq!(listener.events().len(), 8);
    }

    #[test]
    fn registry_eviction_clears_manager_connection() {
        let (registry, _, service) = fixture(RegistryLimits::default());
        let manager = Arc::new(ProtocolManager::new(
            ProtocolType::CloudCharge,
            EventSink::shared(None),
        ));
        manager.register(Arc::new(service));
        let listener: Weak<dyn EvictionListener> = Arc::<ProtocolManager>::downgrade(&manager);
        registry.set_eviction_listener(listener);

        assert!(manager.handle_request(request("heartbeat")).success);
        assert_eq!(manager.connected_device_count(ProtocolType::CloudCharge), 1);

        let later = Utc::now() + chrono::Duration::seconds(100_000);
        assert_eq!(registry.check_heartbeats_at(later), vec!["CC-1".to_string()]);
        assert!(!manager.is_device_connected("CC-1"));
        assert_eq!(manager.connected_device_count(ProtocolType::CloudCharge), 0);

        // The next request re-admits the device.
        assert!(manager.handle_request(request("heartbeat")).success);
        assert!(manager.is_device_connected("CC-1"));
    }
}
