//! Protocol manager
//!
//! Single entry point for external collaborators. Holds one service per
//! protocol type plus two device maps: the owning protocol type and a
//! connected flag used for cross-protocol counts. A service failure is
//! always turned into a failure response, never propagated.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::application::events::{SharedEventListener, SharedEventSink};
use crate::application::session::{EvictionListener, EvictionReason};
use crate::domain::ProtocolType;

use super::request::{ProtocolRequest, ProtocolResponse};
use super::service::{ProtocolError, SharedProtocolService};

pub struct ProtocolManager {
    services: DashMap<ProtocolType, SharedProtocolService>,
    device_protocols: DashMap<String, ProtocolType>,
    device_connections: DashMap<String, bool>,
    default_protocol: ProtocolType,
    events: SharedEventSink,
}

pub type SharedProtocolManager = Arc<ProtocolManager>;

impl ProtocolManager {
    pub fn new(default_protocol: ProtocolType, events: SharedEventSink) -> Self {
        Self {
            services: DashMap::new(),
            device_protocols: DashMap::new(),
            device_connections: DashMap::new(),
            default_protocol,
            events,
        }
    }

    pub fn register(&self, service: SharedProtocolService) {
        let protocol_type = service.protocol_type();
        info!(protocol = %protocol_type, "Registering protocol service");
        if self.services.insert(protocol_type, service).is_some() {
            warn!(protocol = %protocol_type, "Replaced existing protocol service");
        }
    }

    pub fn service(&self, protocol_type: ProtocolType) -> Option<SharedProtocolService> {
        self.services.get(&protocol_type).map(|s| Arc::clone(s.value()))
    }

    pub fn default_protocol(&self) -> ProtocolType {
        self.default_protocol
    }

    /// Owning protocol of `device_code`, falling back to the default.
    pub fn protocol_type_of(&self, device_code: &str) -> ProtocolType {
        match self.device_protocols.get(device_code) {
            Some(t) => *t,
            None => {
                debug!(device_id = device_code, default = %self.default_protocol, "Unknown device, using default protocol");
                self.default_protocol
            }
        }
    }

    pub fn set_device_protocol(&self, device_code: &str, protocol_type: ProtocolType) {
        info!(device_id = device_code, protocol = %protocol_type, "Device protocol set");
        self.device_protocols
            .insert(device_code.to_string(), protocol_type);
    }

    pub fn handle_request(&self, mut request: ProtocolRequest) -> ProtocolResponse {
        if request.device_code.trim().is_empty() {
            return ProtocolResponse::failure("400", "Device code is required")
                .with_request_id(request.request_id);
        }

        let protocol_type = self.resolve(&mut request);

        let response = match self.service(protocol_type) {
            Some(service) => match service.handle_request(&request) {
                Ok(response) => {
                    if response.success && service.is_connected(&request.device_code) {
                        self.mark_connected(&request.device_code, protocol_type);
                    }
                    response
                }
                Err(e) => self.failure(&request, e),
            },
            None => self.failure(&request, ProtocolError::ServiceNotFound(protocol_type)),
        };

        response
            .with_request_id(request.request_id)
            .with_protocol_type(protocol_type)
    }

    pub fn register_device(&self, mut request: ProtocolRequest) -> ProtocolResponse {
        let protocol_type = self.resolve(&mut request);

        let response = match self.service(protocol_type) {
            Some(service) => match service.register_device(&request) {
                Ok(response) => {
                    self.set_device_protocol(&request.device_code, protocol_type);
                    response
                }
                Err(e) => self.failure(&request, e),
            },
            None => self.failure(&request, ProtocolError::ServiceNotFound(protocol_type)),
        };

        response
            .with_request_id(request.request_id)
            .with_protocol_type(protocol_type)
    }

    pub fn connect(&self, device_code: &str, protocol_type: ProtocolType) -> bool {
        info!(device_id = device_code, protocol = %protocol_type, "Connecting device");
        let Some(service) = self.service(protocol_type) else {
            warn!(protocol = %protocol_type, "No service registered for protocol");
            self.device_connections.insert(device_code.to_string(), false);
            return false;
        };

        let connected = service.connect(device_code);
        if connected {
            self.mark_connected(device_code, protocol_type);
        } else {
            warn!(device_id = device_code, protocol = %protocol_type, "Device connect failed");
            self.device_connections.insert(device_code.to_string(), false);
        }
        connected
    }

    pub fn disconnect(&self, device_code: &str) {
        let protocol_type = self.protocol_type_of(device_code);
        info!(device_id = device_code, protocol = %protocol_type, "Disconnecting device");
        match self.service(protocol_type) {
            Some(service) => service.disconnect(device_code),
            None => warn!(protocol = %protocol_type, "No service registered for protocol"),
        }
        self.device_connections.insert(device_code.to_string(), false);
    }

    /// Record a connection the transport admitted on its own.
    pub fn record_connected(&self, device_code: &str, protocol_type: ProtocolType) {
        self.mark_connected(device_code, protocol_type);
    }

    /// Record a disconnect the transport already handled.
    pub fn record_disconnected(&self, device_code: &str) {
        if let Some(mut flag) = self.device_connections.get_mut(device_code) {
            *flag = false;
            debug!(device_id = device_code, "Device marked disconnected");
        }
    }

    pub fn is_device_connected(&self, device_code: &str) -> bool {
        self.device_connections
            .get(device_code)
            .map(|c| *c)
            .unwrap_or(false)
    }

    pub fn connected_device_count(&self, protocol_type: ProtocolType) -> usize {
        self.device_connections
            .iter()
            .filter(|e| *e.value() && self.protocol_type_of(e.key()) == protocol_type)
            .count()
    }

    pub fn registered_protocol_types(&self) -> Vec<ProtocolType> {
        ProtocolType::ALL
            .iter()
            .copied()
            .filter(|t| self.services.contains_key(t))
            .collect()
    }

    /// Connected device count per registered protocol type.
    pub fn protocol_statistics(&self) -> HashMap<ProtocolType, usize> {
        self.registered_protocol_types()
            .into_iter()
            .map(|t| (t, self.connected_device_count(t)))
            .collect()
    }

    pub fn device_statuses(&self) -> HashMap<String, bool> {
        self.device_connections
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// Forget everything known about `device_code`.
    pub fn purge(&self, device_code: &str) -> bool {
        let had_protocol = self.device_protocols.remove(device_code).is_some();
        let had_connection = self.device_connections.remove(device_code).is_some();
        if had_protocol || had_connection {
            info!(device_id = device_code, "Device purged");
        }
        had_protocol || had_connection
    }

    /// Drop bookkeeping for devices marked disconnected. Returns how many.
    pub fn cleanup_disconnected_devices(&self) -> usize {
        let stale: Vec<String> = self
            .device_connections
            .iter()
            .filter(|e| !*e.value())
            .map(|e| e.key().clone())
            .collect();
        let mut removed = 0;
        for device_code in &stale {
            // Re-check: the device may have reconnected since the scan.
            if self
                .device_connections
                .remove_if(device_code, |_, connected| !*connected)
                .is_some()
            {
                self.device_protocols.remove(device_code);
                info!(device_id = %device_code, "Removed disconnected device");
                removed += 1;
            }
        }
        removed
    }

    /// Install `listener` for every service. Last write wins.
    pub fn set_event_listener(&self, listener: SharedEventListener) {
        self.events.set(listener.clone());
        for service in self.services.iter() {
            service.set_event_listener(listener.clone());
        }
    }

    fn resolve(&self, request: &mut ProtocolRequest) -> ProtocolType {
        let protocol_type = match request.protocol_type {
            Some(t) => t,
            None => self.protocol_type_of(&request.device_code),
        };
        request.protocol_type = Some(protocol_type);
        protocol_type
    }

    fn mark_connected(&self, device_code: &str, protocol_type: ProtocolType) {
        self.device_protocols
            .insert(device_code.to_string(), protocol_type);
        self.device_connections.insert(device_code.to_string(), true);
    }

    fn failure(&self, request: &ProtocolRequest, e: ProtocolError) -> ProtocolResponse {
        if e.code() == "500" {
            error!(
                device_id = %request.device_code,
                action = %request.action,
                request_id = %request.request_id,
                error = %e,
                "Protocol request failed"
            );
        } else {
            warn!(
                device_id = %request.device_code,
                action = %request.action,
                error = %e,
                "Protocol request rejected"
            );
        }
        e.into_response()
    }
}

/// Sessions removed by the registry (heartbeat timeout, idle sweep,
/// shutdown) no longer count as connected.
impl EvictionListener for ProtocolManager {
    fn on_evicted(&self, device_code: &str, reason: EvictionReason) {
        debug!(device_id = device_code, reason = reason.as_str(), "Session evicted by registry");
        self.record_disconnected(device_code);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::testing::RecordingListener;
    use crate::application::events::EventSink;
    use crate::application::protocol::service::ProtocolService;
    use std::sync::Mutex;

    /// Service double recording calls; `fail` makes every request error.
    #[derive(Default)]
    struct FakeService {
        kind: Option<ProtocolType>,
        fail: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FakeService {
        fn new(kind: ProtocolType) -> Self {
            Self {
                kind: Some(kind),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ProtocolService for FakeService {
        fn protocol_type(&self) -> ProtocolType {
            self.kind.unwrap_or(ProtocolType::Ocpp)
        }

        fn connect(&self, device_id: &str) -> bool {
            self.calls.lock().unwrap().push(format!("connect:{device_id}"));
            !self.fail
        }

        fn disconnect(&self, device_id: &str) {
            self.calls.lock().unwrap().push(format!("disconnect:{device_id}"));
        }

        fn handle_request(
            &self,
            request: &ProtocolRequest,
        ) -> Result<ProtocolResponse, ProtocolError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("request:{}", request.action));
            if self.fail {
                Err(ProtocolError::Internal("exploded".into()))
            } else {
                Ok(ProtocolResponse::ok())
            }
        }

        fn register_device(
            &self,
            _request: &ProtocolRequest,
        ) -> Result<ProtocolResponse, ProtocolError> {
            Ok(ProtocolResponse::ok())
        }

        fn set_event_listener(&self, _listener: SharedEventListener) {
            self.calls.lock().unwrap().push("listener".into());
        }

        fn is_connected(&self, _device_id: &str) -> bool {
            !self.fail
        }
    }

    fn manager() -> ProtocolManager {
        ProtocolManager::new(ProtocolType::Ocpp, EventSink::shared(None))
    }

    #[test]
    fn request_routes_to_default_protocol_for_unknown_device() {
        let m = manager();
        let ocpp = Arc::new(FakeService::new(ProtocolType::Ocpp));
        let cloud = Arc::new(FakeService::new(ProtocolType::CloudCharge));
        m.register(ocpp.clone());
        m.register(cloud.clone());

        let resp = m.handle_request(ProtocolRequest::new(None, "CP-1", "heartbeat"));
        assert!(resp.success);
        assert_eq!(resp.protocol_type, Some(ProtocolType::Ocpp));
        assert_eq!(ocpp.calls(), vec!["request:heartbeat"]);
        assert!(cloud.calls().is_empty());
    }

    #[test]
    fn connect_records_protocol_and_routes_later_requests() {
        let m = manager();
        let cloud = Arc::new(FakeService::new(ProtocolType::CloudCharge));
        m.register(Arc::new(FakeService::new(ProtocolType::Ocpp)));
        m.register(cloud.clone());

        assert!(m.connect("CC-1", ProtocolType::CloudCharge));
        assert!(m.is_device_connected("CC-1"));
        assert_eq!(m.protocol_type_of("CC-1"), ProtocolType::CloudCharge);

        m.handle_request(ProtocolRequest::new(None, "CC-1", "stop"));
        assert_eq!(cloud.calls(), vec!["connect:CC-1", "request:stop"]);
        assert_eq!(m.connected_device_count(ProtocolType::CloudCharge), 1);
        assert_eq!(m.connected_device_count(ProtocolType::Ocpp), 0);
    }

    #[test]
    fn service_failure_becomes_500_response() {
        let m = manager();
        m.register(Arc::new(FakeService {
            kind: Some(ProtocolType::Ocpp),
            fail: true,
            ..FakeService::default()
        }));

        let resp = m.handle_request(
            ProtocolRequest::new(None, "CP-1", "heartbeat").with_request_id("req-1"),
        );
        assert!(!resp.success);
        assert_eq!(resp.code, "500");
        assert!(resp.message.starts_with("Internal server error"));
        assert_eq!(resp.request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn missing_service_is_400() {
        let m = manager();
        let resp = m.handle_request(ProtocolRequest::new(
            Some(ProtocolType::CloudCharge),
            "CC-1",
            "heartbeat",
        ));
        assert_eq!(resp.code, "400");
        assert!(!m.connect("CC-1", ProtocolType::CloudCharge));
    }

    #[test]
    fn blank_device_code_is_rejected() {
        let m = manager();
        m.register(Arc::new(FakeService::new(ProtocolType::Ocpp)));
        let resp = m.handle_request(ProtocolRequest::new(None, "  ", "heartbeat"));
        assert_eq!(resp.code, "400");
    }

    #[test]
    fn disconnect_and_cleanup() {
        let m = manager();
        let ocpp = Arc::new(FakeService::new(ProtocolType::Ocpp));
        m.register(ocpp.clone());
        m.connect("CP-1", ProtocolType::Ocpp);
        m.connect("CP-2", ProtocolType::Ocpp);

        m.disconnect("CP-1");
        assert!(!m.is_device_connected("CP-1"));
        assert!(ocpp.calls().contains(&"disconnect:CP-1".to_string()));

        m.record_disconnected("CP-2");
        assert_eq!(m.cleanup_disconnected_devices(), 2);
        assert!(m.device_statuses().is_empty());
        assert!(!m.purge("CP-1"));
    }

    #[test]
    fn statistics_cover_registered_types() {
        let m = manager();
        m.register(Arc::new(FakeService::new(ProtocolType::Ocpp)));
        m.register(Arc::new(FakeService::new(ProtocolType::CloudCharge)));
        m.record_connected("CP-1", ProtocolType::Ocpp);
        m.record_connected("CP-2", ProtocolType::Ocpp);
        m.record_connected("CC-1", ProtocolType::CloudCharge);

        assert_eq!(
            m.registered_protocol_types(),
            vec![ProtocolType::Ocpp, ProtocolType::CloudCharge]
        );
        let stats = m.protocol_statistics();
        assert_eq!(stats[&ProtocolType::Ocpp], 2);
        assert_eq!(stats[&ProtocolType::CloudCharge], 1);
    }

    #[test]
    fn listener_reaches_every_service_last_write_wins() {
        let events = EventSink::shared(None);
        let m = ProtocolManager::new(ProtocolType::Ocpp, events.clone());
        let ocpp = Arc::new(FakeService::new(ProtocolType::Ocpp));
        m.register(ocpp.clone());

        let first = Arc::new(RecordingListener::default());
        let second = Arc::new(RecordingListener::default());
        m.set_event_listener(first.clone());
        m.set_event_listener(second.clone());

        events.emit(crate::domain::ProtocolEvent::heartbeat("CP-1", ProtocolType::Ocpp));
        assert!(first.events().is_empty());
        assert_eq!(second.events().len(), 1);
        assert_eq!(ocpp.calls(), vec!["listener", "listener"]);
    }
}
