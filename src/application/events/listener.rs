//! Event listener slot
//!
//! Handlers and protocol services emit through one shared [`EventSink`].
//! The sink holds at most one listener (last write wins). It is handed to
//! every component at construction, so replacing the listener is visible
//! process-wide.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, warn};

use crate::domain::ProtocolEvent;

/// Callback used to forward device activity to business collaborators.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &ProtocolEvent);
}

pub type SharedEventListener = Arc<dyn EventListener>;

/// Listener that only logs. Installed when nothing else is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEventListener;

impl EventListener for LoggingEventListener {
    fn on_event(&self, event: &ProtocolEvent) {
        match event {
            ProtocolEvent::Heartbeat(e) => {
                info!(device_id = %e.device_id, protocol = %e.protocol_type, "Heartbeat event")
            }
            ProtocolEvent::StatusChange(e) => info!(
                device_id = %e.device_id,
                connector_id = ?e.connector_id,
                old_status = ?e.old_status,
                new_status = e.new_status,
                "Status change event"
            ),
            ProtocolEvent::TransactionStartAck(e) => info!(
                device_id = %e.device_id,
                session_id = %e.session_id,
                accepted = e.accepted,
                message = %e.message,
                "Transaction start ack"
            ),
            ProtocolEvent::TransactionStopAck(e) => {
                if e.accepted {
                    info!(device_id = %e.device_id, message = %e.message, "Transaction stop ack")
                } else {
                    warn!(device_id = %e.device_id, message = %e.message, "Transaction stop rejected")
                }
            }
        }
    }
}

#[derive(Default)]
pub struct EventSink {
    current: RwLock<Option<SharedEventListener>>,
}

pub type SharedEventSink = Arc<EventSink>;

impl EventSink {
    pub fn new(listener: Option<SharedEventListener>) -> Self {
        Self {
            current: RwLock::new(listener),
        }
    }

    pub fn shared(listener: Option<SharedEventListener>) -> SharedEventSink {
        Arc::new(Self::new(listener))
    }

    /// Replace the active listener.
    pub fn set(&self, listener: SharedEventListener) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn has_listener(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Deliver `event` to the active listener, if any. The listener runs
    /// outside the lock.
    pub fn emit(&self, event: ProtocolEvent) {
        let listener = self
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match listener {
            Some(listener) => listener.on_event(&event),
            None => warn!(
                event_type = event.event_type(),
                device_id = event.device_id(),
                "No event listener installed, event dropped"
            ),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Listener that records every event it receives.
    #[derive(Default)]
    pub struct RecordingListener {
        events: Mutex<Vec<ProtocolEvent>>,
    }

    impl RecordingListener {
        pub fn events(&self) -> Vec<ProtocolEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl EventListener for RecordingListener {
        fn on_event(&self, event: &ProtocolEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::RecordingListener;
    use super::*;
    use crate::domain::ProtocolType;

    #[test]
    fn last_listener_wins() {
        let first = Arc::new(RecordingListener::default());
        let second = Arc::new(RecordingListener::default());
        let sink = EventSink::new(Some(first.clone()));

        sink.emit(ProtocolEvent::heartbeat("CP-1", ProtocolType::Ocpp));
        sink.set(second.clone());
        sink.emit(ProtocolEvent::heartbeat("CP-1", ProtocolType::Ocpp));

        assert_eq!(first.events().len(), 1);
        assert_eq!(second.events().len(), 1);
    }

    #[test]
    fn emit_without_listener_is_dropped() {
        let sink = EventSink::default();
        assert!(!sink.has_listener());
        sink.emit(ProtocolEvent::heartbeat("CP-1", ProtocolType::Ocpp));
        sink.set(Arc::new(LoggingEventListener));
        assert!(sink.has_listener());
        sink.clear();
        assert!(!sink.has_listener());
    }
}
