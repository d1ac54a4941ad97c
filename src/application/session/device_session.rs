//! Device session
//!
//! In-memory state of one device's connection. All mutable fields are
//! atomics (or a concurrent map) so a `Session` can be shared as
//! `Arc<Session>` between its connection task, the registry and the
//! sweeper without a lock.

use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, AtomicU8, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::domain::{ProtocolType, SessionStatus};

/// Instruction for the transport task that owns the physical connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Encoded frame to write to the wire.
    Frame(String),
    /// Close the connection with an optional reason.
    Close(Option<String>),
}

pub type OutboundSender = mpsc::UnboundedSender<Outbound>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<Outbound>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session {0} has no transport")]
    NoTransport(String),
    #[error("Session {0} is closed")]
    Closed(String),
}

#[derive(Debug)]
pub struct Session {
    device_code: String,
    protocol_type: ProtocolType,
    created_at: DateTime<Utc>,
    /// Epoch milliseconds
    last_active: AtomicI64,
    /// Seconds
    heartbeat_interval: AtomicU32,
    status: AtomicU8,
    message_count: AtomicU64,
    attributes: DashMap<String, Value>,
    transport: Option<OutboundSender>,
}

impl Session {
    /// Session without a transport (request/response devices).
    pub fn new(
        device_code: impl Into<String>,
        protocol_type: ProtocolType,
        heartbeat_interval: u32,
    ) -> Self {
        Self::build(device_code.into(), protocol_type, heartbeat_interval, None)
    }

    /// Session bound to a transport task through `sender`.
    pub fn with_transport(
        device_code: impl Into<String>,
        protocol_type: ProtocolType,
        heartbeat_interval: u32,
        sender: OutboundSender,
    ) -> Self {
        Self::build(
            device_code.into(),
            protocol_type,
            heartbeat_interval,
            Some(sender),
        )
    }

    /// Convenience: a transport-backed session plus the receiving end the
    /// transport task drains.
    pub fn channel(
        device_code: impl Into<String>,
        protocol_type: ProtocolType,
        heartbeat_interval: u32,
    ) -> (Self, OutboundReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self::with_transport(device_code, protocol_type, heartbeat_interval, tx),
            rx,
        )
    }

    fn build(
        device_code: String,
        protocol_type: ProtocolType,
        heartbeat_interval: u32,
        transport: Option<OutboundSender>,
    ) -> Self {
        let now = Utc::now();
        Self {
            device_code,
            protocol_type,
            created_at: now,
            last_active: AtomicI64::new(now.timestamp_millis()),
            heartbeat_interval: AtomicU32::new(heartbeat_interval),
            status: AtomicU8::new(SessionStatus::Connecting as u8),
            message_count: AtomicU64::new(0),
            attributes: DashMap::new(),
            transport,
        }
    }

    // ── Identity / timers ──────────────────────────────────

    pub fn device_code(&self) -> &str {
        &self.device_code
    }

    pub fn protocol_type(&self) -> ProtocolType {
        self.protocol_type
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        let millis = self.last_active.load(Ordering::Acquire);
        Utc.timestamp_millis_opt(millis)
            .single()
            .unwrap_or(self.created_at)
    }

    pub fn set_last_active(&self, at: DateTime<Utc>) {
        self.last_active
            .store(at.timestamp_millis(), Ordering::Release);
    }

    pub fn heartbeat_interval(&self) -> u32 {
        self.heartbeat_interval.load(Ordering::Acquire)
    }

    pub fn set_heartbeat_interval(&self, seconds: u32) {
        self.heartbeat_interval.store(seconds, Ordering::Release);
    }

    pub fn message_count(&self) -> u64 {
        self.message_count.load(Ordering::Acquire)
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        self.set_last_active(Utc::now());
        self.message_count.fetch_add(1, Ordering::AcqRel);
    }

    pub fn idle_millis(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp_millis() - self.last_active.load(Ordering::Acquire)
    }

    /// `true` once idle time is strictly greater than `missed` intervals.
    /// A zero interval never times out.
    pub fn heartbeat_expired(&self, now: DateTime<Utc>, missed: u32) -> bool {
        let interval = i64::from(self.heartbeat_interval());
        if interval == 0 {
            return false;
        }
        self.idle_millis(now) > interval * 1000 * i64::from(missed.max(1))
    }

    // ── Status ─────────────────────────────────────────────

    pub fn status(&self) -> SessionStatus {
        SessionStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_live(&self) -> bool {
        self.status().is_live()
    }

    pub fn is_authenticated(&self) -> bool {
        self.status() == SessionStatus::Authenticated
    }

    /// Apply `next` if the lifecycle allows it. Returns whether it applied.
    pub fn transition(&self, next: SessionStatus) -> bool {
        let mut current = self.status.load(Ordering::Acquire);
        loop {
            if !SessionStatus::from_u8(current).can_transition_to(next) {
                return false;
            }
            match self.status.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn mark_connected(&self) -> bool {
        self.transition(SessionStatus::Connected)
    }

    pub fn authenticate(&self) -> bool {
        self.transition(SessionStatus::Authenticated)
    }

    pub fn fail(&self) -> bool {
        self.transition(SessionStatus::Error)
    }

    /// Mark the session disconnected (unless it already failed) and ask the
    /// transport to close. Safe to call more than once.
    pub fn close(&self, reason: Option<&str>) {
        self.transition(SessionStatus::Disconnected);
        if let Some(tx) = &self.transport {
            let _ = tx.send(Outbound::Close(reason.map(str::to_string)));
        }
    }

    // ── Outbound ───────────────────────────────────────────

    pub fn has_transport(&self) -> bool {
        self.transport.is_some()
    }

    pub fn send(&self, frame: String) -> Result<(), SessionError> {
        let tx = self
            .transport
            .as_ref()
            .ok_or_else(|| SessionError::NoTransport(self.device_code.clone()))?;
        if self.status().is_terminal() {
            return Err(SessionError::Closed(self.device_code.clone()));
        }
        tx.send(Outbound::Frame(frame))
            .map_err(|_| SessionError::Closed(self.device_code.clone()))
    }

    // ── Attributes ─────────────────────────────────────────

    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.attributes.get(key).map(|v| v.value().clone())
    }

    pub fn remove_attribute(&self, key: &str) -> Option<Value> {
        self.attributes.remove(key).map(|(_, v)| v)
    }
}

// ── Tests ──────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_session() -> (Session, OutboundReceiver) {
        Session::channel("CP001", ProtocolType::Ocpp, 60)
    }

    #[test]
    fn new_session_fields() {
        let (session, _rx) = make_session();
        assert_eq!(session.device_code(), "CP001");
        assert_eq!(session.status(), SessionStatus::Connecting);
        assert_eq!(session.message_count(), 0);
        assert_eq!(session.heartbeat_interval(), 60);
        assert!(session.created_at() <= Utc::now());
    }

    #[test]
    fn send_delivers_frame() {
        let (session, mut rx) = make_session();
        session.mark_connected();
        session.send("hello".into()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Outbound::Frame("hello".into()));
    }

    #[test]
    fn send_to_dropped_receiver_fails() {
        let (session, rx) = make_session();
        session.mark_connected();
        drop(rx);
        assert!(matches!(
            session.send("msg".into()),
            Err(SessionError::Closed(_))
        ));
    }

    #[test]
    fn send_without_transport_fails() {
        let session = Session::new("CC-1", ProtocolType::CloudCharge, 60);
        assert_eq!(
            session.send("x".into()),
            Err(SessionError::NoTransport("CC-1".into()))
        );
    }

    #[test]
    fn touch_counts_and_refreshes() {
        let (session, _rx) = make_session();
        session.set_last_active(Utc::now() - Duration::seconds(30));
        session.touch();
        session.touch();
        assert_eq!(session.message_count(), 2);
        assert!(session.idle_millis(Utc::now()) < 1_000);
    }

    #[test]
    fn close_keeps_error_status_and_notifies_transport() {
        let (session, mut rx) = make_session();
        session.mark_connected();
        assert!(session.fail());
        session.close(Some("bye"));
        assert_eq!(session.status(), SessionStatus::Error);
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close(Some("bye".into())));
        assert!(session.send("late".into()).is_err());
    }

    #[test]
    fn lifecycle_is_one_directional() {
        let (session, _rx) = make_session();
        assert!(!session.authenticate());
        assert!(session.mark_connected());
        assert!(session.authenticate());
        assert!(!session.mark_connected());
        session.close(None);
        assert_eq!(session.status(), SessionStatus::Disconnected);
        assert!(!session.authenticate());
    }

    #[test]
    fn heartbeat_expiry_is_strict() {
        let (session, _rx) = make_session();
        let now = Utc::now();
        session.set_last_active(now - Duration::seconds(180));
        assert!(!session.heartbeat_expired(now, 3));
        session.set_last_active(now - Duration::seconds(181));
        assert!(session.heartbeat_expired(now, 3));
    }

    #[test]
    fn attributes_roundtrip() {
        let (session, _rx) = make_session();
        session.set_attribute("vendor", "VendorX");
        session.set_attribute("interval", 300);
        assert_eq!(session.attribute("vendor"), Some(Value::from("VendorX")));
        assert_eq!(session.remove_attribute("interval"), Some(Value::from(300)));
        assert_eq!(session.attribute("interval"), None);
    }
}
