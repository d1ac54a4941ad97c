//! Session registry: device code → live session
//!
//! At most one session per device code. A reconnect replaces the old
//! session, which is closed before the new one becomes visible. Periodic
//! heartbeat and idle checks are plain methods taking `now`; scheduling
//! them is the sweeper's job.

use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::domain::SessionStatus;

use super::device_session::{Session, SessionError};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Device code must not be empty")]
    InvalidDeviceCode,
    #[error("Session capacity of {max} reached")]
    CapacityExceeded { max: usize },
    #[error("Device {0} not connected")]
    NotConnected(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Why a session left the registry. Used as a metrics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    Collision,
    Requested,
    TransportClosed,
    HeartbeatTimeout,
    Idle,
    Shutdown,
}

impl EvictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collision => "collision",
            Self::Requested => "requested",
            Self::TransportClosed => "transport_closed",
            Self::HeartbeatTimeout => "heartbeat_timeout",
            Self::Idle => "idle",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Told about every session that leaves the registry without being
/// replaced. Collisions are not reported: the device keeps a session.
pub trait EvictionListener: Send + Sync {
    fn on_evicted(&self, device_code: &str, reason: EvictionReason);
}

#[derive(Debug, Clone)]
pub struct RegistryLimits {
    pub max_sessions: usize,
    pub missed_heartbeats: u32,
    pub idle_timeout: Duration,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for RegistryLimits {
    fn from(cfg: &SessionConfig) -> Self {
        Self {
            max_sessions: cfg.max_sessions,
            missed_heartbeats: cfg.missed_heartbeats,
            idle_timeout: Duration::from_secs(cfg.idle_timeout),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub connecting: usize,
    pub connected: usize,
    pub authenticated: usize,
    pub disconnected: usize,
    pub error: usize,
    pub total_messages: u64,
}

pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    /// Serializes admissions so the capacity check and insert are atomic.
    /// Never held while a frame is being handled.
    admission: Mutex<()>,
    limits: RegistryLimits,
    eviction_listener: RwLock<Option<Weak<dyn EvictionListener>>>,
}

pub type SharedSessionRegistry = Arc<SessionRegistry>;

impl SessionRegistry {
    pub fn new(limits: RegistryLimits) -> Self {
        Self {
            sessions: DashMap::new(),
            admission: Mutex::new(()),
            limits,
            eviction_listener: RwLock::new(None),
        }
    }

    pub fn shared(limits: RegistryLimits) -> SharedSessionRegistry {
        Arc::new(Self::new(limits))
    }

    pub fn limits(&self) -> &RegistryLimits {
        &self.limits
    }

    /// Insert `session`, replacing (and closing) any existing session for the
    /// same device. Returns the replaced session, if any.
    ///
    /// Fails only on an empty device code or when a *new* device would push
    /// the registry past its capacity; nothing is evicted in that case.
    pub fn admit(&self, session: Arc<Session>) -> Result<Option<Arc<Session>>, RegistryError> {
        if session.device_code().trim().is_empty() {
            return Err(RegistryError::InvalidDeviceCode);
        }

        let _guard = self
            .admission
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.insert_locked(session)
    }

    /// Live session for `device_code`, or `create()` admitted in its place.
    /// The lookup and the insert happen under the admission lock, so a
    /// concurrent `admit` can never be displaced by this call. The flag is
    /// true when the returned session was just admitted.
    pub fn get_or_admit<F>(
        &self,
        device_code: &str,
        create: F,
    ) -> Result<(Arc<Session>, bool), RegistryError>
    where
        F: FnOnce() -> Session,
    {
        if device_code.trim().is_empty() {
            return Err(RegistryError::InvalidDeviceCode);
        }

        let _guard = self
            .admission
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = self.get(device_code).filter(|s| s.is_live()) {
            return Ok((existing, false));
        }
        let session = Arc::new(create());
        self.insert_locked(Arc::clone(&session))?;
        Ok((session, true))
    }

    /// Caller holds `admission`.
    fn insert_locked(&self, session: Arc<Session>) -> Result<Option<Arc<Session>>, RegistryError> {
        let device_code = session.device_code().to_string();

        if !self.sessions.contains_key(&device_code)
            && self.sessions.len() >= self.limits.max_sessions
        {
            warn!(
                device_id = %device_code,
                max = self.limits.max_sessions,
                "Session capacity reached, rejecting admission"
            );
            return Err(RegistryError::CapacityExceeded {
                max: self.limits.max_sessions,
            });
        }

        session.mark_connected();

        let replaced = match self.sessions.entry(device_code.clone()) {
            Entry::Occupied(mut entry) => {
                if Arc::ptr_eq(entry.get(), &session) {
                    return Ok(None);
                }
                let old = Arc::clone(entry.get());
                old.close(Some("Replaced by a new connection"));
                entry.insert(session);
                Some(old)
            }
            Entry::Vacant(entry) => {
                entry.insert(session);
                None
            }
        };

        if let Some(old) = &replaced {
            info!(
                device_id = %device_code,
                previous_status = %old.status(),
                "Session collision, previous session closed"
            );
            record_eviction(EvictionReason::Collision);
        } else {
            info!(device_id = %device_code, "Session admitted");
        }
        self.update_gauge();

        Ok(replaced)
    }

    /// Remove and close the session for `device_code`. Idempotent.
    pub fn evict(&self, device_code: &str) -> bool {
        self.evict_with(device_code, EvictionReason::Requested)
    }

    pub fn evict_with(&self, device_code: &str, reason: EvictionReason) -> bool {
        match self.sessions.remove(device_code) {
            Some((_, session)) => {
                session.close(Some(reason.as_str()));
                info!(device_id = device_code, reason = reason.as_str(), "Session evicted");
                record_eviction(reason);
                self.update_gauge();
                self.notify_evicted(device_code, reason);
                true
            }
            None => false,
        }
    }

    /// Remove `session` only if it is still the registered one for its
    /// device. A connection task that lost a reconnect race must not evict
    /// its replacement. The session itself is closed either way.
    pub fn evict_session(&self, session: &Arc<Session>, reason: EvictionReason) -> bool {
        let removed = self
            .sessions
            .remove_if(session.device_code(), |_, current| {
                Arc::ptr_eq(current, session)
            })
            .is_some();
        session.close(Some(reason.as_str()));
        if removed {
            debug!(
                device_id = session.device_code(),
                reason = reason.as_str(),
                "Session removed"
            );
            record_eviction(reason);
            self.update_gauge();
            self.notify_evicted(session.device_code(), reason);
        }
        removed
    }

    /// Install the listener told about evictions. Held weakly: the manager
    /// that listens owns services which own this registry.
    pub fn set_eviction_listener(&self, listener: Weak<dyn EvictionListener>) {
        *self
            .eviction_listener
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    fn notify_evicted(&self, device_code: &str, reason: EvictionReason) {
        let listener = self
            .eviction_listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Weak::upgrade);
        if let Some(listener) = listener {
            listener.on_evicted(device_code, reason);
        }
    }

    /// Record inbound activity for `device_code`.
    pub fn touch(&self, device_code: &str) -> bool {
        match self.sessions.get(device_code) {
            Some(session) => {
                session.touch();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, device_code: &str) -> Option<Arc<Session>> {
        self.sessions.get(device_code).map(|s| Arc::clone(s.value()))
    }

    pub fn contains(&self, device_code: &str) -> bool {
        self.sessions.contains_key(device_code)
    }

    pub fn is_live(&self, device_code: &str) -> bool {
        self.sessions
            .get(device_code)
            .map(|s| s.is_live())
            .unwrap_or(false)
    }

    pub fn send_to(&self, device_code: &str, frame: String) -> Result<(), RegistryError> {
        let session = self
            .get(device_code)
            .ok_or_else(|| RegistryError::NotConnected(device_code.to_string()))?;
        session.send(frame)?;
        Ok(())
    }

    pub fn connected_ids(&self) -> Vec<String> {
        self.sessions
            .iter()
            .filter(|e| e.value().is_live())
            .map(|e| e.key().clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    // ── Periodic checks ────────────────────────────────────

    pub fn check_heartbeats(&self) -> Vec<String> {
        self.check_heartbeats_at(Utc::now())
    }

    /// Fail and evict every session idle for more than
    /// `missed_heartbeats × heartbeat_interval`.
    pub fn check_heartbeats_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let missed = self.limits.missed_heartbeats;
        let expired: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .filter(|e| e.value().heartbeat_expired(now, missed))
            .map(|e| Arc::clone(e.value()))
            .collect();

        let mut evicted = Vec::with_capacity(expired.len());
        for session in expired {
            warn!(
                device_id = session.device_code(),
                idle_secs = session.idle_millis(now) / 1000,
                heartbeat_interval = session.heartbeat_interval(),
                "Heartbeat timeout"
            );
            session.fail();
            if self.evict_session(&session, EvictionReason::HeartbeatTimeout) {
                evicted.push(session.device_code().to_string());
            }
        }
        evicted
    }

    pub fn sweep(&self) -> Vec<String> {
        self.sweep_at(Utc::now())
    }

    /// Evict sessions idle past the absolute idle timeout, plus any entry
    /// whose session has already reached a terminal state.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let limit_ms = i64::try_from(self.limits.idle_timeout.as_millis()).unwrap_or(i64::MAX);
        let stale: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .filter(|e| {
                let session = e.value();
                session.status().is_terminal() || session.idle_millis(now) > limit_ms
            })
            .map(|e| Arc::clone(e.value()))
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for session in stale {
            if self.evict_session(&session, EvictionReason::Idle) {
                info!(device_id = session.device_code(), "Idle session swept");
                evicted.push(session.device_code().to_string());
            }
        }
        evicted
    }

    /// Close and remove every session. Used once at shutdown.
    pub fn close_all(&self) -> usize {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        sessions
            .iter()
            .filter(|s| self.evict_session(s, EvictionReason::Shutdown))
            .count()
    }

    pub fn statistics(&self) -> RegistryStats {
        let mut stats = RegistryStats::default();
        for entry in self.sessions.iter() {
            let session = entry.value();
            stats.total += 1;
            stats.total_messages += session.message_count();
            match session.status() {
                SessionStatus::Connecting => stats.connecting += 1,
                SessionStatus::Connected => stats.connected += 1,
                SessionStatus::Authenticated => stats.authenticated += 1,
                SessionStatus::Disconnected => stats.disconnected += 1,
                SessionStatus::Error => stats.error += 1,
            }
        }
        stats
    }

    fn update_gauge(&self) {
        metrics::gauge!("evcs_sessions_active").set(self.sessions.len() as f64);
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(RegistryLimits::default())
    }
}

fn record_eviction(reason: EvictionReason) {
    metrics::counter!("evcs_sessions_evicted_total", "reason" => reason.as_str()).increment(1);
}

// ── Tests ──────────────────────────────────────────────────────
