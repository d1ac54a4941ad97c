//! OCPP 1.6 message dispatcher
//!
//! Decodes raw OCPP-J frames, routes Calls to action handlers by name and
//! wraps the outcome in a CallResult or CallError. Handling is synchronous
//! and touches no state shared across devices except the registry map.

use std::str::FromStr;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::events::SharedEventSink;
use crate::application::session::{Session, SharedSessionRegistry};
use crate::config::SessionConfig;
use crate::domain::{ErrorCode, ProtocolEvent};
use crate::support::ocpp_frame::{OcppFrame, Payload};

use super::ocpp_v16::action_matcher;

// ── Action vocabulary ──────────────────────────────────────────

/// Device-initiated actions the gateway answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    BootNotification,
    Heartbeat,
    StatusNotification,
    Authorize,
    StartTransaction,
    StopTransaction,
    MeterValues,
}

impl Action {
    pub const ALL: [Action; 7] = [
        Self::BootNotification,
        Self::Heartbeat,
        Self::StatusNotification,
        Self::Authorize,
        Self::StartTransaction,
        Self::StopTransaction,
        Self::MeterValues,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BootNotification => "BootNotification",
            Self::Heartbeat => "Heartbeat",
            Self::StatusNotification => "StatusNotification",
            Self::Authorize => "Authorize",
            Self::StartTransaction => "StartTransaction",
            Self::StopTransaction => "StopTransaction",
            Self::MeterValues => "MeterValues",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl FromStr for Action {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|a| a.as_str() == s).ok_or(())
    }
}

/// Per-action invocation counters.
#[derive(Debug, Default)]
pub struct ActionCounters {
    counts: [AtomicU64; 7],
}

impl ActionCounters {
    fn record(&self, action: Action) {
        self.counts[action.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self, action: Action) -> u64 {
        self.counts[action.index()].load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }
}

// ── Handler errors ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HandlerError {
    /// Payload does not have the shape the action requires.
    #[error("{0}")]
    Formation(String),
    /// Handler failed for a reason unrelated to the payload.
    #[error("{0}")]
    Internal(String),
}

impl HandlerError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Formation(_) => ErrorCode::FormationViolation,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }
}

pub type HandlerResult = Result<Payload, HandlerError>;

// ── Transaction ids ────────────────────────────────────────────

/// Process-wide transaction id source. Ids stay positive and wrap to 1.
#[derive(Debug)]
pub struct TransactionIds {
    last: AtomicI32,
}

impl TransactionIds {
    /// Seeded from the wall clock so restarts rarely reuse recent ids.
    pub fn new() -> Self {
        let seed = Utc::now().timestamp_millis().rem_euclid(1_000_000) as i32;
        Self::starting_after(seed)
    }

    pub fn starting_after(last: i32) -> Self {
        Self {
            last: AtomicI32::new(last.max(0)),
        }
    }

    pub fn next(&self) -> i32 {
        let step = |current: i32| Some(if current >= i32::MAX - 1 { 1 } else { current + 1 });
        match self.last.fetch_update(Ordering::AcqRel, Ordering::Acquire, step) {
            Ok(previous) | Err(previous) => step(previous).unwrap_or(1),
        }
    }
}

impl Default for TransactionIds {
    fn default() -> Self {
        Self::new()
    }
}

// ── Dispatcher ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// Heartbeat interval (seconds) offered in the BootNotification response.
    pub boot_heartbeat_interval: u32,
}

impl From<&SessionConfig> for DispatcherSettings {
    fn from(cfg: &SessionConfig) -> Self {
        Self {
            boot_heartbeat_interval: cfg.boot_heartbeat_interval,
        }
    }
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

pub struct MessageDispatcher {
    registry: SharedSessionRegistry,
    events: SharedEventSink,
    settings: DispatcherSettings,
    transactions: TransactionIds,
    counters: ActionCounters,
}

pub type SharedMessageDispatcher = Arc<MessageDispatcher>;

impl MessageDispatcher {
    pub fn new(
        registry: SharedSessionRegistry,
        events: SharedEventSink,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            registry,
            events,
            settings,
            transactions: TransactionIds::new(),
            counters: ActionCounters::default(),
        }
    }

    pub fn with_transaction_ids(mut self, transactions: TransactionIds) -> Self {
        self.transactions = transactions;
        self
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    pub fn counters(&self) -> &ActionCounters {
        &self.counters
    }

    pub(crate) fn transactions(&self) -> &TransactionIds {
        &self.transactions
    }

    pub(crate) fn emit(&self, event: ProtocolEvent) {
        self.events.emit(event);
    }

    /// Handle one raw inbound frame. Returns the frame to send back, if any.
    ///
    /// Frames for a session that is no longer live are dropped. A frame that
    /// fails to decode is answered with `FormationViolation` and leaves the
    /// session untouched.
    pub fn handle_text(&self, session: &Session, text: &str) -> Option<OcppFrame> {
        let device_id = session.device_code();
        if !session.is_live() {
            debug!(device_id, status = %session.status(), "Dropping frame for closed session");
            return None;
        }

        let frame = match OcppFrame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(device_id, error = %e, "Malformed OCPP frame");
                let message_id = OcppFrame::salvage_message_id(text)
                    .unwrap_or_else(|| Uuid::new_v4().to_string());
                return Some(self.call_error(message_id, e.error_code(), e.to_string()));
            }
        };

        metrics::counter!("evcs_ocpp_frames_total", "kind" => frame.kind()).increment(1);
        self.registry.touch(device_id);
        self.dispatch(session, frame)
    }

    pub fn dispatch(&self, session: &Session, frame: OcppFrame) -> Option<OcppFrame> {
        match frame {
            OcppFrame::Call {
                message_id,
                action,
                payload,
            } => Some(self.dispatch_call(session, message_id, &action, payload)),

            // Correlation of responses to outbound commands is up to the caller.
            OcppFrame::CallResult { message_id, .. } => {
                info!(device_id = session.device_code(), %message_id, "Received CallResult");
                None
            }

            OcppFrame::CallError {
                message_id,
                error_code,
                error_description,
                ..
            } => {
                warn!(
                    device_id = session.device_code(),
                    %message_id,
                    %error_code,
                    %error_description,
                    "Received CallError"
                );
                None
            }
        }
    }

    pub fn dispatch_call(
        &self,
        session: &Session,
        message_id: String,
        action: &str,
        payload: Payload,
    ) -> OcppFrame {
        let device_id = session.device_code();
        let Ok(known) = action.parse::<Action>() else {
            warn!(device_id, action, "Unsupported action");
            return self.call_error(
                message_id,
                ErrorCode::NotSupported,
                format!("Action not supported: {action}"),
            );
        };

        debug!(device_id, action, %message_id, "Dispatching Call");
        self.counters.record(known);
        metrics::counter!("evcs_ocpp_actions_total", "action" => known.as_str()).increment(1);

        match action_matcher(self, session, known, payload) {
            Ok(result) => OcppFrame::result(message_id, result),
            Err(e) => {
                match &e {
                    HandlerError::Formation(reason) => {
                        warn!(device_id, action, %reason, "Rejected payload")
                    }
                    HandlerError::Internal(reason) => {
                        error!(device_id, action, %reason, "Handler failed")
                    }
                }
                self.call_error(message_id, e.error_code(), e.to_string())
            }
        }
    }

    fn call_error(&self, message_id: String, code: ErrorCode, description: String) -> OcppFrame {
        metrics::counter!("evcs_ocpp_call_errors_total", "code" => code.as_str()).increment(1);
        OcppFrame::error(message_id, code, description)
    }
}
