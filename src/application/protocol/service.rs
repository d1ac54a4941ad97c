//! Protocol service port
//!
//! One implementation per device family. The manager holds them as
//! `Arc<dyn ProtocolService>` keyed by [`ProtocolType`] and never needs to
//! know which concrete family it is talking to.

use std::sync::Arc;

use crate::application::commands::CommandError;
use crate::application::events::SharedEventListener;
use crate::application::session::RegistryError;
use crate::domain::ProtocolType;

use super::request::{ProtocolRequest, ProtocolResponse};

pub trait ProtocolService: Send + Sync {
    fn protocol_type(&self) -> ProtocolType;

    /// Persistent families only record that the device is expected;
    /// request/response families admit it right away.
    fn connect(&self, device_id: &str) -> bool;

    /// Best-effort teardown. Never fails.
    fn disconnect(&self, device_id: &str);

    fn handle_request(&self, request: &ProtocolRequest) -> Result<ProtocolResponse, ProtocolError>;

    fn register_device(&self, request: &ProtocolRequest)
        -> Result<ProtocolResponse, ProtocolError>;

    /// Replace the process-wide listener. Last write wins.
    fn set_event_listener(&self, listener: SharedEventListener);

    fn is_connected(&self, device_id: &str) -> bool;
}

pub type SharedProtocolService = Arc<dyn ProtocolService>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),
    #[error("Request for {got} sent to {expected} service")]
    WrongProtocol {
        expected: ProtocolType,
        got: ProtocolType,
    },
    #[error("Protocol service not found for type: {0}")]
    ServiceNotFound(ProtocolType),
    #[error("{0}")]
    InvalidRequest(String),
    #[error("Device not connected")]
    NotConnected(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("{0}")]
    Internal(String),
}

impl ProtocolError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedAction(_) | Self::NotConnected(_) => "404",
            Self::WrongProtocol { .. } | Self::ServiceNotFound(_) | Self::InvalidRequest(_) => {
                "400"
            }
            Self::Command(CommandError::NotConnected(_)) => "404",
            Self::Registry(RegistryError::InvalidDeviceCode) => "400",
            Self::Registry(RegistryError::CapacityExceeded { .. }) => "503",
            Self::Registry(_) | Self::Command(_) | Self::Internal(_) => "500",
        }
    }

    /// Failure envelope for this error. Server-side faults are reported as
    /// "Internal server error: ...".
    pub fn into_response(self) -> ProtocolResponse {
        let code = self.code();
        let message = if code == "500" {
            format!("Internal server error: {self}")
        } else {
            self.to_string()
        };
        ProtocolResponse::failure(code, message)
    }
}
