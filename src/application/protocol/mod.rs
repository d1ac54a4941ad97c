//! Multi-protocol abstraction
//!
//! [`ProtocolService`] is implemented once per device family and selected
//! by the [`ProtocolManager`] from the device's recorded protocol type.

pub mod cloud_charge_service;
pub mod manager;
pub mod ocpp_service;
pub mod request;
pub mod service;

pub use cloud_charge_service::{CloudChargeProtocolService, CloudChargeSettings};
pub use manager::{ProtocolManager, SharedProtocolManager};
pub use ocpp_service::OcppProtocolService;
pub use request::{ProtocolRequest, ProtocolResponse, RequestAction};
pub use service::{ProtocolError, ProtocolService, SharedProtocolService};
