//! # EVCS gateway
//!
//! Multi-protocol gateway between EV charging devices and a charging
//! backend. OCPP 1.6 stations connect over OCPP-J WebSocket; CloudCharge
//! devices speak signed JSON over HTTP. Both families sit behind one
//! [`ProtocolManager`](application::protocol::ProtocolManager) and emit the
//! same protocol-neutral events.
//!
//! ## Layers
//!
//! - **domain**: protocol type, session status, events, wire error codes
//! - **support**: OCPP-J frame codec and the shutdown signal
//! - **application**: sessions, dispatcher, commands, event fan-out, protocol services
//! - **infrastructure**: request signature verification
//! - **interfaces**: WebSocket transport and REST API with Swagger documentation
//! - **server**: composition root

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;
pub mod server;
pub mod support;

pub use config::{default_config_path, AppConfig};
pub use server::{GatewayServer, ServerError, ServerHandle};
