//! WebSocket transport for persistent-connection devices

pub mod ocpp_server;

pub use ocpp_server::OcppServer;
