//! Transports: WebSocket for OCPP devices, HTTP for CloudCharge devices

pub mod http;
pub mod ws;
