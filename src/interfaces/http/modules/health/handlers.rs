//! Health check handler

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::application::protocol::SharedProtocolManager;
use crate::application::session::SharedSessionRegistry;

#[derive(Clone)]
pub struct HealthState {
    pub registry: SharedSessionRegistry,
    pub manager: SharedProtocolManager,
    pub started_at: Arc<Instant>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub sessions: SessionCounts,
    /// Connected devices per protocol type
    pub connected_devices: HashMap<String, usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionCounts {
    pub total: usize,
    pub authenticated: usize,
    pub total_messages: u64,
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Gateway is running", body = HealthResponse)
    )
)]
pub async fn health_check(State(state): State<HealthState>) -> Json<HealthResponse> {
    let stats = state.registry.statistics();
    let connected_devices = state
        .manager
        .protocol_statistics()
        .into_iter()
        .map(|(protocol, count)| (protocol.code().to_string(), count))
        .collect();

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        sessions: SessionCounts {
            total: stats.total,
            authenticated: stats.authenticated,
            total_messages: stats.total_messages,
        },
        connected_devices,
    })
}
