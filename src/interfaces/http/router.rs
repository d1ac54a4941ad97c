//! API router with Swagger UI

use std::sync::Arc;
use std::time::Instant;

use axum::extract::FromRef;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::application::protocol::SharedProtocolManager;
use crate::application::session::SharedSessionRegistry;
use crate::infrastructure::crypto::SignatureVerifier;

use super::common::ApiResponse;
use super::modules::cloudcharge::{self, CloudChargeRequest, CloudChargeState};
use super::modules::health::{self, HealthResponse, HealthState, SessionCounts};
use super::modules::metrics::{self, http_metrics_middleware, MetricsState};

/// Everything the HTTP surface needs. Handlers extract their own slice
/// through `FromRef`.
#[derive(Clone)]
pub struct ApiState {
    pub manager: SharedProtocolManager,
    pub registry: SharedSessionRegistry,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub metrics: Option<PrometheusHandle>,
    pub started_at: Arc<Instant>,
}

impl ApiState {
    pub fn new(
        manager: SharedProtocolManager,
        registry: SharedSessionRegistry,
        verifier: Arc<dyn SignatureVerifier>,
    ) -> Self {
        Self {
            manager,
            registry,
            verifier,
            metrics: None,
            started_at: Arc::new(Instant::now()),
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

impl FromRef<ApiState> for CloudChargeState {
    fn from_ref(s: &ApiState) -> Self {
        CloudChargeState {
            manager: Arc::clone(&s.manager),
            verifier: Arc::clone(&s.verifier),
        }
    }
}

impl FromRef<ApiState> for HealthState {
    fn from_ref(s: &ApiState) -> Self {
        HealthState {
            registry: Arc::clone(&s.registry),
            manager: Arc::clone(&s.manager),
            started_at: Arc::clone(&s.started_at),
        }
    }
}

impl FromRef<ApiState> for MetricsState {
    fn from_ref(s: &ApiState) -> Self {
        MetricsState {
            handle: s.metrics.clone(),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::handlers::health_check,
        cloudcharge::handlers::heartbeat,
        cloudcharge::handlers::status,
        cloudcharge::handlers::start,
        cloudcharge::handlers::stop,
    ),
    components(schemas(ApiResponse, CloudChargeRequest, HealthResponse, SessionCounts)),
    tags(
        (name = "Health", description = "Gateway liveness and session counts"),
        (name = "CloudCharge", description = "Signed request/response API for CloudCharge devices"),
    ),
    info(
        title = "EVCS Gateway API",
        version = "0.1.0",
        description = "HTTP surface of the EV charging protocol gateway"
    )
)]
pub struct ApiDoc;

pub fn create_api_router(state: ApiState) -> Router {
    let cloudcharge_routes = Router::new()
        .route("/heartbeat", post(cloudcharge::handlers::heartbeat))
        .route("/status", post(cloudcharge::handlers::status))
        .route("/start", post(cloudcharge::handlers::start))
        .route("/stop", post(cloudcharge::handlers::stop));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api/cloudcharge", cloudcharge_routes)
        .route("/health", get(health::health_check))
        .route("/metrics", get(metrics::prometheus_metrics))
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(http_metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
