//! CloudCharge HTTP handlers
//!
//! Each endpoint fixes the action, checks the signature and forwards to
//! the protocol manager as a CLOUD_CHARGE request.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use tracing::{info, warn};

use crate::application::protocol::{ProtocolRequest, RequestAction, SharedProtocolManager};
use crate::domain::ProtocolType;
use crate::infrastructure::crypto::{SignatureError, SignatureVerifier};
use crate::interfaces::http::common::{ApiResponse, ValidatedJson};

use super::dto::CloudChargeRequest;

#[derive(Clone)]
pub struct CloudChargeState {
    pub manager: SharedProtocolManager,
    pub verifier: Arc<dyn SignatureVerifier>,
}

type HandlerResponse = (StatusCode, Json<ApiResponse>);

#[utoipa::path(
    post,
    path = "/api/cloudcharge/heartbeat",
    tag = "CloudCharge",
    request_body = CloudChargeRequest,
    responses(
        (status = 200, description = "Heartbeat accepted", body = ApiResponse),
        (status = 400, description = "Invalid signature or request", body = ApiResponse)
    )
)]
pub async fn heartbeat(
    State(state): State<CloudChargeState>,
    ValidatedJson(body): ValidatedJson<CloudChargeRequest>,
) -> HandlerResponse {
    process(&state, body, RequestAction::Heartbeat)
}

#[utoipa::path(
    post,
    path = "/api/cloudcharge/status",
    tag = "CloudCharge",
    request_body = CloudChargeRequest,
    responses(
        (status = 200, description = "Status received", body = ApiResponse),
        (status = 400, description = "Invalid signature or missing status", body = ApiResponse)
    )
)]
pub async fn status(
    State(state): State<CloudChargeState>,
    ValidatedJson(body): ValidatedJson<CloudChargeRequest>,
) -> HandlerResponse {
    process(&state, body, RequestAction::Status)
}

#[utoipa::path(
    post,
    path = "/api/cloudcharge/start",
    tag = "CloudCharge",
    request_body = CloudChargeRequest,
    responses(
        (status = 200, description = "Charging started", body = ApiResponse),
        (status = 400, description = "Invalid signature or missing sessionId", body = ApiResponse)
    )
)]
pub async fn start(
    State(state): State<CloudChargeState>,
    ValidatedJson(body): ValidatedJson<CloudChargeRequest>,
) -> HandlerResponse {
    process(&state, body, RequestAction::Start)
}

#[utoipa::path(
    post,
    path = "/api/cloudcharge/stop",
    tag = "CloudCharge",
    request_body = CloudChargeRequest,
    responses(
        (status = 200, description = "Charging stopped", body = ApiResponse),
        (status = 400, description = "Invalid signature", body = ApiResponse)
    )
)]
pub async fn stop(
    State(state): State<CloudChargeState>,
    ValidatedJson(body): ValidatedJson<CloudChargeRequest>,
) -> HandlerResponse {
    process(&state, body, RequestAction::Stop)
}

fn process(
    state: &CloudChargeState,
    body: CloudChargeRequest,
    action: RequestAction,
) -> HandlerResponse {
    info!(device_id = %body.device_code, %action, request_id = %body.request_id, "CloudCharge request");

    if let Err(e) = state.verifier.verify(&body.signed_fields(), &body.signature) {
        warn!(device_id = %body.device_code, error = %e, "CloudCharge request rejected");
        let message = match e {
            SignatureError::Mismatch | SignatureError::MissingSecret => {
                "Invalid signature".to_string()
            }
            other => other.to_string(),
        };
        let mut resp = ApiResponse::failure("401", message);
        resp.request_id = Some(body.request_id);
        return (StatusCode::BAD_REQUEST, Json(resp));
    }

    let mut request = ProtocolRequest::new(
        Some(ProtocolType::CloudCharge),
        body.device_code,
        action.as_str(),
    )
    .with_request_id(body.request_id)
    .with_payload(body.data.unwrap_or_default());
    request.session_id = body.session_id;
    request.api_version = body.api_version;

    let response = state.manager.handle_request(request);
    let status = if response.success {
        StatusCode::OK
    } else {
        response
            .code
            .parse::<u16>()
            .ok()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    };
    (status, Json(ApiResponse::from(response)))
}
