//! Authorize handler
//!
//! Identity policy belongs to downstream collaborators; the gateway only
//! rejects tags that are blank.

use rust_ocpp::v1_6::messages::authorize::{AuthorizeRequest, AuthorizeResponse};
use rust_ocpp::v1_6::types::{AuthorizationStatus, IdTagInfo};
use tracing::info;

use super::{parse, respond};
use crate::application::handlers::dispatcher::{Action, HandlerResult, MessageDispatcher};
use crate::application::session::Session;
use crate::support::ocpp_frame::Payload;

pub fn handle_authorize(
    _dispatcher: &MessageDispatcher,
    session: &Session,
    payload: Payload,
) -> HandlerResult {
    let req: AuthorizeRequest = parse(Action::Authorize, payload)?;

    let status = if req.id_tag.trim().is_empty() {
        AuthorizationStatus::Invalid
    } else {
        AuthorizationStatus::Accepted
    };

    info!(
        device_id = session.device_code(),
        id_tag = req.id_tag.as_str(),
        ?status,
        "Authorize"
    );

    respond(&AuthorizeResponse {
        id_tag_info: IdTagInfo {
            status,
            expiry_date: None,
            parent_id_tag: None,
        },
    })
}
