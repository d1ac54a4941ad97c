//! BootNotification handler

use chrono::Utc;
use rust_ocpp::v1_6::messages::boot_notification::{
    BootNotificationRequest, BootNotificationResponse,
};
use rust_ocpp::v1_6::types::RegistrationStatus;
use tracing::{info, warn};

use super::{parse, respond};
use crate::application::handlers::dispatcher::{Action, HandlerResult, MessageDispatcher};
use crate::application::session::Session;
use crate::support::ocpp_frame::Payload;

pub fn handle_boot_notification(
    dispatcher: &MessageDispatcher,
    session: &Session,
    payload: Payload,
) -> HandlerResult {
    let req: BootNotificationRequest = parse(Action::BootNotification, payload)?;
    let interval = dispatcher.settings().boot_heartbeat_interval;

    info!(
        device_id = session.device_code(),
        vendor = req.charge_point_vendor.as_str(),
        model = req.charge_point_model.as_str(),
        "BootNotification"
    );

    let identified =
        !req.charge_point_vendor.trim().is_empty() && !req.charge_point_model.trim().is_empty();

    let status = if identified {
        session.authenticate();
        session.set_attribute("vendor", req.charge_point_vendor);
        session.set_attribute("model", req.charge_point_model);
        if let Some(serial) = req.charge_point_serial_number {
            session.set_attribute("serialNumber", serial);
        }
        if let Some(firmware) = req.firmware_version {
            session.set_attribute("firmwareVersion", firmware);
        }
        session.set_heartbeat_interval(interval);
        session.set_attribute("heartbeatInterval", interval);
        RegistrationStatus::Accepted
    } else {
        warn!(device_id = session.device_code(), "BootNotification without vendor/model");
        RegistrationStatus::Rejected
    };

    respond(&BootNotificationResponse {
        current_time: Utc::now(),
        interval,
        status,
    })
}
