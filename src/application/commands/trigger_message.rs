//! TriggerMessage command
//!
//! Only the BootNotification trigger is used: it asks a connected device to
//! (re)introduce itself.

use rust_ocpp::v1_6::messages::trigger_message::TriggerMessageRequest;
use rust_ocpp::v1_6::types::MessageTrigger;
use tracing::info;

use super::{to_payload, CommandError, CommandSender};

pub fn trigger_boot_notification(
    sender: &CommandSender,
    device_id: &str,
) -> Result<String, CommandError> {
    info!(device_id, "TriggerMessage(BootNotification)");

    let request = TriggerMessageRequest {
        requested_message: MessageTrigger::BootNotification,
        connector_id: None,
    };
    sender.send_command(device_id, "TriggerMessage", to_payload(&request)?)
}
