//! RemoteStartTransaction command

use rust_ocpp::v1_6::messages::remote_start_transaction::RemoteStartTransactionRequest;
use tracing::info;

use super::{to_payload, CommandError, CommandSender};

pub fn remote_start_transaction(
    sender: &CommandSender,
    device_id: &str,
    id_tag: &str,
    connector_id: Option<u32>,
) -> Result<String, CommandError> {
    info!(device_id, id_tag, ?connector_id, "RemoteStartTransaction");

    let request = RemoteStartTransactionRequest {
        connector_id,
        id_tag: id_tag.to_string(),
        charging_profile: None,
    };
    sender.send_command(device_id, "RemoteStartTransaction", to_payload(&request)?)
}
