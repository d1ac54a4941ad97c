//! RemoteStopTransaction command

use rust_ocpp::v1_6::messages::remote_stop_transaction::RemoteStopTransactionRequest;
use tracing::info;

use super::{to_payload, CommandError, CommandSender};

pub fn remote_stop_transaction(
    sender: &CommandSender,
    device_id: &str,
    transaction_id: i32,
) -> Result<String, CommandError> {
    info!(device_id, transaction_id, "RemoteStopTransaction");

    let request = RemoteStopTransactionRequest { transaction_id };
    sender.send_command(device_id, "RemoteStopTransaction", to_payload(&request)?)
}
