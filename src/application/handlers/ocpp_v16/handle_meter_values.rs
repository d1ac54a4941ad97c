//! MeterValues handler

use rust_ocpp::v1_6::messages::meter_values::{MeterValuesRequest, MeterValuesResponse};
use rust_ocpp::v1_6::types::Measurand;
use tracing::debug;

use super::{connector_energy_key, parse, respond};
use crate::application::handlers::dispatcher::{Action, HandlerResult, MessageDispatcher};
use crate::application::session::Session;
use crate::support::ocpp_frame::Payload;

pub fn handle_meter_values(
    _dispatcher: &MessageDispatcher,
    session: &Session,
    payload: Payload,
) -> HandlerResult {
    let req: MeterValuesRequest = parse(Action::MeterValues, payload)?;

    let samples: usize = req.meter_value.iter().map(|m| m.sampled_value.len()).sum();
    debug!(
        device_id = session.device_code(),
        connector_id = req.connector_id,
        transaction_id = ?req.transaction_id,
        samples,
        "MeterValues"
    );

    // Keep the latest energy register reading (the default measurand).
    let latest_energy = req
        .meter_value
        .iter()
        .flat_map(|m| m.sampled_value.iter())
        .filter(|s| {
            matches!(
                s.measurand,
                None | Some(Measurand::EnergyActiveImportRegister)
            )
        })
        .last();
    if let Some(sample) = latest_energy {
        session.set_attribute(connector_energy_key(req.connector_id), sample.value.clone());
    }

    respond(&MeterValuesResponse {})
}
