//! Numeric connector status codes
//!
//! Business collaborators receive connector status as a small integer.
//! Statuses without a dedicated code (the suspended states) map to 0.

use rust_ocpp::v1_6::types::ChargePointStatus;

pub const STATUS_UNKNOWN: i32 = 0;
pub const STATUS_AVAILABLE: i32 = 1;
pub const STATUS_PREPARING: i32 = 2;
pub const STATUS_CHARGING: i32 = 3;
pub const STATUS_FINISHING: i32 = 4;
pub const STATUS_RESERVED: i32 = 5;
pub const STATUS_UNAVAILABLE: i32 = 6;
pub const STATUS_FAULTED: i32 = 7;

pub fn status_code(status: &ChargePointStatus) -> i32 {
    match status {
        ChargePointStatus::Available => STATUS_AVAILABLE,
        ChargePointStatus::Preparing => STATUS_PREPARING,
        ChargePointStatus::Charging => STATUS_CHARGING,
        ChargePointStatus::Finishing => STATUS_FINISHING,
        ChargePointStatus::Reserved => STATUS_RESERVED,
        ChargePointStatus::Unavailable => STATUS_UNAVAILABLE,
        ChargePointStatus::Faulted => STATUS_FAULTED,
        _ => STATUS_UNKNOWN,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suspended_states_have_no_code() {
        assert_eq!(status_code(&ChargePointStatus::SuspendedEV), STATUS_UNKNOWN);
        assert_eq!(status_code(&ChargePointStatus::SuspendedEVSE), STATUS_UNKNOWN);
        assert_eq!(status_code(&ChargePointStatus::Charging), STATUS_CHARGING);
        assert_eq!(status_code(&ChargePointStatus::Faulted), STATUS_FAULTED);
    }
}
