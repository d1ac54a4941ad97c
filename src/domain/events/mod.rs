//! Domain events
//!
//! Event types that represent facts about device activity.
//! Delivery (listener slot and broadcast fan-out) lives in `application::events`.

pub mod types;

pub use types::{
    HeartbeatEvent, ProtocolEvent, StatusChangeEvent, TransactionStartAckEvent,
    TransactionStopAckEvent,
};
