//! Domain layer
//!
//! Protocol-neutral value types shared by every device family:
//! protocol discriminator, session lifecycle, events and wire error codes.

pub mod events;
pub mod ocpp;
pub mod protocol_type;
pub mod session_status;

pub use events::{
    HeartbeatEvent, ProtocolEvent, StatusChangeEvent, TransactionStartAckEvent,
    TransactionStopAckEvent,
};
pub use ocpp::ErrorCode;
pub use protocol_type::{ProtocolType, UnknownProtocolType};
pub use session_status::SessionStatus;
