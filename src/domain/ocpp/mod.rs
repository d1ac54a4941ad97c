//! OCPP protocol shared types
//!
//! Value objects of the OCPP-J wire protocol that are not tied to a
//! single message: error codes and connector status codes.

pub mod connector_status;
pub mod error_code;

pub use connector_status::status_code;
pub use error_code::ErrorCode;
