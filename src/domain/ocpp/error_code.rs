//! OCPP-J CallError codes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error code carried in the third slot of a `CallError` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Requested action is recognized but not implemented
    NotImplemented,
    /// Requested action is not known
    NotSupported,
    /// Unexpected failure while handling the action
    InternalError,
    /// Payload incomplete
    ProtocolError,
    /// Failure to meet security requirements
    SecurityError,
    /// Payload syntactically incorrect or not conform to the PDU structure
    FormationViolation,
    /// Field contains an invalid value
    PropertyConstraintViolation,
    /// Occurrence constraint violated
    OccupancyConstraintViolation,
    /// Field type mismatch
    TypeConstraintViolation,
    /// Anything not covered above
    GenericError,
}

impl ErrorCode {
    pub const ALL: &'static [ErrorCode] = &[
        Self::NotImplemented,
        Self::NotSupported,
        Self::InternalError,
        Self::ProtocolError,
        Self::SecurityError,
        Self::FormationViolation,
        Self::PropertyConstraintViolation,
        Self::OccupancyConstraintViolation,
        Self::TypeConstraintViolation,
        Self::GenericError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotImplemented => "NotImplemented",
            Self::NotSupported => "NotSupported",
            Self::InternalError => "InternalError",
            Self::ProtocolError => "ProtocolError",
            Self::SecurityError => "SecurityError",
            Self::FormationViolation => "FormationViolation",
            Self::PropertyConstraintViolation => "PropertyConstraintViolation",
            Self::OccupancyConstraintViolation => "OccupancyConstraintViolation",
            Self::TypeConstraintViolation => "TypeConstraintViolation",
            Self::GenericError => "GenericError",
        }
    }

    /// Lenient lookup used when decoding frames from the wire.
    /// Unrecognized codes collapse to `GenericError`.
    pub fn from_wire(code: &str) -> Self {
        code.parse().unwrap_or(Self::GenericError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|code| code.as_str() == s)
            .ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_code_parses_back() {
        for code in ErrorCode::ALL {
            assert_eq!(code.as_str().parse::<ErrorCode>(), Ok(*code));
        }
    }

    #[test]
    fn unknown_wire_code_is_generic() {
        assert_eq!(ErrorCode::from_wire("Bogus"), ErrorCode::GenericError);
        assert_eq!(
            ErrorCode::from_wire("NotSupported"),
            ErrorCode::NotSupported
        );
    }
}
