//! Protocol type
//!
//! Discriminator selecting which `ProtocolService` implementation owns a
//! device. Serialized with the upper-case codes external collaborators use.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Device families the gateway can speak to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolType {
    /// OCPP-J over a persistent WebSocket connection.
    #[serde(rename = "OCPP")]
    Ocpp,
    /// CloudCharge signed request/response over HTTP.
    #[serde(rename = "CLOUD_CHARGE")]
    CloudCharge,
}

impl ProtocolType {
    pub const ALL: &'static [ProtocolType] = &[Self::Ocpp, Self::CloudCharge];

    pub fn code(&self) -> &'static str {
        match self {
            Self::Ocpp => "OCPP",
            Self::CloudCharge => "CLOUD_CHARGE",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Ocpp => "OCPP 1.6 protocol",
            Self::CloudCharge => "CloudCharge protocol",
        }
    }

    /// Transport the family is carried on.
    pub fn transport(&self) -> &'static str {
        match self {
            Self::Ocpp => "WebSocket",
            Self::CloudCharge => "HTTP REST",
        }
    }

    /// Whether the device keeps a connection open (and so owns a transport).
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Ocpp)
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown protocol type: {0}")]
pub struct UnknownProtocolType(pub String);

impl FromStr for ProtocolType {
    type Err = UnknownProtocolType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OCPP" => Ok(Self::Ocpp),
            "CLOUD_CHARGE" | "CLOUDCHARGE" => Ok(Self::CloudCharge),
            other => Err(UnknownProtocolType(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_codes_case_insensitively() {
        assert_eq!("ocpp".parse::<ProtocolType>().unwrap(), ProtocolType::Ocpp);
        assert_eq!(
            "Cloud_Charge".parse::<ProtocolType>().unwrap(),
            ProtocolType::CloudCharge
        );
        assert!("modbus".parse::<ProtocolType>().is_err());
    }

    #[test]
    fn serializes_as_code() {
        let json = serde_json::to_string(&ProtocolType::CloudCharge).unwrap();
        assert_eq!(json, "\"CLOUD_CHARGE\"");
        let back: ProtocolType = serde_json::from_str("\"OCPP\"").unwrap();
        assert_eq!(back, ProtocolType::Ocpp);
    }

    #[test]
    fn only_ocpp_is_persistent() {
        assert!(ProtocolType::Ocpp.is_persistent());
        assert!(!ProtocolType::CloudCharge.is_persistent());
    }
}
