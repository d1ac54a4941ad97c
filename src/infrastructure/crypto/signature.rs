//! CloudCharge request signatures
//!
//! HMAC-SHA256 over a canonical query-style string:
//!
//! ```text
//! requestId=..&apiVersion=..&timestamp=..&deviceCode=..[&sessionId=..][&action=..][&k=v ...]
//! ```
//!
//! Data entries follow in key order, null values skipped. The digest is
//! lower-case hex.

use chrono::{DateTime, NaiveDateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::config::CloudChargeConfig;

type HmacSha256 = Hmac<Sha256>;

pub const HMAC_SHA256: &str = "HMAC-SHA256";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Signature secret is not configured")]
    MissingSecret,
    #[error("Unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("Invalid signature")]
    Mismatch,
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("Timestamp outside the allowed window")]
    Expired,
}

/// Fields covered by the signature.
#[derive(Debug, Clone, Copy)]
pub struct SignedFields<'a> {
    pub request_id: &'a str,
    pub api_version: &'a str,
    pub timestamp: &'a str,
    pub device_code: &'a str,
    pub session_id: Option<&'a str>,
    pub action: Option<&'a str>,
    pub data: Option<&'a Map<String, Value>>,
}

impl SignedFields<'_> {
    pub fn canonical_string(&self) -> String {
        let mut out = format!(
            "requestId={}&apiVersion={}&timestamp={}&deviceCode={}",
            self.request_id, self.api_version, self.timestamp, self.device_code
        );
        if let Some(session_id) = self.session_id {
            out.push_str("&sessionId=");
            out.push_str(session_id);
        }
        if let Some(action) = self.action {
            out.push_str("&action=");
            out.push_str(action);
        }
        if let Some(data) = self.data {
            let mut keys: Vec<&String> = data.keys().collect();
            keys.sort();
            for key in keys {
                match &data[key] {
                    Value::Null => {}
                    Value::String(s) => {
                        out.push('&');
                        out.push_str(key);
                        out.push('=');
                        out.push_str(s);
                    }
                    other => {
                        out.push('&');
                        out.push_str(key);
                        out.push('=');
                        out.push_str(&other.to_string());
                    }
                }
            }
        }
        out
    }
}

pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, fields: &SignedFields<'_>, signature: &str) -> Result<(), SignatureError>;
}

#[derive(Clone)]
pub struct HmacSignatureVerifier {
    secret: Option<Vec<u8>>,
    /// Seconds; 0 disables the timestamp window.
    tolerance: i64,
}

impl HmacSignatureVerifier {
    pub fn new(secret: impl AsRef<[u8]>, tolerance_secs: u64) -> Self {
        Self {
            secret: Some(secret.as_ref().to_vec()),
            tolerance: i64::try_from(tolerance_secs).unwrap_or(i64::MAX),
        }
    }

    pub fn from_config(cfg: &CloudChargeConfig) -> Result<Self, SignatureError> {
        if !cfg.sign_algorithm.eq_ignore_ascii_case(HMAC_SHA256) {
            return Err(SignatureError::UnsupportedAlgorithm(
                cfg.sign_algorithm.clone(),
            ));
        }
        let tolerance = i64::try_from(cfg.timestamp_tolerance).unwrap_or(i64::MAX);
        match &cfg.app_secret {
            Some(secret) => Ok(Self {
                secret: Some(secret.as_bytes().to_vec()),
                tolerance,
            }),
            None => {
                warn!("CloudCharge app secret not configured, signed requests will be rejected");
                Ok(Self {
                    secret: None,
                    tolerance,
                })
            }
        }
    }

    pub fn sign(&self, fields: &SignedFields<'_>) -> Result<String, SignatureError> {
        let secret = self.secret.as_deref().ok_or(SignatureError::MissingSecret)?;
        let mut mac =
            HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::MissingSecret)?;
        mac.update(fields.canonical_string().as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    pub fn check_timestamp(&self, timestamp: &str, now: DateTime<Utc>) -> Result<(), SignatureError> {
        if self.tolerance == 0 {
            return Ok(());
        }
        let at = parse_timestamp(timestamp)?;
        let skew = (now - at).num_seconds().abs();
        if skew > self.tolerance {
            debug!(timestamp, skew, "Request timestamp outside window");
            return Err(SignatureError::Expired);
        }
        Ok(())
    }
}

impl SignatureVerifier for HmacSignatureVerifier {
    fn verify(&self, fields: &SignedFields<'_>, signature: &str) -> Result<(), SignatureError> {
        self.check_timestamp(fields.timestamp, Utc::now())?;
        let expected = self.sign(fields)?;
        let provided = signature.trim().to_ascii_lowercase();
        if expected.as_bytes().ct_eq(provided.as_bytes()).into() {
            Ok(())
        } else {
            warn!(request_id = fields.request_id, device_id = fields.device_code, "Signature mismatch");
            Err(SignatureError::Mismatch)
        }
    }
}

/// RFC 3339, or an ISO local date-time taken as UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, SignatureError> {
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| SignatureError::InvalidTimestamp(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data() -> Map<String, Value> {
        match json!({"status": 3, "reason": "ok", "skip": null, "energy": 1.5}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn fields<'a>(timestamp: &'a str, data: &'a Map<String, Value>) -> SignedFields<'a> {
        SignedFields {
            request_id: "r-1",
            api_version: "3.0",
            timestamp,
            device_code: "CC-1",
            session_id: Some("S-1"),
            action: None,
            data: Some(data),
        }
    }

    #[test]
    fn canonical_string_orders_data_and_skips_null() {
        let data = data();
        assert_eq!(
            fields("2024-01-01T00:00:00Z", &data).canonical_string(),
            "requestId=r-1&apiVersion=3.0&timestamp=2024-01-01T00:00:00Z&deviceCode=CC-1\
             &sessionId=S-1&energy=1.5&reason=ok&status=3"
        );
    }

    #[test]
    fn known_hmac_vector() {
        // RFC 4231 test case 2
        let verifier = HmacSignatureVerifier::new("Jefe", 0);
        let mut mac = HmacSha256::new_from_slice(b"Jefe").unwrap();
        mac.update(b"what do ya want for nothing?");
        assert_eq!(
            hex::encode(mac.finalize().into_bytes()),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
        let data = Map::new();
        assert_eq!(verifier.sign(&fields("t", &data)).unwrap().len(), 64);
    }

    #[test]
    fn verify_accepts_own_signature_and_rejects_tampering() {
        let verifier = HmacSignatureVerifier::new("s3cret", 300);
        let now = Utc::now().to_rfc3339();
        let data = data();
        let f = fields(&now, &data);
        let sig = verifier.sign(&f).unwrap();

        assert_eq!(verifier.verify(&f, &sig), Ok(()));
        assert_eq!(verifier.verify(&f, &sig.to_uppercase()), Ok(()));

        let tampered = SignedFields {
            device_code: "CC-2",
            ..f
        };
        assert_eq!(verifier.verify(&tampered, &sig), Err(SignatureError::Mismatch));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let verifier = HmacSignatureVerifier::new("s3cret", 300);
        let old = (Utc::now() - chrono::Duration::minutes(10)).to_rfc3339();
        let data = Map::new();
        let f = fields(&old, &data);
        let sig = verifier.sign(&f).unwrap();
        assert_eq!(verifier.verify(&f, &sig), Err(SignatureError::Expired));
    }

    #[test]
    fn local_timestamps_are_accepted() {
        let at = parse_timestamp("2024-05-01T12:30:00").unwrap();
        assert_eq!(at.to_rfc3339(), "2024-05-01T12:30:00+00:00");
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn config_without_secret_rejects_everything() {
        let verifier = HmacSignatureVerifier::from_config(&CloudChargeConfig {
            timestamp_tolerance: 0,
            ..CloudChargeConfig::default()
        })
        .unwrap();
        let data = Map::new();
        assert_eq!(
            verifier.verify(&fields("t", &data), "00"),
            Err(SignatureError::MissingSecret)
        );
    }

    #[test]
    fn only_hmac_sha256_is_supported() {
        let cfg = CloudChargeConfig {
            sign_algorithm: "MD5".into(),
            ..CloudChargeConfig::default()
        };
        assert!(matches!(
            HmacSignatureVerifier::from_config(&cfg),
            Err(SignatureError::UnsupportedAlgorithm(_))
        ));
    }
}
