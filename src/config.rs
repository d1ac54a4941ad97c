//! Application configuration
//!
//! Loaded from a TOML file. Every section falls back to defaults so a
//! partial file (or none at all) yields a runnable gateway.
//!
//! ```toml
//! [server]
//! ws_port = 8088
//! api_port = 8080
//!
//! [session]
//! max_sessions = 1000
//! missed_heartbeats = 3
//!
//! [cloud_charge]
//! app_secret = "change-me"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::ProtocolType;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub protocol: ProtocolConfig,
    pub cloud_charge: CloudChargeConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Load `path`, or defaults when the file does not exist.
    /// A file that exists but cannot be parsed is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            warn!(path = %path.display(), "Config file not found, using defaults");
            Ok(Self::default())
        }
    }
}

/// `<config_dir>/evcs-gateway/config.toml`, or `./config.toml` when the
/// platform has no config directory.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .map(|dir| dir.join("evcs-gateway").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub ws_host: String,
    pub ws_port: u16,
    pub api_host: String,
    pub api_port: u16,
    /// Seconds granted to in-flight work during shutdown.
    pub shutdown_timeout: u64,
}

impl ServerConfig {
    pub fn ws_address(&self) -> String {
        format!("{}:{}", self.ws_host, self.ws_port)
    }

    pub fn api_address(&self) -> String {
        format!("{}:{}", self.api_host, self.api_port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_host: "0.0.0.0".to_string(),
            ws_port: 8088,
            api_host: "0.0.0.0".to_string(),
            api_port: 8080,
            shutdown_timeout: 30,
        }
    }
}

/// Session registry and sweeper settings. Durations are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Hard ceiling on concurrently admitted sessions.
    pub max_sessions: usize,
    /// Heartbeat interval assumed before the device boots.
    pub default_heartbeat_interval: u32,
    /// Interval offered to devices in the BootNotification response.
    pub boot_heartbeat_interval: u32,
    /// Missed intervals tolerated before a session is failed.
    pub missed_heartbeats: u32,
    pub heartbeat_check_interval: u64,
    /// Absolute idle limit, independent of the heartbeat interval.
    pub idle_timeout: u64,
    pub idle_sweep_interval: u64,
}

impl SessionConfig {
    pub fn heartbeat_check_period(&self) -> Duration {
        Duration::from_secs(self.heartbeat_check_interval.max(1))
    }

    pub fn idle_sweep_period(&self) -> Duration {
        Duration::from_secs(self.idle_sweep_interval.max(1))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 1000,
            default_heartbeat_interval: 60,
            boot_heartbeat_interval: 300,
            missed_heartbeats: 3,
            heartbeat_check_interval: 60,
            idle_timeout: 30 * 60,
            idle_sweep_interval: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Owner of devices whose protocol has not been recorded yet.
    pub default_protocol: ProtocolType,
    pub ocpp_version: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            default_protocol: ProtocolType::Ocpp,
            ocpp_version: "1.6".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudChargeConfig {
    /// Shared HMAC secret. Without it every signed request is rejected.
    pub app_secret: Option<String>,
    pub sign_algorithm: String,
    pub api_version: String,
    /// Allowed clock skew in seconds; 0 disables the check.
    pub timestamp_tolerance: u64,
    pub next_heartbeat: u32,
}

impl Default for CloudChargeConfig {
    fn default() -> Self {
        Self {
            app_secret: None,
            sign_algorithm: "HMAC-SHA256".to_string(),
            api_version: "3.0".to_string(),
            timestamp_tolerance: 300,
            next_heartbeat: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `plain` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "plain".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = AppConfig::from_toml("").unwrap();
        assert_eq!(cfg.server.ws_port, 8088);
        assert_eq!(cfg.session.max_sessions, 1000);
        assert_eq!(cfg.session.missed_heartbeats, 3);
        assert_eq!(cfg.protocol.default_protocol, ProtocolType::Ocpp);
        assert_eq!(cfg.cloud_charge.api_version, "3.0");
        assert!(cfg.cloud_charge.app_secret.is_none());
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let cfg = AppConfig::from_toml(
            r#"
            [server]
            ws_port = 9000

            [protocol]
            default_protocol = "CLOUD_CHARGE"

            [cloud_charge]
            app_secret = "s3cret"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.ws_port, 9000);
        assert_eq!(cfg.server.api_port, 8080);
        assert_eq!(cfg.protocol.default_protocol, ProtocolType::CloudCharge);
        assert_eq!(cfg.cloud_charge.app_secret.as_deref(), Some("s3cret"));
        assert_eq!(cfg.cloud_charge.timestamp_tolerance, 300);
    }

    #[test]
    fn invalid_toml_is_parse_error() {
        assert!(AppConfig::from_toml("[server\nws_port = ").is_err());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = AppConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        let cfg = AppConfig::load_or_default(Path::new("/definitely/not/here.toml")).unwrap();
        assert_eq!(cfg.server.api_port, 8080);
    }

    #[test]
    fn default_path_ends_with_crate_dir() {
        assert!(default_config_path().ends_with("config.toml"));
    }
}
