//! Configuration management for the camera bridge
//!
//! Provides configuration loading, saving, and validation for the gateway
//! connection, the published stream, and the NAT-traversal credential.

use crate::errors::GatewayError;
use crate::types::{ClientTimings, ConnectionParams, MountpointMode, StreamSettings};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for layered configuration
pub const ENV_PREFIX: &str = "CRABCAM";

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub gateway: GatewayConfig,
    pub stream: StreamConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Gateway connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Gateway host name or IP address
    pub address: String,
    /// Gateway WebSocket port
    pub port: u16,
    /// Connect attempts before giving up
    pub connect_attempts: u32,
    /// Delay between connect attempts in milliseconds
    pub connect_retry_delay_ms: u64,
    /// Per-attempt connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Deadline for ordinary requests in milliseconds
    pub request_timeout_ms: u64,
    /// Deadline for the teardown destroy request in milliseconds
    pub destroy_timeout_ms: u64,
    /// Keepalive period in milliseconds; keep under the gateway's session expiry
    pub keepalive_interval_ms: u64,
    /// Deadline for each keepalive in milliseconds
    pub keepalive_timeout_ms: u64,
}

/// Published stream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    pub mode: MountpointMode,
    pub name: String,
    pub description: String,
    /// RTP payload type for video
    pub video_payload_type: u8,
    pub video_codec: String,
    /// Format parameters (fmtp line) for video
    pub video_fmtp: String,
}

#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Pass-through secret for the gateway's NAT-traversal credentials
    pub nat_credential: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field(
                "nat_credential",
                &self.nat_credential.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let timings = ClientTimings::default();
        let stream = StreamSettings::default();
        Self {
            gateway: GatewayConfig {
                address: "127.0.0.1".to_string(),
                port: 8188,
                connect_attempts: timings.connect_attempts,
                connect_retry_delay_ms: timings.connect_retry_delay.as_millis() as u64,
                connect_timeout_ms: timings.connect_timeout.as_millis() as u64,
                request_timeout_ms: timings.request_timeout.as_millis() as u64,
                destroy_timeout_ms: timings.destroy_timeout.as_millis() as u64,
                keepalive_interval_ms: timings.keepalive_interval.as_millis() as u64,
                keepalive_timeout_ms: timings.keepalive_timeout.as_millis() as u64,
            },
            stream: StreamConfig {
                mode: MountpointMode::AvData,
                name: stream.name,
                description: stream.description,
                video_payload_type: stream.video_payload_type,
                video_codec: stream.video_codec,
                video_fmtp: stream.video_fmtp,
            },
            auth: AuthConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, GatewayError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path).map_err(|e| {
            GatewayError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        let config: BridgeConfig = toml::from_str(&contents).map_err(|e| {
            GatewayError::ConfigError(format!("Failed to parse config file: {}", e))
        })?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load defaults, then the TOML file if present, then `CRABCAM_*` environment overrides.
    ///
    /// Nested keys use a double underscore, e.g. `CRABCAM_GATEWAY__PORT=8189`.
    pub fn load_layered<P: AsRef<Path>>(path: P) -> Result<Self, GatewayError> {
        let defaults = config::Config::try_from(&Self::default()).map_err(|e| {
            GatewayError::ConfigError(format!("Failed to build default config: {}", e))
        })?;

        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(
                config::File::from(path.as_ref())
                    .format(config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| GatewayError::ConfigError(format!("Failed to load config: {}", e)))?;

        settings
            .try_deserialize()
            .map_err(|e| GatewayError::ConfigError(format!("Invalid configuration: {}", e)))
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), GatewayError> {
        let path = path.as_ref();

        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                GatewayError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(|e| {
            GatewayError::ConfigError(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, toml_string).map_err(|e| {
            GatewayError::ConfigError(format!("Failed to write config file: {}", e))
        })?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("crabcam-bridge.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_layered(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        let gateway = &self.gateway;
        if gateway.address.trim().is_empty() {
            return Err("Gateway address must not be empty".to_string());
        }
        if gateway.port == 0 {
            return Err("Gateway port must not be 0".to_string());
        }
        if gateway.connect_attempts == 0 {
            return Err("Connect attempts must be at least 1".to_string());
        }
        if gateway.connect_timeout_ms == 0
            || gateway.request_timeout_ms == 0
            || gateway.destroy_timeout_ms == 0
            || gateway.keepalive_timeout_ms == 0
        {
            return Err("Timeouts must be greater than 0".to_string());
        }
        if gateway.keepalive_interval_ms <= gateway.keepalive_timeout_ms {
            return Err("Keepalive interval must exceed the keepalive timeout".to_string());
        }

        if self.stream.name.trim().is_empty() {
            return Err("Stream name must not be empty".to_string());
        }
        if self.stream.video_payload_type > 127 {
            return Err("Video payload type must be between 0 and 127".to_string());
        }

        Ok(())
    }

    pub fn timings(&self) -> ClientTimings {
        let g = &self.gateway;
        ClientTimings {
            connect_attempts: g.connect_attempts,
            connect_retry_delay: Duration::from_millis(g.connect_retry_delay_ms),
            connect_timeout: Duration::from_millis(g.connect_timeout_ms),
            request_timeout: Duration::from_millis(g.request_timeout_ms),
            destroy_timeout: Duration::from_millis(g.destroy_timeout_ms),
            keepalive_interval: Duration::from_millis(g.keepalive_interval_ms),
            keepalive_timeout: Duration::from_millis(g.keepalive_timeout_ms),
        }
    }

    pub fn stream_settings(&self) -> StreamSettings {
        StreamSettings {
            name: self.stream.name.clone(),
            description: self.stream.description.clone(),
            video_payload_type: self.stream.video_payload_type,
            video_codec: self.stream.video_codec.clone(),
            video_fmtp: self.stream.video_fmtp.clone(),
        }
    }

    /// Runtime connection parameters and timings
    pub fn connection_params(&self) -> (ConnectionParams, ClientTimings) {
        let mut params = ConnectionParams::new(
            self.gateway.address.clone(),
            self.gateway.port,
            self.stream.mode,
        );
        params.nat_credential = self.auth.nat_credential.clone();
        (params, self.timings())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.gateway.port, 8188);
        assert_eq!(config.gateway.connect_attempts, 5);
        assert_eq!(config.gateway.request_timeout_ms, 10_000);
        assert_eq!(config.gateway.destroy_timeout_ms, 5_000);
        assert_eq!(config.stream.mode, MountpointMode::AvData);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut bad_port = BridgeConfig::default();
        bad_port.gateway.port = 0;
        assert!(bad_port.validate().is_err());

        let mut bad_keepalive = BridgeConfig::default();
        bad_keepalive.gateway.keepalive_interval_ms = 1_000;
        bad_keepalive.gateway.keepalive_timeout_ms = 5_000;
        assert!(bad_keepalive.validate().is_err());

        let mut bad_attempts = BridgeConfig::default();
        bad_attempts.gateway.connect_attempts = 0;
        assert!(bad_attempts.validate().is_err());
    }

    #[test]
    fn test_config_save_and_load() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("nested").join("bridge.toml");

        let mut config = BridgeConfig::default();
        config.stream.mode = MountpointMode::DataOnly;
        config.auth.nat_credential = Some("secret".to_string());
        assert!(config.save_to_file(&config_path).is_ok());

        let loaded = BridgeConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_toml_format() {
        let config = BridgeConfig::default();
        let toml_string = toml::to_string_pretty(&config).unwrap();

        assert!(toml_string.contains("[gateway]"));
        assert!(toml_string.contains("[stream]"));
        assert!(toml_string.contains("keepalive_interval_ms"));
        assert!(toml_string.contains("mode = \"av_data\""));
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = BridgeConfig::load_from_file("nonexistent_bridge.toml");
        assert!(result.is_ok());
        assert_eq!(result.unwrap().gateway.port, 8188);
    }

    #[test]
    fn test_layered_file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        fs::write(
            &path,
            r#"
[gateway]
address = "gateway.local"
port = 8989
connect_attempts = 2
connect_retry_delay_ms = 100
connect_timeout_ms = 1000
request_timeout_ms = 3000
destroy_timeout_ms = 1000
keepalive_interval_ms = 20000
keepalive_timeout_ms = 2000

[stream]
mode = "data_only"
name = "bench"
description = "bench camera"
video_payload_type = 100
video_codec = "h264"
video_fmtp = "packetization-mode=1"
"#,
        )
        .unwrap();

        let config = BridgeConfig::load_layered(&path).unwrap();
        assert_eq!(config.gateway.address, "gateway.local");
        assert_eq!(config.gateway.port, 8989);
        assert_eq!(config.stream.mode, MountpointMode::DataOnly);
        assert_eq!(config.auth.nat_credential, None);

        let (params, timings) = config.connection_params();
        assert_eq!(params.url(), "ws://gateway.local:8989/");
        assert_eq!(timings.connect_attempts, 2);
        assert_eq!(timings.request_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_load_or_default_is_valid() {
        let config = BridgeConfig::load_or_default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_auth_debug_is_redacted() {
        let auth = AuthConfig {
            nat_credential: Some("turn-secret".to_string()),
        };
        assert!(!format!("{:?}", auth).contains("turn-secret"));
    }
}
