//! Shared value types for the gateway bridge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Which media a mountpoint publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountpointMode {
    /// Video plus a binary data channel
    AvData,
    /// Binary data channel only
    DataOnly,
}

impl MountpointMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MountpointMode::AvData => "av_data",
            MountpointMode::DataOnly => "data_only",
        }
    }
}

impl Default for MountpointMode {
    fn default() -> Self {
        MountpointMode::AvData
    }
}

/// Ports the gateway assigned to a mountpoint.
///
/// Populated once from the info query. A data-only mountpoint leaves the
/// video fields unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountpointPorts {
    pub video: Option<u16>,
    pub video_control: Option<u16>,
    pub data: Option<u16>,
}

/// A created mountpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mountpoint {
    pub stream_id: u64,
    pub mode: MountpointMode,
    pub ports: MountpointPorts,
}

/// Where to reach the gateway and what to publish there.
#[derive(Clone)]
pub struct ConnectionParams {
    pub address: String,
    pub port: u16,
    pub mode: MountpointMode,
    /// Handed through to the gateway's NAT-traversal setup; never logged.
    pub nat_credential: Option<String>,
}

impl ConnectionParams {
    pub fn new(address: impl Into<String>, port: u16, mode: MountpointMode) -> Self {
        Self {
            address: address.into(),
            port,
            mode,
            nat_credential: None,
        }
    }

    pub fn with_nat_credential(mut self, credential: impl Into<String>) -> Self {
        self.nat_credential = Some(credential.into());
        self
    }

    /// WebSocket URL of the gateway.
    pub fn url(&self) -> String {
        if self.address.starts_with("ws://") || self.address.starts_with("wss://") {
            format!("{}:{}/", self.address.trim_end_matches('/'), self.port)
        } else {
            format!("ws://{}:{}/", self.address, self.port)
        }
    }
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("mode", &self.mode)
            .field(
                "nat_credential",
                &self.nat_credential.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Retry bounds, deadlines and intervals used by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTimings {
    pub connect_attempts: u32,
    pub connect_retry_delay: Duration,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub destroy_timeout: Duration,
    pub keepalive_interval: Duration,
    pub keepalive_timeout: Duration,
}

impl Default for ClientTimings {
    fn default() -> Self {
        Self {
            connect_attempts: 5,
            connect_retry_delay: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            destroy_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(25),
            keepalive_timeout: Duration::from_secs(5),
        }
    }
}

/// Names and codec settings for the published stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSettings {
    pub name: String,
    pub description: String,
    pub video_payload_type: u8,
    pub video_codec: String,
    pub video_fmtp: String,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            name: "printer-camera".to_string(),
            description: "3D printer camera stream".to_string(),
            video_payload_type: 96,
            video_codec: "h264".to_string(),
            video_fmtp: "profile-level-id=42e01f;packetization-mode=1".to_string(),
        }
    }
}

/// Notifications delivered to the host application, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// A browser's media link came up (`true`) or went down (`false`).
    PeerLink(bool),
    /// Raw gateway message for the browser-facing relay.
    Signaling(String),
    /// The gateway link dropped after startup. The client will not reconnect.
    Disconnected,
}

/// Snapshot of the client's traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientStats {
    pub messages_received: u64,
    pub messages_forwarded: u64,
    pub messages_malformed: u64,
    pub requests_resolved: u64,
    pub requests_timed_out: u64,
    pub pending_requests: usize,
    /// When the client last reached Ready
    pub ready_since: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_from_plain_host() {
        let params = ConnectionParams::new("127.0.0.1", 8188, MountpointMode::AvData);
        assert_eq!(params.url(), "ws://127.0.0.1:8188/");
    }

    #[test]
    fn test_url_keeps_scheme() {
        let params = ConnectionParams::new("ws://gateway.local/", 8188, MountpointMode::DataOnly);
        assert_eq!(params.url(), "ws://gateway.local:8188/");
    }

    #[test]
    fn test_debug_redacts_credential() {
        let params = ConnectionParams::new("localhost", 8188, MountpointMode::AvData)
            .with_nat_credential("hunter2");
        let debug = format!("{:?}", params);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_mode_serde_names() {
        let json = serde_json::to_string(&MountpointMode::DataOnly).unwrap();
        assert_eq!(json, "\"data_only\"");
        assert_eq!(MountpointMode::AvData.as_str(), "av_data");
    }
}
