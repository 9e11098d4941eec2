//! CrabCam Bridge: publishes a printer camera through a WebRTC media gateway
//!
//! This crate is the signaling side of a camera streaming proxy. It opens a
//! WebSocket session with the gateway, creates a streaming mountpoint for the
//! local video/data pipeline, keeps the session alive and relays browser
//! signaling traffic in both directions.
//!
//! # Features
//! - Bounded connect retries and per-request deadlines
//! - Audio/video + data or data-only mountpoints
//! - Deduplicated peer-link notifications for gating the media producer
//! - Best-effort mountpoint teardown on stop
//!
//! # Usage
//! ```rust,ignore
//! use crabcam_bridge::{ClientTimings, ConnectionParams, GatewayClient, MountpointMode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), crabcam_bridge::GatewayError> {
//!     let params = ConnectionParams::new("127.0.0.1", 8188, MountpointMode::AvData);
//!     let mut client = GatewayClient::new(params, ClientTimings::default());
//!     let ports = client.start().await?;
//!     println!("push video to {:?}", ports.video);
//!     client.stop().await;
//!     Ok(())
//! }
//! ```
pub mod bridge;
pub mod config;
pub mod errors;
pub mod gateway;
pub mod types;

// Re-exports for convenience
pub use bridge::{EventPump, MediaProducer, PumpExit, SignalingRelay};
pub use config::BridgeConfig;
pub use errors::{GatewayError, GatewayErrorKind};
pub use gateway::{GatewayClient, RelayHandle, SessionState};
pub use types::{
    ClientStats, ClientTimings, ConnectionParams, GatewayEvent, Mountpoint, MountpointMode,
    MountpointPorts, StreamSettings,
};

/// Initialize logging for the bridge
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabcam_bridge=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        gateway_subprotocol: gateway::protocol::GATEWAY_SUBPROTOCOL.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub gateway_subprotocol: String,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "crabcam-bridge");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
        assert_eq!(info.gateway_subprotocol, "janus-protocol");
    }

    #[test]
    fn test_init_logging_is_repeatable() {
        init_logging();
        init_logging();
    }
}
