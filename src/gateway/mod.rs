//! Gateway signaling client
//!
//! Establishes a session with the WebRTC media gateway, publishes a
//! streaming mountpoint, keeps the session alive and relays signaling
//! traffic for the browser-facing UI.
pub mod client;
pub mod correlator;
pub mod keepalive;
pub mod link;
pub mod mountpoint;
pub mod protocol;
pub mod router;
pub mod session;
pub mod transport;

pub use client::{GatewayClient, RelayHandle};
pub use correlator::{Completion, Correlator, Delivery};
pub use protocol::{InboundMessage, MessageKind, OutboundRequest};
pub use router::{MessageRouter, Route};
pub use session::SessionState;
pub use transport::Transport;
