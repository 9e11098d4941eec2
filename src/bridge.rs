//! Host-side collaborators fed by the gateway client.
//!
//! The media producer only sees the assigned ports and a start/stop gate.
//! The signaling relay only sees opaque message text.

use crate::types::{GatewayEvent, MountpointPorts};
use tokio::sync::mpsc;

/// The video/data pipeline that pushes media into the mountpoint.
pub trait MediaProducer: Send {
    /// Called once, after the client is ready.
    fn configure(&mut self, ports: MountpointPorts);

    /// `true` resumes pushing frames, `false` pauses.
    fn set_streaming(&mut self, enabled: bool);
}

/// The browser-facing signaling relay.
pub trait SignalingRelay: Send {
    fn forward(&mut self, message: &str);
}

/// Why the pump stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// The gateway link dropped
    Disconnected,
    /// The client side of the channel went away
    ChannelClosed,
}

/// Drives collaborators from the client's event channel, in arrival order.
pub struct EventPump<P, R> {
    producer: P,
    relay: R,
    streaming: bool,
}

impl<P: MediaProducer, R: SignalingRelay> EventPump<P, R> {
    pub fn new(producer: P, relay: R) -> Self {
        Self {
            producer,
            relay,
            streaming: false,
        }
    }

    /// Hand the assigned ports to the producer.
    pub fn configure(&mut self, ports: MountpointPorts) {
        self.producer.configure(ports);
    }

    fn gate(&mut self, enabled: bool) {
        if self.streaming != enabled {
            self.streaming = enabled;
            self.producer.set_streaming(enabled);
        }
    }

    pub fn handle(&mut self, event: GatewayEvent) -> Option<PumpExit> {
        match event {
            GatewayEvent::PeerLink(up) => self.gate(up),
            GatewayEvent::Signaling(message) => self.relay.forward(&message),
            GatewayEvent::Disconnected => {
                self.gate(false);
                return Some(PumpExit::Disconnected);
            }
        }
        None
    }

    pub async fn run(&mut self, events: &mut mpsc::UnboundedReceiver<GatewayEvent>) -> PumpExit {
        while let Some(event) = events.recv().await {
            if let Some(exit) = self.handle(event) {
                return exit;
            }
        }
        self.gate(false);
        PumpExit::ChannelClosed
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn into_parts(self) -> (P, R) {
        (self.producer, self.relay)
    }
}
