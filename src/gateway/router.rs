//! Classification and dispatch of inbound gateway messages.
//!
//! A single consumer handles messages in arrival order. Responses to this
//! client's own requests and acknowledgements stay internal; everything
//! else goes to the signaling relay as the original text.

use crate::gateway::correlator::{Correlator, Delivery};
use crate::gateway::protocol::{InboundMessage, MessageKind};
use crate::gateway::transport::InboundMessages;
use crate::types::GatewayEvent;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What the router did with one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Unparsable or unknown kind
    Dropped,
    /// Completed one of our pending requests
    Resolved,
    /// Housekeeping: a non-final reply to our request, or an ack
    Internal,
    /// Handed to the relay
    Forwarded,
}

#[derive(Debug, Default)]
pub struct RouterCounters {
    pub received: AtomicU64,
    pub forwarded: AtomicU64,
    pub malformed: AtomicU64,
}

pub struct MessageRouter {
    correlator: Arc<Correlator>,
    peer_link: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<GatewayEvent>,
    counters: Arc<RouterCounters>,
}

impl MessageRouter {
    pub fn new(
        correlator: Arc<Correlator>,
        peer_link: Arc<AtomicBool>,
        events: mpsc::UnboundedSender<GatewayEvent>,
        counters: Arc<RouterCounters>,
    ) -> Self {
        Self {
            correlator,
            peer_link,
            events,
            counters,
        }
    }

    fn emit(&self, event: GatewayEvent) {
        // The host may have dropped its receiver; routing carries on regardless.
        let _ = self.events.send(event);
    }

    fn set_peer_link(&self, up: bool, reason: Option<&str>) {
        let was_up = self.peer_link.swap(up, Ordering::AcqRel);
        if was_up == up {
            return;
        }
        if up {
            log::info!("Peer media link is up");
        } else {
            log::info!(
                "Peer media link is down ({})",
                reason.unwrap_or("no reason given")
            );
        }
        self.emit(GatewayEvent::PeerLink(up));
    }

    pub fn route(&self, raw: String) -> Route {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let message = match InboundMessage::parse(&raw) {
            Ok(message) => message,
            Err(e) => {
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                log::warn!("Dropping gateway message: {}", e);
                return Route::Dropped;
            }
        };

        match message.janus {
            MessageKind::Error => {
                let (code, reason) = message
                    .error
                    .as_ref()
                    .map(|e| (e.code, e.reason.as_str()))
                    .unwrap_or((0, "unspecified"));
                log::warn!(
                    "Gateway error {} (transaction {:?}): {}",
                    code,
                    message.transaction,
                    reason
                );
            }
            MessageKind::Webrtcup => self.set_peer_link(true, None),
            MessageKind::Hangup => self.set_peer_link(false, message.reason.as_deref()),
            MessageKind::Timeout => {
                log::warn!("Gateway reports session {:?} expired", message.session_id)
            }
            MessageKind::Detached => {
                log::info!("Gateway detached handle {:?}", message.sender)
            }
            _ => {}
        }

        match self.correlator.deliver(&message) {
            Delivery::Resolved => return Route::Resolved,
            Delivery::Pending => return Route::Internal,
            Delivery::Unmatched => {}
        }

        if message.janus == MessageKind::Ack {
            return Route::Internal;
        }

        self.counters.forwarded.fetch_add(1, Ordering::Relaxed);
        self.emit(GatewayEvent::Signaling(raw));
        Route::Forwarded
    }

    /// Route until cancelled or the link drops.
    ///
    /// A dropped link is terminal: pending requests are cancelled, the peer
    /// link is reported down, `Disconnected` is emitted and the root scope
    /// is cancelled.
    pub async fn run(self, mut inbound: InboundMessages, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                next = inbound.recv() => match next {
                    Some(raw) => {
                        self.route(raw);
                    }
                    None => break,
                },
            }
        }

        if cancel.is_cancelled() {
            return;
        }
        log::warn!("Gateway link lost; this connection will not reconnect");
        self.correlator.cancel_all();
        self.set_peer_link(false, Some("gateway link lost"));
        self.emit(GatewayEvent::Disconnected);
        cancel.cancel();
    }
}
