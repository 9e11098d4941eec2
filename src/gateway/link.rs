//! A gateway connection together with the requests in flight on it.
//!
//! Tracked requests go through the correlator; relay traffic is written
//! as-is and never matched against a response.

use crate::errors::GatewayError;
use crate::gateway::correlator::{Completion, Correlator};
use crate::gateway::protocol::{InboundMessage, OutboundRequest};
use crate::gateway::transport::Transport;
use std::sync::Arc;
use std::time::Duration;

/// Transport plus the correlator tracking requests sent over it.
pub struct GatewayLink {
    transport: Transport,
    correlator: Arc<Correlator>,
}

impl GatewayLink {
    pub fn new(transport: Transport, correlator: Arc<Correlator>) -> Self {
        Self {
            transport,
            correlator,
        }
    }

    /// Send a tracked request and wait for its result.
    pub async fn request(
        &self,
        request: OutboundRequest,
        timeout: Duration,
    ) -> Result<InboundMessage, GatewayError> {
        self.request_with(request, Completion::Result, timeout).await
    }

    pub async fn request_with(
        &self,
        request: OutboundRequest,
        completion: Completion,
        timeout: Duration,
    ) -> Result<InboundMessage, GatewayError> {
        self.correlator
            .send(request, completion, timeout, |text| self.transport.send(text))
            .await
    }

    /// Write an opaque message without transaction tracking.
    pub async fn send_raw(&self, text: String) -> Result<(), GatewayError> {
        self.transport.send(text).await
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub async fn close(&self) {
        self.transport.close().await
    }
}
