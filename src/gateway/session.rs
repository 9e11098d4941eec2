//! Startup sequence against the gateway.
//!
//! ```text
//! Idle -> Connecting -> SessionCreated -> HandleAttached -> MountpointCreated -> Ready
//! ```
//!
//! Only the transport connect is retried. Once connected, any failing step
//! aborts the sequence; whatever was obtained so far stays on the
//! [`Negotiator`] so the caller can tear it down.

use crate::errors::GatewayError;
use crate::gateway::link::GatewayLink;
use crate::gateway::mountpoint::{self, MountpointRequest};
use crate::gateway::protocol::{OutboundRequest, STREAMING_PLUGIN};
use crate::gateway::transport::{InboundMessages, Transport};
use crate::types::{Mountpoint, MountpointPorts};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Connecting,
    SessionCreated,
    HandleAttached,
    MountpointCreated,
    Ready,
}

/// Connect with a fixed number of attempts and a fixed delay between them.
pub async fn connect_with_retry(
    url: &str,
    attempts: u32,
    delay: Duration,
    timeout: Duration,
) -> Result<(Transport, InboundMessages), GatewayError> {
    let attempts = attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match Transport::connect(url, timeout).await {
            Ok(connected) => {
                if attempt > 1 {
                    log::info!("Connected to gateway on attempt {}/{}", attempt, attempts);
                }
                return Ok(connected);
            }
            Err(e) => {
                log::warn!("Gateway connect attempt {}/{} failed: {}", attempt, attempts, e);
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    let reason = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no attempts made".to_string());
    Err(GatewayError::ConnectionError(format!(
        "giving up after {} attempt(s): {}",
        attempts, reason
    )))
}

/// Drives the post-connect steps and remembers what it obtained.
pub struct Negotiator<'a> {
    link: &'a GatewayLink,
    timeout: Duration,
    state: SessionState,
    session_id: Option<u64>,
    handle_id: Option<u64>,
    mountpoint: Option<Mountpoint>,
}

impl<'a> Negotiator<'a> {
    pub fn new(link: &'a GatewayLink, timeout: Duration) -> Self {
        Self {
            link,
            timeout,
            state: SessionState::Connecting,
            session_id: None,
            handle_id: None,
            mountpoint: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    pub fn handle_id(&self) -> Option<u64> {
        self.handle_id
    }

    pub fn mountpoint(&self) -> Option<&Mountpoint> {
        self.mountpoint.as_ref()
    }

    fn require(&self, id: Option<u64>, what: &str) -> Result<u64, GatewayError> {
        id.ok_or_else(|| {
            GatewayError::SetupError(format!("{} is not available in state {:?}", what, self.state))
        })
    }

    pub async fn create_session(&mut self) -> Result<u64, GatewayError> {
        let response = self
            .link
            .request(OutboundRequest::create_session(), self.timeout)
            .await?;
        let session_id = response
            .data_id()
            .ok_or_else(|| GatewayError::SetupError("create session returned no id".to_string()))?;

        self.session_id = Some(session_id);
        self.state = SessionState::SessionCreated;
        log::info!("Gateway session {} created", session_id);
        Ok(session_id)
    }

    pub async fn attach_plugin(&mut self) -> Result<u64, GatewayError> {
        let session_id = self.require(self.session_id, "session id")?;
        let response = self
            .link
            .request(OutboundRequest::attach(session_id, STREAMING_PLUGIN), self.timeout)
            .await?;
        let handle_id = response
            .data_id()
            .ok_or_else(|| GatewayError::SetupError("attach returned no handle id".to_string()))?;

        self.handle_id = Some(handle_id);
        self.state = SessionState::HandleAttached;
        log::info!("Attached {} as handle {}", STREAMING_PLUGIN, handle_id);
        Ok(handle_id)
    }

    pub async fn create_mountpoint(&mut self, request: &MountpointRequest) -> Result<u64, GatewayError> {
        let session_id = self.require(self.session_id, "session id")?;
        let handle_id = self.require(self.handle_id, "handle id")?;

        let stream_id =
            mountpoint::create(self.link, session_id, handle_id, request, self.timeout).await?;

        self.mountpoint = Some(Mountpoint {
            stream_id,
            mode: request.mode,
            ports: MountpointPorts::default(),
        });
        self.state = SessionState::MountpointCreated;
        Ok(stream_id)
    }

    pub async fn resolve_ports(&mut self) -> Result<MountpointPorts, GatewayError> {
        let session_id = self.require(self.session_id, "session id")?;
        let handle_id = self.require(self.handle_id, "handle id")?;
        let stream_id = self.require(self.mountpoint.as_ref().map(|m| m.stream_id), "mountpoint")?;

        let ports =
            mountpoint::query_ports(self.link, session_id, handle_id, stream_id, self.timeout)
                .await?;

        if let Some(mountpoint) = self.mountpoint.as_mut() {
            mountpoint.ports = ports;
        }
        self.state = SessionState::Ready;
        log::info!(
            "Mountpoint {} ports: video={:?} video_control={:?} data={:?}",
            stream_id,
            ports.video,
            ports.video_control,
            ports.data
        );
        Ok(ports)
    }

    /// Run all four steps in order.
    pub async fn run(&mut self, request: &MountpointRequest) -> Result<Mountpoint, GatewayError> {
        self.create_session().await?;
        self.attach_plugin().await?;
        self.create_mountpoint(request).await?;
        self.resolve_ports().await?;
        self.mountpoint
            .clone()
            .ok_or_else(|| GatewayError::SetupError("mountpoint missing after setup".to_string()))
    }
}
