//! Gateway client lifecycle.
//!
//! ```text
//! start: connect (bounded retries) -> router task -> session/handle/mountpoint/ports
//!        -> keepalive task -> Ready
//! stop:  destroy mountpoint (best effort) -> cancel root scope -> join tasks -> close link
//! ```
//!
//! A client is one connection. After `stop`, a failed `start`, or a lost
//! link it does not come back; build a new client instead.

use chrono::{DateTime, Utc};
use crate::errors::GatewayError;
use crate::gateway::correlator::{Completion, Correlator};
use crate::gateway::keepalive;
use crate::gateway::link::GatewayLink;
use crate::gateway::mountpoint::{self, MountpointRequest};
use crate::gateway::protocol::{InboundMessage, OutboundRequest};
use crate::gateway::router::{MessageRouter, RouterCounters};
use crate::gateway::session::{connect_with_retry, Negotiator, SessionState};
use crate::types::{
    ClientStats, ClientTimings, ConnectionParams, GatewayEvent, Mountpoint, MountpointPorts,
    StreamSettings,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Cloneable handle for writing to the gateway from other tasks.
#[derive(Clone)]
pub struct RelayHandle {
    link: Arc<GatewayLink>,
}

impl RelayHandle {
    /// Write an opaque message without transaction tracking.
    pub async fn send(&self, raw: String) -> Result<(), GatewayError> {
        self.link.send_raw(raw).await
    }

    /// Send a tracked request and wait for its result.
    ///
    /// Stopping or dropping the client resolves it with `CancelledError`.
    pub async fn request(
        &self,
        request: OutboundRequest,
        timeout: Duration,
    ) -> Result<InboundMessage, GatewayError> {
        self.link.request(request, timeout).await
    }
}

pub struct GatewayClient {
    params: ConnectionParams,
    timings: ClientTimings,
    stream: StreamSettings,
    correlator: Arc<Correlator>,
    counters: Arc<RouterCounters>,
    peer_link: Arc<AtomicBool>,
    cancel: CancellationToken,
    link: Option<Arc<GatewayLink>>,
    tasks: Vec<JoinHandle<()>>,
    events_tx: mpsc::UnboundedSender<GatewayEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<GatewayEvent>>,
    state: SessionState,
    session_id: Option<u64>,
    handle_id: Option<u64>,
    mountpoint: Option<Mountpoint>,
    ready_since: Option<DateTime<Utc>>,
    stopped: bool,
}

impl GatewayClient {
    pub fn new(params: ConnectionParams, timings: ClientTimings) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            params,
            timings,
            stream: StreamSettings::default(),
            correlator: Arc::new(Correlator::new()),
            counters: Arc::new(RouterCounters::default()),
            peer_link: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            link: None,
            tasks: Vec::new(),
            events_tx,
            events_rx: Some(events_rx),
            state: SessionState::Idle,
            session_id: None,
            handle_id: None,
            mountpoint: None,
            ready_since: None,
            stopped: false,
        }
    }

    pub fn with_stream_settings(mut self, stream: StreamSettings) -> Self {
        self.stream = stream;
        self
    }

    /// Event channel for the host. Can be taken once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<GatewayEvent>> {
        self.events_rx.take()
    }

    /// Connect, negotiate and publish the mountpoint.
    ///
    /// On failure the client tears down whatever it set up and stays stopped.
    pub async fn start(&mut self) -> Result<MountpointPorts, GatewayError> {
        if self.stopped || self.state != SessionState::Idle {
            return Err(GatewayError::SetupError(
                "client already started; create a new client to reconnect".to_string(),
            ));
        }

        let url = self.params.url();
        log::info!(
            "Starting gateway client for {} ({} mountpoint)",
            url,
            self.params.mode.as_str()
        );
        self.state = SessionState::Connecting;

        let (transport, inbound) = match connect_with_retry(
            &url,
            self.timings.connect_attempts,
            self.timings.connect_retry_delay,
            self.timings.connect_timeout,
        )
        .await
        {
            Ok(connected) => connected,
            Err(e) => {
                log::error!("Gateway client failed to connect: {}", e);
                self.stop().await;
                return Err(e);
            }
        };

        let link = Arc::new(GatewayLink::new(transport, Arc::clone(&self.correlator)));
        self.link = Some(Arc::clone(&link));

        let router = MessageRouter::new(
            Arc::clone(&self.correlator),
            Arc::clone(&self.peer_link),
            self.events_tx.clone(),
            Arc::clone(&self.counters),
        );
        self.tasks
            .push(tokio::spawn(router.run(inbound, self.cancel.clone())));

        let request = MountpointRequest::new(self.params.mode, self.stream.clone());
        let mut negotiator = Negotiator::new(&link, self.timings.request_timeout);
        let outcome = negotiator.run(&request).await;

        self.state = negotiator.state();
        self.session_id = negotiator.session_id();
        self.handle_id = negotiator.handle_id();
        self.mountpoint = negotiator.mountpoint().cloned();

        let mountpoint = match outcome {
            Ok(mountpoint) => mountpoint,
            Err(e) => {
                log::error!("Gateway setup failed in state {:?}: {}", self.state, e);
                self.stop().await;
                return Err(e);
            }
        };

        if let Some(session_id) = self.session_id {
            self.spawn_keepalive(Arc::clone(&link), session_id);
        }

        self.ready_since = Some(Utc::now());
        log::info!("Gateway client ready (mountpoint {})", mountpoint.stream_id);
        Ok(mountpoint.ports)
    }

    fn spawn_keepalive(&mut self, link: Arc<GatewayLink>, session_id: u64) {
        let timeout = self.timings.keepalive_timeout;
        let task = keepalive::run(
            self.timings.keepalive_interval,
            self.cancel.clone(),
            move || {
                let link = Arc::clone(&link);
                async move {
                    link.request_with(OutboundRequest::keepalive(session_id), Completion::Ack, timeout)
                        .await
                        .map(|_| ())
                }
            },
        );
        self.tasks.push(tokio::spawn(task));
    }

    /// Tear down the connection. Safe to call more than once.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        if let Some(link) = self.link.clone() {
            self.destroy_mountpoint(&link).await;
        }

        self.cancel.cancel();
        let cancelled = self.correlator.cancel_all();
        if cancelled > 0 {
            log::debug!("Cancelled {} in-flight request(s) during stop", cancelled);
        }

        for mut task in self.tasks.drain(..) {
            match tokio::time::timeout(TASK_JOIN_TIMEOUT, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::error!("Gateway client task failed: {}", e),
                Err(_) => {
                    log::warn!("Gateway client task did not stop in time; aborting");
                    task.abort();
                }
            }
        }

        if let Some(link) = self.link.take() {
            link.close().await;
        }

        self.peer_link.store(false, Ordering::Release);
        self.state = SessionState::Idle;
        log::info!("Gateway client stopped");
    }

    async fn destroy_mountpoint(&self, link: &GatewayLink) {
        let (Some(session_id), Some(handle_id), Some(mountpoint)) =
            (self.session_id, self.handle_id, self.mountpoint.as_ref())
        else {
            return;
        };

        if self.cancel.is_cancelled() || !link.is_connected() {
            log::debug!(
                "Skipping destroy of mountpoint {}: gateway link is down",
                mountpoint.stream_id
            );
            return;
        }

        if let Err(e) = mountpoint::destroy(
            link,
            session_id,
            handle_id,
            mountpoint.stream_id,
            self.timings.destroy_timeout,
        )
        .await
        {
            log::warn!("{}", e);
        }
    }

    /// Write an opaque message from the relay straight to the gateway.
    pub async fn send_relay(&self, raw: String) -> Result<(), GatewayError> {
        match &self.link {
            Some(link) => link.send_raw(raw).await,
            None => Err(GatewayError::SendError("gateway link is not open".to_string())),
        }
    }

    pub fn relay_handle(&self) -> Option<RelayHandle> {
        self.link.as_ref().map(|link| RelayHandle {
            link: Arc::clone(link),
        })
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready && !self.cancel.is_cancelled() && self.is_connected()
    }

    pub fn is_connected(&self) -> bool {
        self.link.as_ref().map(|l| l.is_connected()).unwrap_or(false)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Current peer-link state, readable from any thread.
    pub fn peer_link_up(&self) -> bool {
        self.peer_link.load(Ordering::Acquire)
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

    pub fn ports(&self) -> Option<MountpointPorts> {
        self.mountpoint.as_ref().map(|m| m.ports)
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            messages_received: self.counters.received.load(Ordering::Relaxed),
            messages_forwarded: self.counters.forwarded.load(Ordering::Relaxed),
            messages_malformed: self.counters.malformed.load(Ordering::Relaxed),
            requests_resolved: self.correlator.resolved_count(),
            requests_timed_out: self.correlator.timed_out_count(),
            pending_requests: self.correlator.pending_count(),
            ready_since: self.ready_since,
        }
    }
}

impl Drop for GatewayClient {
    fn drop(&mut self) {
        if !self.stopped {
            self.cancel.cancel();
            self.correlator.cancel_all();
        }
    }
}
