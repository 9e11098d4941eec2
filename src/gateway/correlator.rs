//! Transaction correlation for gateway requests.
//!
//! Every outbound request gets a fresh transaction id and a one-shot slot in
//! the pending map. The slot is resolved exactly once: by the router when a
//! matching response arrives, by the caller's deadline, or by `cancel_all`
//! when the connection shuts down. The map lock is only held for the map
//! operation itself, never across an await. The deadline and shutdown
//! both cover the transmit step as well as the wait for a response.

use crate::errors::GatewayError;
use crate::gateway::protocol::{InboundMessage, MessageKind, OutboundRequest};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

/// Prefix that keeps our transaction ids apart from relay-chosen ones.
pub const TRANSACTION_PREFIX: &str = "cc-";

/// Which inbound kinds complete a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// success, error, or an event with a plugin result
    Result,
    /// as `Result`, plus a bare `ack` (liveness pings)
    Ack,
}

impl Completion {
    fn accepts(&self, message: &InboundMessage) -> bool {
        match self {
            Completion::Result => message.is_terminal(),
            Completion::Ack => message.is_terminal() || message.janus == MessageKind::Ack,
        }
    }
}

/// Outcome of offering an inbound message to the pending map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// No pending request carries this transaction id
    Unmatched,
    /// Matches a pending request, but the kind does not complete it
    Pending,
    /// The pending request was resolved with this message
    Resolved,
}

struct PendingRequest {
    completion: Completion,
    slot: oneshot::Sender<InboundMessage>,
}

#[derive(Default)]
struct PendingMap {
    requests: HashMap<String, PendingRequest>,
    closed: bool,
}

pub struct Correlator {
    pending: Mutex<PendingMap>,
    next_transaction: AtomicU64,
    resolved: AtomicU64,
    timed_out: AtomicU64,
    shutdown: CancellationToken,
}

/// Removes the pending entry if the caller stops waiting for any reason.
struct PendingGuard<'a> {
    correlator: &'a Correlator,
    transaction: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.correlator.remove(&self.transaction);
    }
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(PendingMap::default()),
            next_transaction: AtomicU64::new(1),
            resolved: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PendingMap> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocates a transaction id and registers its slot.
    fn register(
        &self,
        completion: Completion,
    ) -> Result<(String, oneshot::Receiver<InboundMessage>), GatewayError> {
        let mut pending = self.lock();
        if pending.closed {
            return Err(GatewayError::CancelledError);
        }
        let transaction = format!(
            "{}{}",
            TRANSACTION_PREFIX,
            self.next_transaction.fetch_add(1, Ordering::Relaxed)
        );
        let (slot, rx) = oneshot::channel();
        pending
            .requests
            .insert(transaction.clone(), PendingRequest { completion, slot });
        Ok((transaction, rx))
    }

    fn remove(&self, transaction: &str) -> bool {
        self.lock().requests.remove(transaction).is_some()
    }

    /// Stamps `request`, transmits it and waits for its resolution.
    ///
    /// `transmit` receives the serialized request text; a transmit failure
    /// resolves the request with that error. `timeout` runs from the start of
    /// the transmit, so a write that never completes still times out.
    pub async fn send<F, Fut>(
        &self,
        mut request: OutboundRequest,
        completion: Completion,
        timeout: Duration,
        transmit: F,
    ) -> Result<InboundMessage, GatewayError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<(), GatewayError>>,
    {
        let (transaction, rx) = self.register(completion)?;
        let _guard = PendingGuard {
            correlator: self,
            transaction: transaction.clone(),
        };

        request.transaction = transaction.clone();
        let text = serde_json::to_string(&request)
            .map_err(|e| GatewayError::SendError(format!("Failed to encode request: {}", e)))?;

        log::debug!("-> {:?} (transaction {})", request.janus, transaction);
        let exchange = async {
            transmit(text).await?;
            rx.await.map_err(|_| GatewayError::CancelledError)
        };

        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(GatewayError::CancelledError),
            outcome = tokio::time::timeout(timeout, exchange) => outcome,
        };

        match outcome {
            Ok(Ok(message)) => message.into_result(),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                self.timed_out.fetch_add(1, Ordering::Relaxed);
                log::debug!("Transaction {} timed out after {:?}", transaction, timeout);
                Err(GatewayError::TimeoutError {
                    transaction,
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Offers an inbound message to the pending request with its transaction id.
    pub fn deliver(&self, message: &InboundMessage) -> Delivery {
        let Some(transaction) = message.transaction.as_deref() else {
            return Delivery::Unmatched;
        };

        let entry = {
            let mut pending = self.lock();
            let accepts = match pending.requests.get(transaction) {
                None => return Delivery::Unmatched,
                Some(entry) => entry.completion.accepts(message),
            };
            if !accepts {
                return Delivery::Pending;
            }
            pending.requests.remove(transaction)
        };

        if let Some(entry) = entry {
            self.resolved.fetch_add(1, Ordering::Relaxed);
            // The caller may have given up between our lookup and this send.
            let _ = entry.slot.send(message.clone());
        }
        Delivery::Resolved
    }

    /// Resolves every pending request with `CancelledError` and refuses new ones.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut pending = self.lock();
            pending.closed = true;
            pending.requests.drain().map(|(_, entry)| entry).collect()
        };
        // Wakes callers still blocked in transmit, not only those awaiting a reply.
        self.shutdown.cancel();
        if !drained.is_empty() {
            log::debug!("Cancelled {} pending request(s)", drained.len());
        }
        // Dropping the senders wakes every waiter with a receive error.
        drained.len()
    }

    pub fn is_pending(&self, transaction: &str) -> bool {
        self.lock().requests.contains_key(transaction)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().requests.len()
    }

    pub fn resolved_count(&self) -> u64 {
        self.resolved.load(Ordering::Relaxed)
    }

    pub fn timed_out_count(&self) -> u64 {
        self.timed_out.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn response(kind: &str, transaction: &str) -> InboundMessage {
        InboundMessage::parse(&format!(
            r#"{{"janus":"{}","transaction":"{}","data":{{"id":5}}}}"#,
            kind, transaction
        ))
        .unwrap()
    }

    fn transaction_of(text: &str) -> String {
        let value: serde_json::Value = serde_json::from_str(text).unwrap();
        value["transaction"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_matching_response_resolves_only_that_request() {
        let correlator = Arc::new(Correlator::new());
        let (wire_tx, mut wire_rx) = mpsc::unbounded_channel::<String>();

        let mut callers = Vec::new();
        for _ in 0..3 {
            let correlator = Arc::clone(&correlator);
            let wire_tx = wire_tx.clone();
            callers.push(tokio::spawn(async move {
                correlator
                    .send(
                        OutboundRequest::create_session(),
                        Completion::Result,
                        Duration::from_secs(5),
                        |text| async move {
                            wire_tx.send(text).unwrap();
                            Ok(())
                        },
                    )
                    .await
            }));
        }

        let mut transactions = Vec::new();
        for _ in 0..3 {
            transactions.push(transaction_of(&wire_rx.recv().await.unwrap()));
        }
        assert_eq!(correlator.pending_count(), 3);

        let target = transactions[1].clone();
        assert_eq!(correlator.deliver(&response("success", &target)), Delivery::Resolved);
        assert!(!correlator.is_pending(&target));
        assert!(correlator.is_pending(&transactions[0]));
        assert!(correlator.is_pending(&transactions[2]));

        assert_eq!(correlator.cancel_all(), 2);
        let mut outcomes = Vec::new();
        for caller in callers {
            outcomes.push(caller.await.unwrap());
        }
        assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, Err(GatewayError::CancelledError)))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_timeout_removes_pending_entry() {
        let correlator = Correlator::new();
        let mut sent = String::new();
        let result = correlator
            .send(
                OutboundRequest::keepalive(1),
                Completion::Ack,
                Duration::from_millis(20),
                |text| {
                    sent = text;
                    async { Ok(()) }
                },
            )
            .await;

        assert!(matches!(result, Err(GatewayError::TimeoutError { .. })));
        assert!(!correlator.is_pending(&transaction_of(&sent)));
        assert_eq!(correlator.pending_count(), 0);
        assert_eq!(correlator.timed_out_count(), 1);
    }

    #[tokio::test]
    async fn test_transmit_failure_leaves_nothing_pending() {
        let correlator = Correlator::new();
        let result = correlator
            .send(
                OutboundRequest::create_session(),
                Completion::Result,
                Duration::from_secs(1),
                |_| async { Err(GatewayError::SendError("link closed".into())) },
            )
            .await;
        assert_eq!(result.unwrap_err(), GatewayError::SendError("link closed".into()));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_ack_only_completes_liveness_requests() {
        let correlator = Arc::new(Correlator::new());
        let (wire_tx, mut wire_rx) = mpsc::unbounded_channel::<String>();

        let worker = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move {
                correlator
                    .send(
                        OutboundRequest::plugin_message(1, 2, serde_json::json!({"request": "info"})),
                        Completion::Result,
                        Duration::from_secs(5),
                        |text| async move {
                            wire_tx.send(text).unwrap();
                            Ok(())
                        },
                    )
                    .await
            })
        };

        let transaction = transaction_of(&wire_rx.recv().await.unwrap());
        assert_eq!(correlator.deliver(&response("ack", &transaction)), Delivery::Pending);
        assert!(correlator.is_pending(&transaction));
        assert_eq!(correlator.deliver(&response("success", &transaction)), Delivery::Resolved);
        assert!(worker.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_send_after_cancel_is_refused() {
        let correlator = Correlator::new();
        correlator.cancel_all();
        let result = correlator
            .send(
                OutboundRequest::create_session(),
                Completion::Result,
                Duration::from_secs(1),
                |_| async { Ok(()) },
            )
            .await;
        assert_eq!(result.unwrap_err(), GatewayError::CancelledError);
    }

    #[test]
    fn test_unknown_transaction_is_unmatched() {
        let correlator = Correlator::new();
        assert_eq!(correlator.deliver(&response("success", "999")), Delivery::Unmatched);
    }

    #[tokio::test]
    async fn test_transaction_ids_carry_prefix() {
        let correlator = Correlator::new();
        let mut sent = String::new();
        let _ = correlator
            .send(
                OutboundRequest::keepalive(1),
                Completion::Ack,
                Duration::from_millis(1),
                |text| {
                    sent = text;
                    async { Ok(()) }
                },
            )
            .await;
        assert_eq!(transaction_of(&sent), "cc-1");

        // A relay-chosen numeric id never matches one of ours.
        assert_eq!(correlator.deliver(&response("success", "1")), Delivery::Unmatched);
    }

    #[tokio::test]
    async fn test_deadline_covers_stalled_transmit() {
        let correlator = Correlator::new();
        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            correlator.send(
                OutboundRequest::create_session(),
                Completion::Result,
                Duration::from_millis(50),
                |_| std::future::pending::<Result<(), GatewayError>>(),
            ),
        )
        .await
        .expect("request outlived its deadline");

        assert!(matches!(result, Err(GatewayError::TimeoutError { timeout_ms: 50, .. })));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(correlator.pending_count(), 0);
        assert_eq!(correlator.timed_out_count(), 1);
    }

    #[tokio::test]
    async fn test_cancel_all_wakes_caller_stuck_in_transmit() {
        let correlator = Arc::new(Correlator::new());
        let caller = {
            let correlator = Arc::clone(&correlator);
            tokio::spawn(async move {
                correlator
                    .send(
                        OutboundRequest::create_session(),
                        Completion::Result,
                        Duration::from_secs(30),
                        |_| std::future::pending::<Result<(), GatewayError>>(),
                    )
                    .await
            })
        };

        while correlator.pending_count() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(correlator.cancel_all(), 1);

        let result = tokio::time::timeout(Duration::from_secs(2), caller)
            .await
            .expect("caller was not woken by cancel_all")
            .unwrap();
        assert_eq!(result.unwrap_err(), GatewayError::CancelledError);
        assert_eq!(correlator.pending_count(), 0);
    }
}
