//! WebSocket link to the gateway.
//!
//! One duplex connection per [`Transport`]. Writes go through a single
//! locked sink so each message is written whole. A background reader
//! forwards complete messages, in arrival order, to the channel returned
//! from `connect`; tungstenite reassembles fragmented frames before they
//! reach us. A close frame or read error ends the reader and marks the
//! link as not connected. Closing aborts any write that is stuck on a
//! peer that has stopped reading, so it never waits on the sink lock.

use crate::errors::GatewayError;
use crate::gateway::protocol::GATEWAY_SUBPROTOCOL;
use futures::stream::SplitStream;
use futures::{Sink, SinkExt, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, WebSocketStream};
use tokio_util::sync::CancellationToken;

type WsSink = Pin<Box<dyn Sink<Message, Error = tungstenite::Error> + Send>>;

/// Complete inbound messages, in arrival order.
pub type InboundMessages = mpsc::UnboundedReceiver<String>;

const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Transport {
    sink: tokio::sync::Mutex<Option<WsSink>>,
    connected: Arc<AtomicBool>,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
    closing: CancellationToken,
}

impl Transport {
    /// Open a WebSocket to `url`, failing if the handshake does not finish in `timeout`.
    pub async fn connect(
        url: &str,
        timeout: Duration,
    ) -> Result<(Self, InboundMessages), GatewayError> {
        let mut request = url.into_client_request().map_err(|e| {
            GatewayError::ConnectionError(format!("Invalid gateway URL {}: {}", url, e))
        })?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(GATEWAY_SUBPROTOCOL),
        );

        let (ws, _response) = tokio::time::timeout(timeout, connect_async(request))
            .await
            .map_err(|_| {
                GatewayError::ConnectionError(format!(
                    "Timed out connecting to {} after {:?}",
                    url, timeout
                ))
            })?
            .map_err(|e| {
                GatewayError::ConnectionError(format!("Failed to connect to {}: {}", url, e))
            })?;

        log::info!("Connected to gateway at {}", url);
        Ok(Self::spawn(ws))
    }

    /// Wrap an already-established byte stream, skipping the HTTP upgrade.
    pub async fn from_stream<S>(stream: S) -> (Self, InboundMessages)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let ws = WebSocketStream::from_raw_socket(stream, Role::Client, None).await;
        Self::spawn(ws)
    }

    fn spawn<S>(ws: WebSocketStream<S>) -> (Self, InboundMessages)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, source) = ws.split();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(receive_loop(source, inbound_tx, Arc::clone(&connected)));

        let transport = Self {
            sink: tokio::sync::Mutex::new(Some(Box::pin(sink))),
            connected,
            reader: std::sync::Mutex::new(Some(reader)),
            closing: CancellationToken::new(),
        };
        (transport, inbound_rx)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Write one complete text message.
    pub async fn send(&self, text: String) -> Result<(), GatewayError> {
        if !self.is_connected() {
            return Err(GatewayError::SendError("gateway link is not open".to_string()));
        }

        let write = async {
            let mut guard = self.sink.lock().await;
            let sink = guard
                .as_mut()
                .ok_or_else(|| GatewayError::SendError("gateway link is closed".to_string()))?;

            sink.send(Message::Text(text)).await.map_err(|e| {
                self.connected.store(false, Ordering::Release);
                GatewayError::SendError(format!("Failed to write to gateway: {}", e))
            })
        };

        tokio::select! {
            biased;
            _ = self.closing.cancelled() => {
                Err(GatewayError::SendError("gateway link closed during write".to_string()))
            }
            result = write => result,
        }
    }

    /// Close the link. Safe to call more than once.
    pub async fn close(&self) {
        self.connected.store(false, Ordering::Release);
        self.closing.cancel();
        let sink = self.sink.lock().await.take();

        if let Some(mut sink) = sink {
            match tokio::time::timeout(READER_JOIN_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log::debug!("Gateway close handshake failed: {}", e),
                Err(_) => log::debug!("Gateway close handshake timed out"),
            }
        }

        let reader = self
            .reader
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(mut reader) = reader {
            if tokio::time::timeout(READER_JOIN_TIMEOUT, &mut reader)
                .await
                .is_err()
            {
                reader.abort();
            }
            log::info!("Gateway link closed");
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.closing.cancel();
        if let Ok(mut reader) = self.reader.lock() {
            if let Some(reader) = reader.take() {
                reader.abort();
            }
        }
    }
}

async fn receive_loop<S>(
    mut source: SplitStream<WebSocketStream<S>>,
    inbound: mpsc::UnboundedSender<String>,
    connected: Arc<AtomicBool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(frame) = source.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    log::warn!("Dropping non-UTF-8 binary message from gateway");
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                log::info!("Gateway closed the link: {:?}", frame);
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                log::warn!("Gateway read error: {}", e);
                break;
            }
        };

        if inbound.send(text).is_err() {
            break;
        }
    }

    connected.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        // Bind then drop to get a port nothing is listening on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result =
            Transport::connect(&format!("ws://127.0.0.1:{}/", port), Duration::from_secs(2)).await;
        assert!(matches!(result, Err(GatewayError::ConnectionError(_))));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_blocks_send() {
        let (client, _server) = tokio::io::duplex(1024);
        let (transport, _inbound) = Transport::from_stream(client).await;
        assert!(transport.is_connected());

        transport.close().await;
        transport.close().await;

        assert!(!transport.is_connected());
        let err = transport.send("{}".to_string()).await.unwrap_err();
        assert!(matches!(err, GatewayError::SendError(_)));
    }

    #[tokio::test]
    async fn test_close_releases_write_stuck_on_unread_peer() {
        // The peer never reads, so a frame larger than the pipe cannot be flushed.
        let (client, _peer) = tokio::io::duplex(64);
        let (transport, _inbound) = Transport::from_stream(client).await;
        let transport = Arc::new(transport);

        let writer = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { transport.send("x".repeat(512)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!writer.is_finished());

        tokio::time::timeout(Duration::from_secs(5), transport.close())
            .await
            .expect("close waited on a stuck write");
        let result = tokio::time::timeout(Duration::from_secs(1), writer)
            .await
            .expect("stuck write was not released")
            .unwrap();
        assert!(matches!(result, Err(GatewayError::SendError(_))));
    }
}
