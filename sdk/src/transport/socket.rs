//! WebSocket connection lifecycle.

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::MessagePort;
use crate::config;
use crate::error::SdkError;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Connection lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No connection, none attempted (or deliberately closed).
    NotConnected,
    /// Dial in progress.
    Connecting,
    /// Open and usable.
    Connected,
    /// Lost involuntarily — transport error or peer close.
    Disconnected,
}

/// What the read loop hands to the connection's event channel.
#[derive(Debug)]
pub enum TransportEvent {
    /// One inbound text frame.
    Frame(String),
    /// The read loop ended; carries the reason. Terminal for this
    /// connection — any outstanding waiter must be failed by the consumer.
    Closed(String),
}

/// One WebSocket connection at a time, with a continuously running read
/// loop while connected.
pub struct SocketTransport {
    status_tx: watch::Sender<ConnectionStatus>,
    sink: tokio::sync::Mutex<Option<WsSink>>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl SocketTransport {
    pub fn new() -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::NotConnected);
        Self {
            status_tx,
            sink: tokio::sync::Mutex::new(None),
            reader: parking_lot::Mutex::new(None),
        }
    }

    /// Current status snapshot.
    pub fn status(&self) -> ConnectionStatus {
        *self.status_tx.borrow()
    }

    /// Subscribe to status transitions.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Dial the endpoint and start the read loop.
    ///
    /// Resolves once the transport reports the connection open. Inbound
    /// frames and the eventual close land on `events`. A connect failure
    /// resolves to an error without any retry — retry policy lives a
    /// layer up.
    pub async fn connect(
        &self,
        url: &str,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<(), SdkError> {
        // One connection at a time: drop whatever came before.
        self.close().await;
        self.status_tx.send_replace(ConnectionStatus::Connecting);

        let dialed = tokio::time::timeout(config::CONNECT_TIMEOUT, connect_async(url)).await;
        let (ws, _response) = match dialed {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                self.status_tx.send_replace(ConnectionStatus::Disconnected);
                return Err(SdkError::Connection(format!("socket connect failed: {e}")));
            }
            Err(_) => {
                self.status_tx.send_replace(ConnectionStatus::Disconnected);
                return Err(SdkError::Connection("socket connect timed out".into()));
            }
        };

        let (sink, mut stream) = ws.split();
        *self.sink.lock().await = Some(sink);
        self.status_tx.send_replace(ConnectionStatus::Connected);
        debug!("socket connected");

        let status_tx = self.status_tx.clone();
        let task = tokio::spawn(async move {
            let reason = loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if events.send(TransportEvent::Frame(text)).is_err() {
                            break "event receiver dropped".to_string();
                        }
                    }
                    Some(Ok(Message::Close(_))) => break "closed by peer".to_string(),
                    // Control and binary frames carry nothing for this protocol.
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break format!("transport error: {e}"),
                    None => break "stream ended".to_string(),
                }
            };
            warn!(%reason, "socket read loop ended");
            status_tx.send_replace(ConnectionStatus::Disconnected);
            let _ = events.send(TransportEvent::Closed(reason));
        });
        *self.reader.lock() = Some(task);
        Ok(())
    }

    /// Send one text frame. Fails immediately when not connected; frames
    /// are never queued.
    pub async fn send_frame(&self, frame: String) -> Result<(), SdkError> {
        if !self.is_connected() {
            return Err(SdkError::Connection("socket not connected".into()));
        }
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| SdkError::Connection("socket not connected".into()))?;
        sink.send(Message::Text(frame)).await.map_err(|e| {
            self.status_tx.send_replace(ConnectionStatus::Disconnected);
            SdkError::Connection(format!("socket send failed: {e}"))
        })
    }

    /// Initiate a normal-closure shutdown. Idempotent; safe when already
    /// closed.
    pub async fn close(&self) {
        let mut guard = self.sink.lock().await;
        if let Some(mut sink) = guard.take() {
            let _ = sink.send(Message::Close(None)).await;
            debug!("socket closed");
        }
        drop(guard);
        if let Some(task) = self.reader.lock().take() {
            task.abort();
        }
        self.status_tx.send_replace(ConnectionStatus::NotConnected);
    }
}

impl Default for SocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessagePort for SocketTransport {
    async fn send(&self, frame: String) -> Result<(), SdkError> {
        self.send_frame(frame).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_not_connected() {
        let transport = SocketTransport::new();
        assert_eq!(transport.status(), ConnectionStatus::NotConnected);
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn send_while_disconnected_fails_without_queueing() {
        let transport = SocketTransport::new();
        let result = transport.send_frame("{}".into()).await;
        assert!(matches!(result, Err(SdkError::Connection(_))));
    }

    #[tokio::test]
    async fn connect_failure_reports_disconnected() {
        let transport = SocketTransport::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        // Nothing listens here; the dial must fail cleanly, not retry.
        let result = transport.connect("ws://127.0.0.1:1/", tx).await;
        assert!(result.is_err());
        assert_eq!(transport.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let transport = SocketTransport::new();
        transport.close().await;
        transport.close().await;
        assert_eq!(transport.status(), ConnectionStatus::NotConnected);
    }

    // Connected-path behavior (frame delivery, peer close surfacing) is
    // covered by the integration suite against a real local server.
}
