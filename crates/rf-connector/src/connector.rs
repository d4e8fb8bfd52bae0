//! Relay connector: WebSocket connection to the collaboration relay

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use crate::protocol::{
    ConnectionConfig, ConnectionState, InboundEnvelope, OutboundEnvelope, RelayEvent,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSPORT
// ═══════════════════════════════════════════════════════════════════════════════

/// Outbound half of a relay channel, as seen by the sync layer
pub trait Transport: Send {
    /// Queue one frame for delivery. Must not block.
    fn emit(&mut self, envelope: OutboundEnvelope) -> Result<(), ConnectorError>;
}

/// Cloneable sender into a running [`RelayConnector`]
#[derive(Debug, Clone)]
pub struct RelayHandle {
    outbound_tx: mpsc::UnboundedSender<OutboundEnvelope>,
}

impl Transport for RelayHandle {
    fn emit(&mut self, envelope: OutboundEnvelope) -> Result<(), ConnectorError> {
        self.outbound_tx
            .send(envelope)
            .map_err(|_| ConnectorError::SendFailed)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONNECTOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Relay connector with automatic reconnection
pub struct RelayConnector {
    /// Connection configuration
    config: ConnectionConfig,

    /// Current connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Channel for outgoing frames
    outbound_tx: mpsc::UnboundedSender<OutboundEnvelope>,
    outbound_rx: Option<mpsc::UnboundedReceiver<OutboundEnvelope>>,

    /// Connection task handle
    connection_handle: Option<tokio::task::JoinHandle<()>>,

    /// Shutdown signal
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayConnector {
    /// Create a new connector with config
    pub fn new(config: ConnectionConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outbound_tx,
            outbound_rx: Some(outbound_rx),
            connection_handle: None,
            shutdown_tx,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Get the current connection state
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Sender handle for the sync layer
    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            outbound_tx: self.outbound_tx.clone(),
        }
    }

    /// Connect to the relay.
    ///
    /// The first attempt's failure is returned; after that the socket task
    /// owns the connection and reconnects on its own. Relay events arrive on
    /// the returned receiver, starting with [`RelayEvent::Connected`].
    pub async fn connect(&mut self) -> Result<mpsc::UnboundedReceiver<RelayEvent>, ConnectorError> {
        let url = url::Url::parse(&self.config.url)?;
        let mut outbound_rx = self
            .outbound_rx
            .take()
            .ok_or_else(|| ConnectorError::ConnectionFailed("Already connected".into()))?;

        *self.state.write().await = ConnectionState::Connecting;

        let timeout = Duration::from_millis(self.config.timeout_ms as u64);

        let ws_stream = match open_socket(&url, timeout).await {
            Ok(stream) => stream,
            Err(e) => {
                *self.state.write().await = ConnectionState::Error;
                self.outbound_rx = Some(outbound_rx);
                return Err(e);
            }
        };
        *self.state.write().await = ConnectionState::Connected;
        log::info!("[Relay] Connected to {}", url);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let state = Arc::clone(&self.state);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let auto_reconnect = self.config.auto_reconnect;
        let reconnect_delay = Duration::from_millis(self.config.reconnect_delay_ms);

        let handle = tokio::spawn(async move {
            let mut socket = Some(ws_stream);

            loop {
                let Some(ws_stream) = socket.take() else {
                    break;
                };

                // Frames queued while offline belong to the previous session
                let mut stale = 0usize;
                while outbound_rx.try_recv().is_ok() {
                    stale += 1;
                }
                if stale > 0 {
                    log::debug!("[Relay] Dropped {} frames queued while offline", stale);
                }

                if event_tx.send(RelayEvent::Connected).is_err() {
                    break;
                }

                let exit = pump(ws_stream, &mut outbound_rx, &event_tx, &mut shutdown_rx).await;
                if exit == PumpExit::Shutdown {
                    *state.write().await = ConnectionState::Disconnected;
                    break;
                }

                if !auto_reconnect {
                    *state.write().await = ConnectionState::Disconnected;
                    let _ = event_tx.send(RelayEvent::Disconnected {
                        reconnecting: false,
                    });
                    break;
                }

                *state.write().await = ConnectionState::Reconnecting;
                if event_tx
                    .send(RelayEvent::Disconnected { reconnecting: true })
                    .is_err()
                {
                    break;
                }

                // Retry until connected or told to stop
                while socket.is_none() {
                    tokio::select! {
                        _ = tokio::time::sleep(reconnect_delay) => {}
                        _ = shutdown_rx.recv() => {
                            *state.write().await = ConnectionState::Disconnected;
                            return;
                        }
                    }
                    match open_socket(&url, timeout).await {
                        Ok(stream) => {
                            log::info!("[Relay] Reconnected to {}", url);
                            *state.write().await = ConnectionState::Connected;
                            socket = Some(stream);
                        }
                        Err(e) => log::warn!("[Relay] Reconnect failed: {}", e),
                    }
                }
            }
        });

        self.connection_handle = Some(handle);
        Ok(event_rx)
    }

    /// Close the socket and stop reconnecting
    pub async fn disconnect(&mut self) -> Result<(), ConnectorError> {
        let _ = self.shutdown_tx.send(());
        if let Some(handle) = self.connection_handle.take() {
            handle
                .await
                .map_err(|e| ConnectorError::ConnectionFailed(e.to_string()))?;
        }
        *self.state.write().await = ConnectionState::Disconnected;
        Ok(())
    }
}

async fn open_socket(url: &url::Url, timeout: Duration) -> Result<WsStream, ConnectorError> {
    let (ws_stream, _) = tokio::time::timeout(timeout, connect_async(url.as_str()))
        .await
        .map_err(|_| ConnectorError::Timeout)?
        .map_err(|e| ConnectorError::ConnectionFailed(format!("WebSocket error: {}", e)))?;
    Ok(ws_stream)
}

#[derive(Debug, PartialEq, Eq)]
enum PumpExit {
    /// Socket closed or failed
    Lost,
    /// Local shutdown requested
    Shutdown,
}

/// Shuttle frames between the socket and the channels until either side ends
async fn pump(
    ws_stream: WsStream,
    outbound_rx: &mut mpsc::UnboundedReceiver<OutboundEnvelope>,
    event_tx: &mpsc::UnboundedSender<RelayEvent>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> PumpExit {
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            // Receive from WebSocket
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(envelope) = decode_frame(text.as_str())
                            && event_tx.send(RelayEvent::Message(envelope)).is_err()
                        {
                            return PumpExit::Shutdown;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("[Relay] Connection closed");
                        return PumpExit::Lost;
                    }
                    Some(Err(e)) => {
                        log::error!("[Relay] WebSocket error: {}", e);
                        return PumpExit::Lost;
                    }
                    _ => {} // Ignore ping/pong/binary
                }
            }

            // Send frames
            envelope = outbound_rx.recv() => {
                let Some(envelope) = envelope else {
                    let _ = write.send(Message::Close(None)).await;
                    return PumpExit::Shutdown;
                };
                if !send_frame(&mut write, &envelope).await {
                    return PumpExit::Lost;
                }
            }

            // Shutdown signal: last frames (lock releases) go out before Close
            _ = shutdown_rx.recv() => {
                while let Ok(envelope) = outbound_rx.try_recv() {
                    if !send_frame(&mut write, &envelope).await {
                        return PumpExit::Shutdown;
                    }
                }
                let _ = write.send(Message::Close(None)).await;
                return PumpExit::Shutdown;
            }
        }
    }
}

/// Encode and send one frame; false when the socket is gone
async fn send_frame<S>(write: &mut S, envelope: &OutboundEnvelope) -> bool
where
    S: futures_util::Sink<Message> + Unpin,
{
    match serde_json::to_string(envelope) {
        Ok(json) => write.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            log::error!("[Relay] Failed to encode frame: {}", e);
            true
        }
    }
}

/// Decode an inbound text frame; undecodable frames are logged and skipped
pub fn decode_frame(text: &str) -> Option<InboundEnvelope> {
    match InboundEnvelope::parse(text) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            log::warn!("[Relay] Skipping undecodable frame ({}): {}", e, text);
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════════

/// Connector builder
pub struct ConnectorBuilder {
    config: ConnectionConfig,
}

impl ConnectorBuilder {
    /// Create builder with WebSocket URL
    pub fn websocket(url: &str) -> Self {
        Self {
            config: ConnectionConfig {
                url: url.to_string(),
                ..ConnectionConfig::default()
            },
        }
    }

    /// Start from an existing configuration
    pub fn from_config(config: ConnectionConfig) -> Self {
        Self { config }
    }

    /// Set connection timeout
    pub fn timeout(mut self, timeout_ms: u32) -> Self {
        self.config.timeout_ms = timeout_ms;
        self
    }

    /// Enable/disable auto reconnect
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    /// Set reconnect delay
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Build the connector
    pub fn build(self) -> RelayConnector {
        RelayConnector::new(self.config)
    }
}

/// Connector errors
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid relay URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Connection timeout")]
    Timeout,

    #[error("Failed to send frame: channel closed")]
    SendFailed,

    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ClientEvent, ServerEvent};
    use rf_core::{RoomId, TrackId, UserId};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connector_builder() {
        let connector = ConnectorBuilder::websocket("ws://localhost:3001")
            .timeout(3000)
            .auto_reconnect(true)
            .build();

        assert_eq!(connector.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_builder_chaining() {
        let connector = ConnectorBuilder::websocket("ws://test:1234")
            .timeout(10000)
            .auto_reconnect(false)
            .reconnect_delay(Duration::from_secs(5))
            .build();

        assert_eq!(connector.config.url, "ws://test:1234");
        assert_eq!(connector.config.timeout_ms, 10000);
        assert!(!connector.config.auto_reconnect);
        assert_eq!(connector.config.reconnect_delay_ms, 5000);
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let mut connector = ConnectorBuilder::websocket("not a url").build();
        assert!(matches!(
            connector.connect().await,
            Err(ConnectorError::InvalidUrl(_))
        ));
        // The outbound receiver survives a failed attempt
        assert!(connector.outbound_rx.is_some());
    }

    #[test]
    fn test_handle_fails_once_connector_is_gone() {
        let connector = ConnectorBuilder::websocket("ws://localhost:3001").build();
        let mut handle = connector.handle();
        drop(connector);
        let envelope =
            OutboundEnvelope::new(RoomId::new("r"), UserId::new("u"), ClientEvent::RequestState);
        assert!(matches!(handle.emit(envelope), Err(ConnectorError::SendFailed)));
    }

    #[tokio::test]
    async fn test_round_trip_against_local_relay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let relay = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text("garbage".into())).await.unwrap();
            ws.send(Message::Text(
                r#"{"event":"track_deleted","userId":"u2","trackId":"T1"}"#.into(),
            ))
            .await
            .unwrap();
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
                    Some(Ok(_)) => continue,
                    other => panic!("relay lost client: {:?}", other),
                }
            }
        });

        let mut connector = ConnectorBuilder::websocket(&format!("ws://{}", addr))
            .auto_reconnect(false)
            .build();
        let mut events = connector.connect().await.unwrap();
        assert_eq!(events.recv().await, Some(RelayEvent::Connected));

        // The garbage frame is skipped, the valid one comes through
        let Some(RelayEvent::Message(envelope)) = events.recv().await else {
            panic!("expected a decoded frame");
        };
        assert_eq!(envelope.user_id, Some(UserId::new("u2")));
        assert_eq!(
            envelope.event,
            ServerEvent::TrackDeleted {
                track_id: TrackId::new("T1")
            }
        );

        let mut handle = connector.handle();
        handle
            .emit(OutboundEnvelope::new(
                RoomId::new("room"),
                UserId::new("u1"),
                ClientEvent::RequestState,
            ))
            .unwrap();

        let received = relay.await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&received).unwrap();
        assert_eq!(value["event"], "request_state");
        assert_eq!(value["roomId"], "room");

        connector.disconnect().await.unwrap();
        assert_eq!(connector.state().await, ConnectionState::Disconnected);
    }
}
