//! Bidirectional framed transport to a player.
//!
//! The transport is a thin seam: the concrete implementation dials a
//! websocket with `tokio-tungstenite` and runs one reader task and one
//! writer task; everything above it only sees [`Transport`] (send/close)
//! and [`TransportCallbacks`] (message/error/close). Tests substitute a
//! scripted transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector as TlsConnector};

/// Interval between keepalive pings from the writer task.
const PING_PERIOD: Duration = Duration::from_secs(30);

/// Outbound send queue depth per transport.
const SEND_QUEUE: usize = 32;

pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("receive failed: {0}")]
    Recv(String),

    #[error("connection closed")]
    Closed,
}

/// Callbacks a transport fires from its reader task.
///
/// Calls are awaited by the reader, so a slow consumer backpressures the
/// socket instead of dropping frames. `on_close` fires exactly once, after
/// which no further callbacks arrive.
#[async_trait]
pub trait TransportCallbacks: Send + Sync {
    async fn on_message(&self, data: Vec<u8>);
    async fn on_error(&self, error: TransportError);
    async fn on_close(&self);
}

/// Handle to an open transport.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, data: Vec<u8>) -> TransportResult<()>;
    async fn close(&self);
}

/// Dials transports. The supervisor and players hold this as a trait
/// object so tests can swap in scripted connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
        api_key: &str,
        callbacks: Arc<dyn TransportCallbacks>,
    ) -> TransportResult<Arc<dyn Transport>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Websocket implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Websocket transport over `tokio-tungstenite`.
pub struct WsTransport {
    tx: mpsc::Sender<Message>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, data: Vec<u8>) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        let text =
            String::from_utf8(data).map_err(|e| TransportError::Send(format!("not utf8: {}", e)))?;
        self.tx
            .send(Message::Text(text))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Queue a close frame; the reader observes the close handshake (or
        // the dropped connection) and fires on_close.
        let _ = self.tx.send(Message::Close(None)).await;
    }
}

/// Connector that dials `wss://` player endpoints.
///
/// Players present self-signed certificates, so certificate and hostname
/// verification are disabled.
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        url: &str,
        api_key: &str,
        callbacks: Arc<dyn TransportCallbacks>,
    ) -> TransportResult<Arc<dyn Transport>> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        request.headers_mut().insert(
            "X-Api-Key",
            HeaderValue::from_str(api_key).map_err(|e| TransportError::Connect(e.to_string()))?,
        );

        let tls = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (stream, _response) = connect_async_tls_with_config(
            request,
            None,
            false,
            Some(TlsConnector::NativeTls(tls)),
        )
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;

        log::info!("[WS] connected: {}", url);

        let (mut sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::channel::<Message>(SEND_QUEUE);
        let closed = Arc::new(AtomicBool::new(false));

        // Writer task: drains the send queue and keeps the peer alive with
        // periodic pings.
        let writer_closed = Arc::clone(&closed);
        tokio::spawn(async move {
            let mut ping = tokio::time::interval(PING_PERIOD);
            ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    message = rx.recv() => {
                        let Some(message) = message else { break };
                        let is_close = matches!(message, Message::Close(_));
                        if sink.send(message).await.is_err() || is_close {
                            break;
                        }
                    }
                    _ = ping.tick() => {
                        if sink.send(Message::Ping(Vec::new())).await.is_err() {
                            break;
                        }
                    }
                }
            }
            writer_closed.store(true, Ordering::SeqCst);
        });

        // Reader task: forwards frames and errors, then fires on_close once
        // the stream ends.
        let reader_closed = Arc::clone(&closed);
        tokio::spawn(async move {
            while let Some(result) = source.next().await {
                match result {
                    Ok(Message::Text(text)) => callbacks.on_message(text.into_bytes()).await,
                    Ok(Message::Binary(data)) => callbacks.on_message(data).await,
                    Ok(Message::Close(_)) => break,
                    // Pings are answered by tungstenite itself.
                    Ok(_) => {}
                    Err(e) => {
                        // An expected close after close() is not an error.
                        if !reader_closed.load(Ordering::SeqCst) {
                            callbacks.on_error(TransportError::Recv(e.to_string())).await;
                        }
                        break;
                    }
                }
            }
            reader_closed.store(true, Ordering::SeqCst);
            callbacks.on_close().await;
        });

        Ok(Arc::new(WsTransport { tx, closed }))
    }
}
