//! Transport layer abstraction.
//!
//! A transport moves text frames between the session and the clearnet node.
//! It does not interpret them; decoding happens in [`crate::codec`].
//!
//! - [`WebSocketTransport`]: the live connection
//! - [`memory`]: an in-process pair for tests

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, instrument, warn};

use permitpool_core::error::{PermitPoolError, Result};

/// What the transport produced next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame
    Message(String),
    /// A data frame that is not UTF-8 text; the connection stays usable
    Undecodable(String),
    /// The peer closed the connection, with an optional reason
    Closed(Option<String>),
    /// The connection failed
    Error(String),
}

/// Bidirectional text-frame transport.
#[async_trait]
pub trait Transport: Send {
    /// Sends one text frame.
    async fn send(&mut self, text: String) -> Result<()>;

    /// Waits for the next event. Control frames are handled internally.
    async fn next_event(&mut self) -> TransportEvent;

    /// Returns true until closed by either side.
    fn is_open(&self) -> bool;

    /// Closes the transport. Closing twice is a no-op.
    async fn close(&mut self) -> Result<()>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// WEBSOCKET
// ═══════════════════════════════════════════════════════════════════════════════

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connection to a clearnet node.
pub struct WebSocketTransport {
    ws: WsStream,
    url: String,
    open: bool,
}

impl WebSocketTransport {
    /// Connects to `url`, retrying up to `attempts` times with linear backoff.
    #[instrument(skip(backoff))]
    pub async fn connect(url: &str, attempts: u32, backoff: Duration) -> Result<Self> {
        let attempts = attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            match connect_async(url).await {
                Ok((ws, _)) => {
                    info!(attempt, "WebSocket connected");
                    return Ok(Self {
                        ws,
                        url: url.to_owned(),
                        open: true,
                    });
                }
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "WebSocket connect failed");
                    last_error = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(backoff * attempt).await;
                    }
                }
            }
        }

        Err(PermitPoolError::Transport(format!(
            "could not connect to {url} after {attempts} attempts: {last_error}"
        )))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        if !self.open {
            return Err(PermitPoolError::ConnectionClosed("send on closed transport".into()));
        }

        self.ws
            .send(Message::Text(text))
            .await
            .map_err(|e| PermitPoolError::Transport(e.to_string()))
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Message(text),
                Some(Ok(Message::Binary(bytes))) => {
                    return match String::from_utf8(bytes) {
                        Ok(text) => TransportEvent::Message(text),
                        Err(e) => TransportEvent::Undecodable(format!("non-UTF-8 binary frame: {e}")),
                    };
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = self.ws.send(Message::Pong(data)).await {
                        debug!(error = %e, "Failed to answer ping");
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    self.open = false;
                    return TransportEvent::Closed(frame.map(|f| f.reason.to_string()));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.open = false;
                    return TransportEvent::Error(e.to_string());
                }
                None => {
                    self.open = false;
                    return TransportEvent::Closed(None);
                }
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        debug!(url = %self.url, "Closing WebSocket");

        self.ws
            .close(None)
            .await
            .map_err(|e| PermitPoolError::Transport(e.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// IN-MEMORY
// ═══════════════════════════════════════════════════════════════════════════════

/// In-memory transport for testing.
///
/// [`pair`] returns the client end and a [`MemoryPeer`] that plays the server.
pub mod memory {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::*;

    /// Creates a connected client/server pair.
    pub fn pair() -> (MemoryTransport, MemoryPeer) {
        let (to_peer, from_client) = mpsc::unbounded_channel();
        let (to_client, from_peer) = mpsc::unbounded_channel();
        let close_calls = Arc::new(AtomicUsize::new(0));

        let transport = MemoryTransport {
            tx: to_peer,
            rx: from_peer,
            open: true,
            close_calls: close_calls.clone(),
        };
        let peer = MemoryPeer {
            tx: to_client,
            rx: from_client,
            close_calls,
        };

        (transport, peer)
    }

    /// Client end.
    pub struct MemoryTransport {
        tx: mpsc::UnboundedSender<String>,
        rx: mpsc::UnboundedReceiver<TransportEvent>,
        open: bool,
        close_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&mut self, text: String) -> Result<()> {
            if !self.open {
                return Err(PermitPoolError::ConnectionClosed("send on closed transport".into()));
            }
            self.tx
                .send(text)
                .map_err(|_| PermitPoolError::ConnectionClosed("peer dropped".into()))
        }

        async fn next_event(&mut self) -> TransportEvent {
            match self.rx.recv().await {
                Some(event) => {
                    if matches!(event, TransportEvent::Closed(_)) {
                        self.open = false;
                    }
                    event
                }
                None => {
                    self.open = false;
                    TransportEvent::Closed(None)
                }
            }
        }

        fn is_open(&self) -> bool {
            self.open
        }

        async fn close(&mut self) -> Result<()> {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.open = false;
            Ok(())
        }
    }

    /// Server end, driven by tests.
    pub struct MemoryPeer {
        tx: mpsc::UnboundedSender<TransportEvent>,
        rx: mpsc::UnboundedReceiver<String>,
        close_calls: Arc<AtomicUsize>,
    }

    impl MemoryPeer {
        /// Delivers a text frame to the client.
        pub fn push(&self, text: impl Into<String>) {
            let _ = self.tx.send(TransportEvent::Message(text.into()));
        }

        /// Closes the connection from the server side.
        pub fn push_close(&self, reason: Option<&str>) {
            let _ = self.tx.send(TransportEvent::Closed(reason.map(str::to_owned)));
        }

        /// Next frame sent by the client; `None` once the client end is dropped.
        pub async fn recv(&mut self) -> Option<String> {
            self.rx.recv().await
        }

        /// How many times the client called `close`.
        pub fn close_calls(&self) -> usize {
            self.close_calls.load(Ordering::SeqCst)
        }
    }
}
