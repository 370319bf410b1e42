//! Streaming transport for the device connection.
//!
//! This module owns the WebSocket leg of the device lifecycle. A `HubStream`
//! is created once and reused across reconnects: every `connect` call
//! derives a fresh endpoint URL carrying the current session token, opens a
//! new socket, and hands back a `StreamSender` for outbound messages.
//! Outbound messages are JSON text frames wrapping an event name and a
//! payload; inbound frames are drained and ignored.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};
use url::Url;

/// Errors that can occur on the streaming connection.
#[derive(Debug)]
pub enum StreamError {
    /// The endpoint URL could not be parsed
    InvalidUrl(String),

    /// The WebSocket handshake failed
    Connect(tokio_tungstenite::tungstenite::Error),

    /// The WebSocket handshake did not complete in time
    Timeout,

    /// A message could not be serialized
    Serialize(String),

    /// The connection is closed and the message was dropped
    Closed,
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::InvalidUrl(e) => write!(f, "Invalid stream URL: {}", e),
            StreamError::Connect(e) => write!(f, "WebSocket connect failed: {}", e),
            StreamError::Timeout => write!(f, "WebSocket connect timed out"),
            StreamError::Serialize(e) => write!(f, "Failed to serialize message: {}", e),
            StreamError::Closed => write!(f, "Stream is closed"),
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StreamError::Connect(e) => Some(e),
            _ => None,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for StreamError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        StreamError::Connect(err)
    }
}

/// Wire envelope for outbound messages.
#[derive(Debug, Serialize)]
struct Envelope<'a, T: Serialize> {
    event: &'a str,
    payload: &'a T,
}

/// Sender half of a live connection.
///
/// Cheap to clone; sending is fire-and-forget. Once the connection is gone
/// the sender reports `StreamError::Closed` and messages are discarded.
#[derive(Debug, Clone)]
pub struct StreamSender {
    tx: mpsc::UnboundedSender<Message>,
}

impl StreamSender {
    /// Emit a named event with a JSON payload.
    pub fn emit<T: Serialize>(&self, event: &str, payload: &T) -> Result<(), StreamError> {
        let envelope = Envelope { event, payload };
        let text =
            serde_json::to_string(&envelope).map_err(|e| StreamError::Serialize(e.to_string()))?;

        self.tx
            .send(Message::text(text))
            .map_err(|_| StreamError::Closed)
    }

    /// Whether the underlying connection is still accepting messages.
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Owned handle for the hub's streaming endpoint.
///
/// The handle itself holds no connection. `connect` opens a socket for one
/// session and `disconnected` waits out that session's end, so the device
/// observes connection loss in exactly one place for its whole life while
/// sessions come and go.
pub struct HubStream {
    /// Streaming endpoint without credentials; the token query is added per connect
    endpoint: String,

    /// Bound on each connect handshake
    connect_timeout: Duration,

    /// Reader task of the current session, if any
    reader: Option<JoinHandle<()>>,
}

impl HubStream {
    /// Create a handle for the given `ws://` or `wss://` endpoint.
    ///
    /// `connect_timeout` bounds each handshake attempt.
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout,
            reader: None,
        }
    }

    /// The configured endpoint, without credentials.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Open a connection authenticated by `token`.
    ///
    /// Spawns the session's reader and writer tasks and returns the sender
    /// for outbound messages. The handle tracks one session at a time; any
    /// previous session must have ended. A handshake that does not complete
    /// within the connect timeout fails with `StreamError::Timeout`.
    pub async fn connect(&mut self, token: &str) -> Result<StreamSender, StreamError> {
        let url = self.session_url(token)?;

        let (socket, _response) =
            match timeout(self.connect_timeout, connect_async(url.as_str())).await {
                Ok(connected) => connected?,
                Err(_) => return Err(StreamError::Timeout),
            };
        debug!(endpoint = %self.endpoint, "WebSocket connected");

        let (mut sink, mut source) = socket.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        // Writer: drain outbound messages into the socket until the channel
        // closes or a send fails
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    warn!(error = %e, "WebSocket send failed");
                    break;
                }
            }
        });

        // Reader: consume inbound frames; ending means the session is gone
        let reader = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Close(_)) => {
                        debug!("WebSocket close frame received");
                        break;
                    }
                    Ok(frame) => {
                        trace!(?frame, "Ignoring inbound frame");
                    }
                    Err(e) => {
                        debug!(error = %e, "WebSocket read failed");
                        break;
                    }
                }
            }
        });

        self.reader = Some(reader);

        Ok(StreamSender { tx })
    }

    /// Wait for the current session to end.
    ///
    /// Resolves when the reader task observes the stream closing, a close
    /// frame, or a read error. Resolves immediately when no session is open.
    pub async fn disconnected(&mut self) {
        if let Some(reader) = self.reader.take() {
            // The reader only finishes when the socket is done
            let _ = reader.await;
        }
    }

    /// Build the per-session URL with the token query.
    fn session_url(&self, token: &str) -> Result<Url, StreamError> {
        let mut url =
            Url::parse(&self.endpoint).map_err(|e| StreamError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }
}
