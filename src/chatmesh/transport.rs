//! Event-stream session to the broker.
//!
//! An [`EventSocket`] owns one websocket connection and layers a named-event
//! protocol over it.  Every frame on the wire is a JSON object:
//!
//! ```json
//! {"event": "send_message", "data": { ... }, "ack": 7}
//! ```
//!
//! `ack` is present only on request/response traffic.  A [`EventSocket::call`]
//! allocates a fresh ack id and resolves when the broker answers with
//! `{"event": "ack", "ack": 7, "data": ...}`.  Pushes from the broker that
//! carry an ack id expect the registered handler's return value to be echoed
//! back the same way, which is how `receive_command` replies travel.
//!
//! Auth is carried once, at socket open, as query parameters on the
//! websocket URL (`member_id`, `member_name`).
//!
//! The reader task is the single receive loop: handlers run inline on it and
//! must stay short.  Handlers for slow work (message receipt, notification
//! receipt) are expected to spawn their own worker and return an
//! acknowledgement immediately; see
//! [`MemberClient`](crate::MemberClient) for the prescribed pattern.
//!
//! A dropped connection wakes every [`EventSocket::wait`]er and fires the
//! `disconnect` handler.  Reconnection is never automatic; callers re-invoke
//! login.

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::chatmesh::events;

lazy_static! {
    /// Shared HTTP client with persistent connection pooling.
    ///
    /// A single instance keeps TLS sessions and DNS lookups warm across the
    /// out-of-band signup calls issued by every member in the process.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = {
        reqwest::ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build shared HTTP client")
    };
}

/// Borrow the lazily initialised shared [`reqwest::Client`].
pub fn shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}

/// Derive the websocket endpoint from the broker's HTTP base URL, carrying
/// the handshake auth metadata as query parameters.
pub fn websocket_url(base_url: &str, member_id: &str, member_name: &str) -> String {
    let ws_base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        base_url.to_string()
    };
    format!(
        "{}/ws?member_id={}&member_name={}",
        ws_base.trim_end_matches('/'),
        urlencoding::encode(member_id),
        urlencoding::encode(member_name)
    )
}

/// Errors surfaced by the transport layer.
///
/// These are deliberately coarse: callers above the member client recover
/// from all of them by returning an empty or default result.
#[derive(Debug)]
pub enum TransportError {
    /// An operation required a live session and there is none.
    NotConnected,
    /// The websocket handshake failed.
    ConnectFailed(String),
    /// A `call` did not receive its ack within the timeout.
    Timeout,
    /// The session ended while a `call` was in flight.
    Closed,
    /// An outbound frame could not be serialized.
    Protocol(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::NotConnected => write!(f, "not connected"),
            TransportError::ConnectFailed(msg) => write!(f, "connect failed: {}", msg),
            TransportError::Timeout => write!(f, "call timed out"),
            TransportError::Closed => write!(f, "session closed"),
            TransportError::Protocol(msg) => write!(f, "protocol error: {}", msg),
        }
    }
}

impl Error for TransportError {}

/// Handler for an inbound push.  Runs inline on the receive loop; the
/// returned value, if any, is echoed back as an ack when the push carried an
/// ack id.
pub type PushHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Option<Value>> + Send + Sync>;

#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ack: Option<u64>,
}

struct SocketInner {
    handlers: RwLock<HashMap<String, PushHandler>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    next_ack: AtomicU64,
    outbound: RwLock<Option<mpsc::UnboundedSender<WsMessage>>>,
    connected: AtomicBool,
    /// `true` while a session is open; flips to `false` on teardown so that
    /// `wait`ers wake up.
    session: watch::Sender<bool>,
}

/// One bidirectional event-stream session to the broker.
///
/// Cheap to clone; all clones share the same connection, handler table and
/// pending-call map.
#[derive(Clone)]
pub struct EventSocket {
    inner: Arc<SocketInner>,
}

impl Default for EventSocket {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSocket {
    pub fn new() -> Self {
        let (session, _) = watch::channel(false);
        Self {
            inner: Arc::new(SocketInner {
                handlers: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                next_ack: AtomicU64::new(1),
                outbound: RwLock::new(None),
                connected: AtomicBool::new(false),
                session,
            }),
        }
    }

    /// Register a dispatcher for an inbound event.  Registering the same
    /// event twice replaces the previous handler, so binding is idempotent.
    pub fn on(&self, event: &str, handler: PushHandler) {
        self.inner
            .handlers
            .write()
            .unwrap()
            .insert(event.to_string(), handler);
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Open the websocket and spawn the reader and writer tasks.
    ///
    /// A no-op when a session is already open.
    pub async fn connect(&self, url: &str) -> Result<(), TransportError> {
        if self.is_connected() {
            return Ok(());
        }

        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        let (mut write, mut read) = stream.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
        *self.inner.outbound.write().unwrap() = Some(tx);
        self.inner.connected.store(true, Ordering::SeqCst);
        self.inner.session.send_replace(true);

        // Writer: drain the outbound queue until the socket or the queue dies.
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if write.send(frame).await.is_err() {
                    break;
                }
            }
        });

        // Reader: the single receive loop.
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            while let Some(next) = read.next().await {
                match next {
                    Ok(WsMessage::Text(text)) => inner.dispatch(&text).await,
                    Ok(WsMessage::Close(_)) => break,
                    Err(e) => {
                        log::warn!("websocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
            inner.teardown().await;
        });

        Ok(())
    }

    /// Fire-and-forget send.
    pub fn emit(&self, event: &str, data: Value) -> Result<(), TransportError> {
        self.inner.send_frame(&Frame {
            event: event.to_string(),
            data,
            ack: None,
        })
    }

    /// Request/response over the stream, correlated by ack id.
    pub async fn call(
        &self,
        event: &str,
        data: Value,
        timeout: Duration,
    ) -> Result<Value, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let id = self.inner.next_ack.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(id, tx);

        if let Err(e) = self.inner.send_frame(&Frame {
            event: event.to_string(),
            data,
            ack: Some(id),
        }) {
            self.inner.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.inner.pending.lock().await.remove(&id);
                Err(TransportError::Timeout)
            }
        }
    }

    /// Block the caller until the session ends.  Returns immediately when no
    /// session is open.
    pub async fn wait(&self) {
        let mut rx = self.inner.session.subscribe();
        while *rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}

impl SocketInner {
    fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        let text =
            serde_json::to_string(frame).map_err(|e| TransportError::Protocol(e.to_string()))?;
        let outbound = self.outbound.read().unwrap();
        match outbound.as_ref() {
            Some(tx) => tx
                .send(WsMessage::Text(text))
                .map_err(|_| TransportError::Closed),
            None => Err(TransportError::NotConnected),
        }
    }

    async fn dispatch(self: &Arc<Self>, text: &str) {
        let frame: Frame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("discarding malformed frame: {}", e);
                return;
            }
        };

        if frame.event == events::ACK {
            if let Some(id) = frame.ack {
                let waiter = self.pending.lock().await.remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(frame.data);
                    }
                    None => log::debug!("ack {} arrived after its caller gave up", id),
                }
            }
            return;
        }

        let handler = self.handlers.read().unwrap().get(&frame.event).cloned();
        match handler {
            Some(handler) => {
                let reply = handler(frame.data).await;
                if let Some(id) = frame.ack {
                    let response = Frame {
                        event: events::ACK.to_string(),
                        data: reply.unwrap_or(Value::Null),
                        ack: Some(id),
                    };
                    if let Err(e) = self.send_frame(&response) {
                        log::warn!("failed to ack inbound {}: {}", frame.event, e);
                    }
                }
            }
            None => log::debug!("no handler registered for inbound event {}", frame.event),
        }
    }

    /// Tear the session down: abandon in-flight calls, fire the disconnect
    /// handler, wake the `wait`ers.
    async fn teardown(self: &Arc<Self>) {
        self.connected.store(false, Ordering::SeqCst);
        *self.outbound.write().unwrap() = None;
        self.pending.lock().await.clear();

        let handler = self
            .handlers
            .read()
            .unwrap()
            .get(events::DISCONNECT)
            .cloned();
        if let Some(handler) = handler {
            handler(Value::Null).await;
        }
        self.session.send_replace(false);
    }
}
