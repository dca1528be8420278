#![allow(dead_code)]

//! In-process loopback broker for integration tests.
//!
//! Speaks just enough of the wire protocol to exercise a real client over a
//! real websocket: it answers `call` frames with canned ack payloads, can be
//! told to stay silent for specific events, records every inbound frame, and
//! can push arbitrary server-side events at the connected client.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;

pub struct MockBroker {
    /// HTTP-style base URL clients are configured with.
    pub base_url: String,
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    auto_login: bool,
    responses: Mutex<std::collections::HashMap<String, Value>>,
    silent: Mutex<Vec<String>>,
    received: Mutex<Vec<Value>>,
    client: Mutex<Option<mpsc::UnboundedSender<WsMessage>>>,
}

impl MockBroker {
    /// Start a broker that greets every connection with a successful login
    /// response.
    pub async fn start() -> Self {
        Self::start_with(true).await
    }

    pub async fn start_with(auto_login: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let inner = Arc::new(BrokerInner {
            auto_login,
            responses: Mutex::new(std::collections::HashMap::new()),
            silent: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            client: Mutex::new(None),
        });

        let accept_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let conn_inner = Arc::clone(&accept_inner);
                tokio::spawn(async move {
                    let ws = match tokio_tungstenite::accept_async(stream).await {
                        Ok(ws) => ws,
                        Err(_) => return,
                    };
                    let (mut write, mut read) = ws.split();
                    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
                    *conn_inner.client.lock().await = Some(tx.clone());

                    tokio::spawn(async move {
                        while let Some(frame) = rx.recv().await {
                            if write.send(frame).await.is_err() {
                                break;
                            }
                        }
                    });

                    if conn_inner.auto_login {
                        let frame = json!({
                            "event": "receive_login_response",
                            "data": { "status": 200, "message": "welcome" },
                        });
                        let _ = tx.send(WsMessage::Text(frame.to_string()));
                    }

                    while let Some(Ok(message)) = read.next().await {
                        let WsMessage::Text(text) = message else {
                            continue;
                        };
                        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        conn_inner.received.lock().await.push(frame.clone());

                        let event = frame["event"].as_str().unwrap_or_default().to_string();
                        if event == "ack" {
                            continue;
                        }
                        if let Some(ack) = frame["ack"].as_u64() {
                            if conn_inner.silent.lock().await.contains(&event) {
                                continue;
                            }
                            let data = conn_inner
                                .responses
                                .lock()
                                .await
                                .get(&event)
                                .cloned()
                                .unwrap_or_else(|| json!({ "status": "success" }));
                            let reply = json!({ "event": "ack", "ack": ack, "data": data });
                            let _ = tx.send(WsMessage::Text(reply.to_string()));
                        }
                    }
                });
            }
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            inner,
        }
    }

    /// Set the canned ack payload for an event.
    pub async fn set_response(&self, event: &str, data: Value) {
        self.inner
            .responses
            .lock()
            .await
            .insert(event.to_string(), data);
    }

    /// Never ack the given event, so callers run into their timeout.
    pub async fn silence(&self, event: &str) {
        self.inner.silent.lock().await.push(event.to_string());
    }

    /// Push a server-side event at the connected client.
    pub async fn push(&self, event: &str, data: Value, ack: Option<u64>) {
        let mut frame = json!({ "event": event, "data": data });
        if let Some(id) = ack {
            frame["ack"] = json!(id);
        }
        let client = self.inner.client.lock().await;
        client
            .as_ref()
            .expect("no client connected")
            .send(WsMessage::Text(frame.to_string()))
            .unwrap();
    }

    pub async fn send_login_ok(&self) {
        self.push(
            "receive_login_response",
            json!({ "status": 200, "message": "welcome" }),
            None,
        )
        .await;
    }

    pub async fn received(&self) -> Vec<Value> {
        self.inner.received.lock().await.clone()
    }

    /// Poll the received frames until one matches, or give up after
    /// `timeout`.
    pub async fn wait_for<F>(&self, timeout: Duration, predicate: F) -> Option<Value>
    where
        F: Fn(&Value) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(frame) = self.received().await.into_iter().find(|f| predicate(f)) {
                return Some(frame);
            }
            if tokio::time::Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// All received frames for one event name.
    pub async fn frames_for(&self, event: &str) -> Vec<Value> {
        self.received()
            .await
            .into_iter()
            .filter(|f| f["event"] == event)
            .collect()
    }
}
