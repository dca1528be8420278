//! Member-side client: the composition point of the runtime.
//!
//! A [`MemberClient`] wraps one [`EventSocket`] session and exposes the full
//! member-facing API: signup, login, chat management, messaging, the typed
//! command RPC, and the listen-in surface.  Higher layers
//! ([`ChatAgent`](crate::ChatAgent), [`ChatManager`](crate::ChatManager), a
//! game host) attach behavior through the [`MemberObserver`] seam instead of
//! subclassing.
//!
//! Error handling is non-destructive throughout: a failed call is logged and
//! turned into an empty or default result, never a panic.  The public
//! operations mirror the broker's event vocabulary one-to-one.
//!
//! # Example
//!
//! ```rust,no_run
//! use chatmesh::chatmesh::config::ClientConfig;
//! use chatmesh::MemberClient;
//!
//! # async {
//! let client = MemberClient::new("Tom", "admin001", "", ClientConfig::default());
//! client.signup().await;
//! if client.login().await {
//!     let chats = client.get_joined_chats().await;
//!     println!("joined {} chats", chats.len());
//!     client.wait().await;
//! }
//! # };
//! ```

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::chatmesh::config::ClientConfig;
use crate::chatmesh::dto::{
    Chat, Command, CommandResult, Member, Message, NextSpeaker, Notification,
};
use crate::chatmesh::events;
use crate::chatmesh::transport::{shared_http_client, websocket_url, EventSocket};

/// Handler for one named command.  Receives the command's `data` record and
/// returns the result that travels back to the caller.
pub type CommandHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Value> + Send + Sync>;

/// Behavior seam for the layers above the plain member client.
///
/// All methods default to no-ops; implementors override what they need.
/// `on_message` and `on_notification` run on a worker spawned per inbound
/// event; `on_next_speaker` likewise, since replying usually means calling an
/// LLM.  The observer is held weakly, so dropping the owning layer detaches
/// it.
#[async_trait]
pub trait MemberObserver: Send + Sync {
    async fn on_message(&self, _message: Message) {}
    async fn on_next_speaker(&self, _turn: NextSpeaker) {}
    async fn on_notification(&self, _notification: Notification) {}
    async fn on_login_success(&self) {}
}

struct ClientInner {
    name: String,
    member_id: String,
    description: String,
    config: ClientConfig,
    socket: EventSocket,
    login_success: AtomicBool,
    events_bound: AtomicBool,
    commands: RwLock<HashMap<String, CommandHandler>>,
    observer: RwLock<Option<Weak<dyn MemberObserver>>>,
    /// Cache behind `get_chat_members(..., from_cache=true)`.  Primed on
    /// first miss and never invalidated; callers that need freshness pass
    /// `from_cache=false`.
    member_cache: Mutex<HashMap<String, Vec<Member>>>,
}

/// A member's live connection to the broker.
///
/// Cheap to clone; clones share the session, the command registry and the
/// member cache.
#[derive(Clone)]
pub struct MemberClient {
    inner: Arc<ClientInner>,
}

impl MemberClient {
    pub fn new(
        name: impl Into<String>,
        member_id: impl Into<String>,
        description: impl Into<String>,
        config: ClientConfig,
    ) -> Self {
        let client = Self {
            inner: Arc::new(ClientInner {
                name: name.into(),
                member_id: member_id.into(),
                description: description.into(),
                config,
                socket: EventSocket::new(),
                login_success: AtomicBool::new(false),
                events_bound: AtomicBool::new(false),
                commands: RwLock::new(HashMap::new()),
                observer: RwLock::new(None),
                member_cache: Mutex::new(HashMap::new()),
            }),
        };

        // Every member answers the built-in connectivity probe.
        let name = client.name().to_string();
        client.register_command(
            "test",
            Arc::new(move |data| {
                let name = name.clone();
                Box::pin(async move {
                    log::info!("{} ran test command: {}", name, data);
                    Value::String(format!("{} this is a test command result", name))
                })
            }),
        );

        client
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn member_id(&self) -> &str {
        &self.inner.member_id
    }

    pub fn is_logged_in(&self) -> bool {
        self.inner.login_success.load(Ordering::SeqCst)
    }

    pub(crate) fn socket(&self) -> &EventSocket {
        &self.inner.socket
    }

    /// Attach the behavior layer.  Held weakly; call before `login`.
    pub fn set_observer(&self, observer: Weak<dyn MemberObserver>) {
        *self.inner.observer.write().unwrap() = Some(observer);
    }

    fn observer(&self) -> Option<Arc<dyn MemberObserver>> {
        self.inner
            .observer
            .read()
            .unwrap()
            .as_ref()
            .and_then(Weak::upgrade)
    }

    /// Record a handler under a command name.  Registering an existing name
    /// replaces the previous handler.
    pub fn register_command(&self, name: &str, handler: CommandHandler) {
        self.inner
            .commands
            .write()
            .unwrap()
            .insert(name.to_string(), handler);
    }

    /// Dispatch an inbound command to its registered handler.
    ///
    /// Unknown commands produce a diagnostic string result instead of
    /// failing, preserving the one-result-per-recipient contract.  A handler
    /// returning null is normalized to an empty string.
    pub async fn handle_command(&self, command: Command) -> Value {
        let handler = self
            .inner
            .commands
            .read()
            .unwrap()
            .get(&command.command)
            .cloned();
        match handler {
            Some(handler) => {
                let result = handler(command.data).await;
                if result.is_null() {
                    Value::String(String::new())
                } else {
                    result
                }
            }
            None => {
                log::warn!("{} received unknown command: {}", self.name(), command.command);
                Value::String(format!("unknown command,{}", command.command))
            }
        }
    }

    /// Idempotent registration with the broker over plain HTTP.
    ///
    /// Returns the broker's response body; an empty object on failure.
    pub async fn signup(&self) -> Value {
        let body = json!({
            "member_id": self.member_id(),
            "member_name": self.name(),
            "description": self.inner.description,
        });
        let url = format!("{}/chat/signup", self.inner.config.base_url);
        log::info!("signup: {}", url);

        let response = match shared_http_client().post(&url).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                log::error!("{} signup request failed: {}", self.name(), e);
                return json!({});
            }
        };
        let payload: Value = match response.json().await {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("{} signup returned a malformed body: {}", self.name(), e);
                return json!({});
            }
        };

        let status = payload.get("status").and_then(Value::as_i64).unwrap_or(0);
        if status == 200 || status == 201 {
            log::info!("{} signup success: {}", self.name(), payload);
        } else {
            log::warn!("{} signup failed: {}", self.name(), payload);
        }
        payload
    }

    /// Open the websocket session and wait for the broker's login response.
    ///
    /// Handlers are bound exactly once per client lifetime; calling `login`
    /// again after a disconnect reuses them.  Returns `false` when the
    /// response does not arrive within the configured connect timeout; the
    /// client never retries on its own.
    pub async fn login(&self) -> bool {
        if self.is_logged_in() && self.inner.socket.is_connected() {
            return true;
        }

        self.bind_events();

        let url = websocket_url(&self.inner.config.base_url, self.member_id(), self.name());
        if let Err(e) = self.inner.socket.connect(&url).await {
            log::error!("{} failed to connect: {}", self.name(), e);
            return false;
        }

        let deadline = tokio::time::Instant::now() + self.inner.config.connect_timeout;
        while !self.is_logged_in() {
            if tokio::time::Instant::now() >= deadline {
                log::warn!("{}: connection timed out, please try again", self.name());
                return false;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        true
    }

    /// Clear the session flag.  Invoked automatically on disconnect.
    pub fn logout(&self) {
        self.inner.login_success.store(false, Ordering::SeqCst);
        log::info!("socket disconnected, {} {}", self.name(), self.member_id());
    }

    /// Block until the session ends.
    pub async fn wait(&self) {
        self.inner.socket.wait().await;
    }

    /// Build a [`Message`] stamped with this member's identity, a fresh
    /// message id and the current time.
    pub fn produce_message(&self, text: &str, chat_id: &str, message_type: &str) -> Message {
        Message {
            message_id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            from_member_id: self.member_id().to_string(),
            from_member_name: self.name().to_string(),
            message_type: message_type.to_string(),
            message: text.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true),
        }
    }

    /// Send a text message into a chat.
    ///
    /// Side effect first, return always: the produced [`Message`] comes back
    /// even when the broker call times out (the failure is logged).
    pub async fn send_message(&self, text: &str, chat_id: &str) -> Message {
        log::info!("{}: {}", self.name(), text);
        let message = self.produce_message(text, chat_id, "text");
        if let Err(e) = self
            .inner
            .socket
            .call(
                events::SEND_MESSAGE,
                to_wire(&message),
                self.inner.config.call_timeout,
            )
            .await
        {
            log::warn!("{} failed to deliver message: {}", self.name(), e);
        }
        message
    }

    /// Issue a typed command to a set of members and collect their results.
    ///
    /// Returns one [`CommandResult`] per recipient in `to` order, or an empty
    /// list on an empty name, empty recipient list, timeout or transport
    /// failure, never a partial list.
    pub async fn send_command(
        &self,
        command: &str,
        to: &[String],
        data: Value,
    ) -> Vec<CommandResult> {
        if command.is_empty() {
            log::warn!("{} refused to send a command with an empty name", self.name());
            return Vec::new();
        }
        if to.is_empty() {
            log::warn!("{} refused to send command {} to nobody", self.name(), command);
            return Vec::new();
        }

        let request = Command {
            command: command.to_string(),
            by: self.member_id().to_string(),
            to: to.to_vec(),
            data,
        };
        match self
            .inner
            .socket
            .call(events::SEND_COMMAND, to_wire(&request), self.inner.config.call_timeout)
            .await
        {
            Ok(value) => match serde_json::from_value(value) {
                Ok(results) => results,
                Err(e) => {
                    log::warn!("{} got malformed command results: {}", self.name(), e);
                    Vec::new()
                }
            },
            Err(e) => {
                log::warn!("{} failed to send command {}: {}", self.name(), command, e);
                Vec::new()
            }
        }
    }

    /// Create a chat, optionally joining it right away.
    pub async fn create_chat(
        &self,
        name: &str,
        description: Option<&str>,
        is_group: bool,
        join: bool,
    ) -> Result<Chat, String> {
        let data = json!({
            "name": name,
            "description": description,
            "is_group": is_group,
        });
        let response = self
            .inner
            .socket
            .call(events::CREATE_CHAT, data, self.inner.config.call_timeout)
            .await
            .map_err(|e| format!("failed to create chat: {}", e))?;

        if response.get("status").and_then(Value::as_str) == Some("success") {
            let chat: Chat = serde_json::from_value(response["data"].clone())
                .map_err(|e| format!("malformed chat record: {}", e))?;
            log::info!("chat {} created", chat.chat_id);
            if join {
                let _ = self.join_chat(&chat.chat_id).await;
            }
            Ok(chat)
        } else {
            let message = response
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("create chat failed")
                .to_string();
            log::warn!("{} could not create chat: {}", self.name(), message);
            Err(message)
        }
    }

    pub async fn join_chat(&self, chat_id: &str) -> Result<Value, String> {
        let response = self
            .inner
            .socket
            .call(
                events::JOIN_CHAT,
                json!({ "chat_id": chat_id }),
                self.inner.config.call_timeout,
            )
            .await
            .map_err(|e| format!("failed to join chat: {}", e))?;

        if response.get("status").and_then(Value::as_str) == Some("success") {
            log::info!("{} joined chat {}", self.name(), chat_id);
            Ok(response)
        } else {
            let message = response
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("join chat failed")
                .to_string();
            log::warn!("{} could not join chat {}: {}", self.name(), chat_id, message);
            Err(message)
        }
    }

    pub async fn exit_chat(&self, chat_id: &str) -> Value {
        self.call_value(events::EXIT_CHAT, json!({ "chat_id": chat_id }))
            .await
    }

    /// Delete a chat.  Only honored by the broker for its creator.
    pub async fn delete_chat(&self, chat_id: &str) -> Value {
        self.call_value(events::DELETE_CHAT, json!({ "chat_id": chat_id }))
            .await
    }

    pub async fn pull_members_into_chat(&self, chat_id: &str, member_ids: &[String]) -> Value {
        self.call_value(
            events::PULL_MEMBERS_INTO_CHAT,
            json!({ "chat_id": chat_id, "members": member_ids }),
        )
        .await
    }

    pub async fn remove_member_from_chat(&self, chat_id: &str, member_id: &str) -> Value {
        self.call_value(
            events::REMOVE_MEMBER_FROM_CHAT,
            json!({ "chat_id": chat_id, "member_id": member_id }),
        )
        .await
    }

    pub async fn get_chat(&self, chat_id: &str) -> Option<Chat> {
        let response = self
            .call_value(events::GET_CHAT, json!({ "chat_id": chat_id }))
            .await;
        if response.get("status").and_then(Value::as_str) == Some("success") {
            serde_json::from_value(response["data"].clone()).ok()
        } else {
            None
        }
    }

    pub async fn get_joined_chats(&self) -> Vec<String> {
        self.call_parsed(events::GET_JOINED_CHATS, Value::Null).await
    }

    pub async fn get_created_chats(&self) -> Vec<Chat> {
        self.call_parsed(events::GET_CREATED_CHATS, Value::Null).await
    }

    pub async fn get_member(&self, member_id: &str) -> Option<Member> {
        let value = self
            .call_value(events::GET_MEMBER, json!({ "member_id": member_id }))
            .await;
        serde_json::from_value(value).ok()
    }

    pub async fn get_members(&self, member_ids: &[String]) -> Vec<Member> {
        self.call_parsed(events::GET_MEMBERS, json!({ "members": member_ids }))
            .await
    }

    /// Member ids of a chat, in insertion order.
    pub async fn get_chat_member_ids(&self, chat_id: &str) -> Vec<String> {
        self.call_parsed(
            events::GET_CHAT_MEMBERS,
            json!({ "chat_id": chat_id, "complete": false }),
        )
        .await
    }

    /// Complete member records of a chat.
    ///
    /// With `from_cache` the process-local cache is consulted, primed on the
    /// first miss.  The cache is never invalidated by membership changes;
    /// pass `from_cache=false` when freshness matters.
    pub async fn get_chat_members(&self, chat_id: &str, from_cache: bool) -> Vec<Member> {
        if from_cache {
            let mut cache = self.inner.member_cache.lock().await;
            if let Some(members) = cache.get(chat_id) {
                return members.clone();
            }
            let members = self.fetch_chat_members(chat_id).await;
            cache.insert(chat_id.to_string(), members.clone());
            return members;
        }
        self.fetch_chat_members(chat_id).await
    }

    async fn fetch_chat_members(&self, chat_id: &str) -> Vec<Member> {
        self.call_parsed(
            events::GET_CHAT_MEMBERS,
            json!({ "chat_id": chat_id, "complete": true }),
        )
        .await
    }

    /// Resolve a member by display name within a chat, preferring the local
    /// member cache when `from_cache` is set.
    pub async fn get_member_by_name(
        &self,
        name: &str,
        chat_id: &str,
        from_cache: bool,
    ) -> Option<Member> {
        if from_cache {
            let members = self.get_chat_members(chat_id, true).await;
            if let Some(member) = members.into_iter().find(|m| m.name == name) {
                return Some(member);
            }
        }
        let value = self
            .call_value(
                events::GET_MEMBER_BY_NAME,
                json!({ "name": name, "chat_id": chat_id }),
            )
            .await;
        serde_json::from_value(value).ok()
    }

    pub async fn get_online_members(&self) -> Vec<String> {
        self.call_parsed(events::GET_ONLINE_MEMBERS, Value::Null).await
    }

    pub async fn get_chat_online_members(&self, chat_id: &str) -> Vec<String> {
        self.call_parsed(
            events::GET_CHAT_ONLINE_MEMBERS,
            json!({ "chat_id": chat_id }),
        )
        .await
    }

    /// Fetch a chat's history from the broker.  `count = -1` means all.
    pub async fn load_chat_messages_from_server(
        &self,
        chat_id: &str,
        count: i64,
    ) -> Vec<Message> {
        self.call_parsed(
            events::LOAD_CHAT_MESSAGES_FROM_SERVER,
            json!({ "chat_id": chat_id, "count": count }),
        )
        .await
    }

    /// Start receiving a chat's messages without participating in it.
    pub async fn listen_in_chat(&self, chat_id: &str) -> Value {
        self.call_value(events::LISTEN_IN_CHAT, json!({ "chat_id": chat_id }))
            .await
    }

    pub async fn unlisten_in_chat(&self, chat_id: &str) -> Value {
        self.call_value(events::UNLISTEN_IN_CHAT, json!({ "chat_id": chat_id }))
            .await
    }

    pub async fn get_listen_in_chats(&self) -> Vec<String> {
        self.call_parsed(events::GET_LISTEN_IN_CHATS, Value::Null).await
    }

    async fn call_value(&self, event: &str, data: Value) -> Value {
        match self
            .inner
            .socket
            .call(event, data, self.inner.config.call_timeout)
            .await
        {
            Ok(value) => value,
            Err(e) => {
                log::warn!("{} call {} failed: {}", self.name(), event, e);
                Value::Null
            }
        }
    }

    async fn call_parsed<T: DeserializeOwned + Default>(&self, event: &str, data: Value) -> T {
        let value = self.call_value(event, data).await;
        match serde_json::from_value(value) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("{} got malformed {} response: {}", self.name(), event, e);
                T::default()
            }
        }
    }

    /// Bind the inbound dispatchers.  Runs once per client lifetime; a
    /// subsequent login reuses the same handlers.
    fn bind_events(&self) {
        if self.inner.events_bound.swap(true, Ordering::SeqCst) {
            return;
        }

        let weak = Arc::downgrade(&self.inner);
        self.inner.socket.on(
            events::RECEIVE_LOGIN_RESPONSE,
            Arc::new(move |data: Value| {
                let weak = weak.clone();
                Box::pin(async move {
                    let client = MemberClient {
                        inner: weak.upgrade()?,
                    };
                    let status = data.get("status").and_then(Value::as_i64).unwrap_or(0);
                    let message = data.get("message").and_then(Value::as_str).unwrap_or("");
                    if status == 200 {
                        log::info!("{} login success: {}", client.name(), message);
                        client.inner.login_success.store(true, Ordering::SeqCst);
                        if let Some(observer) = client.observer() {
                            observer.on_login_success().await;
                        }
                    } else {
                        log::warn!("{} login failed: {}", client.name(), message);
                        client.inner.login_success.store(false, Ordering::SeqCst);
                    }
                    None
                })
            }),
        );

        let weak = Arc::downgrade(&self.inner);
        self.inner.socket.on(
            events::DISCONNECT,
            Arc::new(move |_data: Value| {
                let weak = weak.clone();
                Box::pin(async move {
                    let client = MemberClient {
                        inner: weak.upgrade()?,
                    };
                    client.logout();
                    None
                })
            }),
        );

        // Message receipt may end in an LLM round-trip; hand it to a worker
        // and acknowledge the delivery immediately.
        let weak = Arc::downgrade(&self.inner);
        self.inner.socket.on(
            events::RECEIVE_MESSAGE,
            Arc::new(move |data: Value| {
                let weak = weak.clone();
                Box::pin(async move {
                    let client = MemberClient {
                        inner: weak.upgrade()?,
                    };
                    match serde_json::from_value::<Message>(data) {
                        Ok(message) => {
                            tokio::spawn(async move {
                                match client.observer() {
                                    Some(observer) => observer.on_message(message).await,
                                    None => log::info!(
                                        "{} received message from {}: {}",
                                        client.name(),
                                        message.from_member_name,
                                        message.message
                                    ),
                                }
                            });
                            Some(Value::Bool(true))
                        }
                        Err(e) => {
                            log::warn!("{} received malformed message: {}", client.name(), e);
                            Some(Value::Bool(false))
                        }
                    }
                })
            }),
        );

        // Commands are the synchronous request/reply path: the broker is
        // waiting on the handler's return value.
        let weak = Arc::downgrade(&self.inner);
        self.inner.socket.on(
            events::RECEIVE_COMMAND,
            Arc::new(move |data: Value| {
                let weak = weak.clone();
                Box::pin(async move {
                    let client = MemberClient {
                        inner: weak.upgrade()?,
                    };
                    match serde_json::from_value::<Command>(data) {
                        Ok(command) => Some(client.handle_command(command).await),
                        Err(e) => {
                            log::warn!("{} received malformed command: {}", client.name(), e);
                            Some(Value::String("malformed command".to_string()))
                        }
                    }
                })
            }),
        );

        // Replying involves the LLM, and the reply itself travels back over
        // this socket, both reasons to leave the receive loop immediately.
        let weak = Arc::downgrade(&self.inner);
        self.inner.socket.on(
            events::NEXT_SPEAKER,
            Arc::new(move |data: Value| {
                let weak = weak.clone();
                Box::pin(async move {
                    let client = MemberClient {
                        inner: weak.upgrade()?,
                    };
                    match serde_json::from_value::<NextSpeaker>(data) {
                        Ok(turn) => {
                            tokio::spawn(async move {
                                if let Some(observer) = client.observer() {
                                    observer.on_next_speaker(turn).await;
                                }
                            });
                        }
                        Err(e) => {
                            log::warn!("{} received malformed next-speaker: {}", client.name(), e)
                        }
                    }
                    None
                })
            }),
        );

        let weak = Arc::downgrade(&self.inner);
        self.inner.socket.on(
            events::RECEIVE_NOTIFICATION_FROM_CHAT,
            Arc::new(move |data: Value| {
                let weak = weak.clone();
                Box::pin(async move {
                    let client = MemberClient {
                        inner: weak.upgrade()?,
                    };
                    match serde_json::from_value::<Notification>(data) {
                        Ok(notification) => {
                            tokio::spawn(async move {
                                if let Some(observer) = client.observer() {
                                    observer.on_notification(notification).await;
                                }
                            });
                            Some(Value::Bool(true))
                        }
                        Err(e) => {
                            log::warn!("{} received malformed notification: {}", client.name(), e);
                            Some(Value::Bool(false))
                        }
                    }
                })
            }),
        );
    }
}

fn to_wire<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
