//! Chat-manager behavior: turn arbitration and cross-chat notifications.
//!
//! A [`ChatManager`] is a member registered with the broker as the arbiter
//! of one or more chats.  After every message it observes it picks the next
//! speaker and emits the `next_speaker` push through the broker, which
//! relays it to the target member.  With exactly two non-manager members the
//! alternation is automatic; larger chats use the configured
//! [`TurnPolicy`].
//!
//! Managers are also the receiving end of the cross-chat side channel: a
//! notification sent from chat A to chat B lands on B's manager, whose
//! default behavior posts a readable relay into B.  This supports star
//! topologies such as a private sub-chat announcing an outcome to a public
//! one.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use chatmesh::chatmesh::backends::OpenAiCompatibleBackend;
//! use chatmesh::chatmesh::config::ClientConfig;
//! use chatmesh::{ChatManager, TurnPolicy};
//!
//! # async {
//! let backend = Arc::new(OpenAiCompatibleBackend::new("https://api.openai.com/v1", "key", "gpt-4o"));
//! let manager = ChatManager::new("Moderator", "mod_001", backend, ClientConfig::default());
//! manager.set_turn_policy(Some(TurnPolicy::RoundRobin));
//! manager.client().login().await;
//! manager.register_chat_manager("some-chat-id").await;
//! manager.client().wait().await;
//! # };
//! ```

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::{Arc, RwLock, Weak};

use crate::chatmesh::agent::{AgentBackend, ChatAgent};
use crate::chatmesh::config::ClientConfig;
use crate::chatmesh::dto::{Message, NextSpeaker, Notification};
use crate::chatmesh::events;
use crate::chatmesh::member::{MemberClient, MemberObserver};
pub use crate::chatmesh::strategy::TurnPolicy;
use crate::chatmesh::strategy::{
    random_successor, round_robin_successor, speaker_ring, two_party_successor,
};

/// A member that arbiters chats: an agent plus turn-taking and the
/// notification relay.
pub struct ChatManager {
    agent: Arc<ChatAgent>,
    /// `None` disables automatic selection; wrapping layers that drive
    /// turn-taking themselves (e.g. a game host) run detached from it.
    policy: RwLock<Option<TurnPolicy>>,
}

#[async_trait]
impl MemberObserver for ChatManager {
    async fn on_message(&self, message: Message) {
        self.handle_message(message).await;
    }

    async fn on_next_speaker(&self, turn: NextSpeaker) {
        self.agent.handle_next_speaker(turn).await;
    }

    async fn on_notification(&self, notification: Notification) {
        self.relay_notification(notification).await;
    }
}

impl ChatManager {
    /// Build a manager that observes its own client.  Automatic turn-taking
    /// defaults to round robin.
    pub fn new(
        name: impl Into<String>,
        member_id: impl Into<String>,
        backend: Arc<dyn AgentBackend>,
        config: ClientConfig,
    ) -> Arc<Self> {
        let manager = Self::detached(name, member_id, backend, config);
        let observer: Weak<dyn MemberObserver> =
            Arc::downgrade(&(manager.clone() as Arc<dyn MemberObserver>));
        manager.client().set_observer(observer);
        manager
    }

    /// Build a manager without attaching it as the client's observer, for
    /// layers that wrap it and observe the client themselves.
    pub fn detached(
        name: impl Into<String>,
        member_id: impl Into<String>,
        backend: Arc<dyn AgentBackend>,
        config: ClientConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            agent: ChatAgent::detached(name, member_id, backend, config),
            policy: RwLock::new(Some(TurnPolicy::RoundRobin)),
        })
    }

    pub fn agent(&self) -> &Arc<ChatAgent> {
        &self.agent
    }

    pub fn client(&self) -> &MemberClient {
        self.agent.client()
    }

    pub fn set_turn_policy(&self, policy: Option<TurnPolicy>) {
        *self.policy.write().unwrap() = policy;
    }

    pub fn turn_policy(&self) -> Option<TurnPolicy> {
        *self.policy.read().unwrap()
    }

    /// Tell the broker this member arbiters `chat_id`.  The broker enforces
    /// at most one manager per chat.
    pub async fn register_chat_manager(&self, chat_id: &str) -> bool {
        let response = self
            .client()
            .socket()
            .call(
                events::REGISTER_CHAT_MANAGER,
                json!({ "chat_id": chat_id }),
                std::time::Duration::from_secs(30),
            )
            .await;
        match response {
            Ok(value) if value.get("status").and_then(Value::as_str) == Some("success") => {
                log::info!(
                    "{} registered as manager of chat {}",
                    self.client().name(),
                    chat_id
                );
                true
            }
            Ok(value) => {
                log::warn!(
                    "{} failed to register as chat manager: {}",
                    self.client().name(),
                    value
                );
                false
            }
            Err(e) => {
                log::warn!(
                    "{} failed to register as chat manager: {}",
                    self.client().name(),
                    e
                );
                false
            }
        }
    }

    /// Signal the broker that `member_id` should produce the next message in
    /// `chat_id`.
    pub async fn choose_next_speaker(&self, chat_id: &str, member_id: &str) {
        let payload = json!({
            "chat_id": chat_id,
            "member_id": member_id,
            "manager_id": self.client().member_id(),
        });
        if let Err(e) = self.client().socket().emit(events::NEXT_SPEAKER, payload) {
            log::warn!(
                "{} could not emit next-speaker for chat {}: {}",
                self.client().name(),
                chat_id,
                e
            );
        }
    }

    /// Build a [`Notification`] out of a message produced for `from_chat_id`
    /// and dispatch it towards `to_chat_id`'s manager.
    pub async fn send_notification_to_chat(
        &self,
        from_chat_id: &str,
        to_chat_id: &str,
        text: &str,
    ) -> Value {
        let notification = Notification {
            message: self.client().produce_message(text, from_chat_id, "text"),
            to_chat_id: to_chat_id.to_string(),
        };
        match self
            .client()
            .socket()
            .call(
                events::SEND_NOTIFICATION_TO_CHAT,
                serde_json::to_value(&notification).unwrap_or(Value::Null),
                std::time::Duration::from_secs(30),
            )
            .await
        {
            Ok(value) => value,
            Err(e) => {
                log::warn!(
                    "{} failed to send notification to chat {}: {}",
                    self.client().name(),
                    to_chat_id,
                    e
                );
                Value::Null
            }
        }
    }

    /// Default relay: post a readable line naming the source chat into the
    /// destination chat.
    pub async fn relay_notification(&self, notification: Notification) {
        let from_chat_id = &notification.message.chat_id;
        log::info!(
            "{} received notification from chat {}",
            self.client().name(),
            from_chat_id
        );
        let source_name = match self.client().get_chat(from_chat_id).await {
            Some(chat) => chat.name,
            None => from_chat_id.clone(),
        };
        self.agent
            .send_message(
                &format!(
                    "Notification from {}: {}",
                    source_name, notification.message.message
                ),
                &notification.to_chat_id,
            )
            .await;
    }

    /// Mirror an observed message, then pick and announce the next speaker
    /// when automatic turn-taking is on.
    pub async fn handle_message(&self, message: Message) {
        self.agent.record_message(message.clone()).await;
        if let Some(next) = self.next_speaker_for(&message).await {
            self.choose_next_speaker(&message.chat_id, &next).await;
        }
    }

    /// Decide who speaks after `message`, or `None` when the turn is skipped.
    ///
    /// The two-party fast path applies regardless of the configured policy.
    pub async fn next_speaker_for(&self, message: &Message) -> Option<String> {
        let policy = self.turn_policy()?;

        let chat = self.client().get_chat(&message.chat_id).await?;
        let ring = speaker_ring(&chat.members, self.client().member_id());

        if ring.len() == 2 {
            return two_party_successor(&ring, &message.from_member_id);
        }

        match policy {
            TurnPolicy::RoundRobin => round_robin_successor(&ring, &message.from_member_id),
            TurnPolicy::Random => random_successor(&ring, &message.from_member_id),
            TurnPolicy::Ai => self.next_speaker_by_ai(message).await,
        }
    }

    /// Ask the LLM to read the transcript and name the next speaker.
    ///
    /// The reply is resolved to a member id by display name; an unresolvable
    /// name skips the turn (logged) rather than guessing.
    async fn next_speaker_by_ai(&self, message: &Message) -> Option<String> {
        let chat_id = &message.chat_id;
        let mut candidates: Vec<String> = self
            .client()
            .get_chat_members(chat_id, false)
            .await
            .into_iter()
            .map(|member| member.name)
            .collect();
        candidates.retain(|name| name != self.client().name() && name != &message.from_member_name);
        if candidates.is_empty() {
            return None;
        }

        let transcript = self.agent.chat_snapshot(chat_id).await;
        let instruction = format!(
            "Read the above conversation. Then select the next role from {:?} to play. Only return the role.",
            candidates
        );
        let choice = self.agent.think(&instruction, &transcript).await?;
        let name = choice.trim();

        match self.client().get_member_by_name(name, chat_id, true).await {
            Some(member) => Some(member.member_id),
            None => {
                log::warn!(
                    "{}: LLM chose '{}' which matches no member of chat {}, skipping turn",
                    self.client().name(),
                    name,
                    chat_id
                );
                None
            }
        }
    }
}
