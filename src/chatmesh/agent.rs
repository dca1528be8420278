//! LLM-driven member behavior.
//!
//! A [`ChatAgent`] layers two things on a [`MemberClient`]: a local
//! [`AgentChats`] memory that mirrors every sent and received message, and an
//! automatic reply path driven by the broker's `next_speaker` push.  The
//! reply context is the main chat's history plus the history of its
//! reference chats, merged in timestamp order.
//!
//! The single abstract extension point is [`AgentBackend`]: concrete agents
//! implement it against their chosen LLM provider (see
//! [`backends`](crate::chatmesh::backends) for a ready-made one).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use chatmesh::chatmesh::backends::OpenAiCompatibleBackend;
//! use chatmesh::chatmesh::config::ClientConfig;
//! use chatmesh::ChatAgent;
//!
//! # async {
//! let backend = Arc::new(OpenAiCompatibleBackend::new(
//!     "https://openrouter.ai/api/v1",
//!     "secret",
//!     "google/gemini-2.0-flash-001",
//! ));
//! let agent = ChatAgent::new("Jack", "ai001", backend, ClientConfig::default());
//! agent.set_prompt("You are chatting in a group. Reply like a person, no name prefix.");
//! agent.client().login().await;
//! agent.client().wait().await;
//! # };
//! ```

use async_trait::async_trait;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::chatmesh::config::ClientConfig;
use crate::chatmesh::dto::{Message, NextSpeaker};
use crate::chatmesh::member::{MemberClient, MemberObserver};
use crate::chatmesh::memory::{AgentChat, AgentChats};

/// Chat id used for the throwaway context assembled right before a reply.
pub const TEMP_CHAT_ID: &str = "temp";

/// How often a retryable backend failure is retried before the agent gives
/// up and stays silent for the turn.
const MAX_BACKEND_ATTEMPTS: u32 = 10;

/// Failure taxonomy for LLM backends.
///
/// Retryable variants are network timeouts, provider rate limits and
/// transient provider errors; everything else ends the attempt immediately.
/// Neither ever crashes the session; at worst the agent falls silent for
/// one turn.
#[derive(Debug)]
pub enum BackendError {
    /// The provider did not answer in time.
    Timeout,
    /// The provider asked us to slow down.
    RateLimited(String),
    /// A failure worth retrying (connection reset, 5xx, ...).
    Transient(String),
    /// A failure that retrying will not fix (bad key, malformed response).
    Fatal(String),
}

impl BackendError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, BackendError::Fatal(_))
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Timeout => write!(f, "backend timed out"),
            BackendError::RateLimited(msg) => write!(f, "rate limited: {}", msg),
            BackendError::Transient(msg) => write!(f, "transient backend error: {}", msg),
            BackendError::Fatal(msg) => write!(f, "backend error: {}", msg),
        }
    }
}

impl Error for BackendError {}

/// The role a context message carries when handed to an LLM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

/// One entry of an LLM prompt context.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

/// Trait implemented once per LLM provider.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Produce a reply for `chat` under the given system prompt.
    async fn generate(&self, prompt: &str, chat: &AgentChat) -> Result<String, BackendError>;
}

/// Translate a chat history into LLM prompt messages from the viewpoint of
/// the chat's owner: own messages become assistant turns, everyone else's
/// become user turns prefixed with the speaker's name so the model can tell
/// the voices apart.
pub fn chat_to_prompt(chat: &AgentChat) -> Vec<PromptMessage> {
    chat.messages
        .iter()
        .map(|message| {
            if message.from_member_id == chat.member_id {
                PromptMessage {
                    role: PromptRole::Assistant,
                    content: message.message.clone(),
                }
            } else {
                PromptMessage {
                    role: PromptRole::User,
                    content: format!("{}: {}", message.from_member_name, message.message),
                }
            }
        })
        .collect()
}

/// Backoff schedule for retryable backend failures: 5 s doubling per
/// attempt, capped at 120 s.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(6);
    Duration::from_secs((5u64 << exp).min(120))
}

/// A member whose replies are produced by an LLM.
pub struct ChatAgent {
    client: MemberClient,
    memory: Mutex<AgentChats>,
    prompt: RwLock<String>,
    backend: Arc<dyn AgentBackend>,
}

#[async_trait]
impl MemberObserver for ChatAgent {
    async fn on_message(&self, message: Message) {
        self.record_message(message).await;
    }

    async fn on_next_speaker(&self, turn: NextSpeaker) {
        self.handle_next_speaker(turn).await;
    }
}

impl ChatAgent {
    /// Build an agent that observes its own client.
    pub fn new(
        name: impl Into<String>,
        member_id: impl Into<String>,
        backend: Arc<dyn AgentBackend>,
        config: ClientConfig,
    ) -> Arc<Self> {
        let agent = Self::detached(name, member_id, backend, config);
        let observer: Weak<dyn MemberObserver> =
            Arc::downgrade(&(agent.clone() as Arc<dyn MemberObserver>));
        agent.client.set_observer(observer);
        agent
    }

    /// Build an agent without attaching it as the client's observer.
    ///
    /// Used by layers that wrap an agent (a chat manager, a game host) and
    /// observe the client themselves, delegating here for memory and reply
    /// handling.
    pub fn detached(
        name: impl Into<String>,
        member_id: impl Into<String>,
        backend: Arc<dyn AgentBackend>,
        config: ClientConfig,
    ) -> Arc<Self> {
        let member_id = member_id.into();
        Arc::new(Self {
            client: MemberClient::new(name, member_id.clone(), "", config),
            memory: Mutex::new(AgentChats::new(member_id)),
            prompt: RwLock::new(String::new()),
            backend,
        })
    }

    pub fn client(&self) -> &MemberClient {
        &self.client
    }

    pub fn set_prompt(&self, prompt: impl Into<String>) {
        *self.prompt.write().unwrap() = prompt.into();
    }

    pub fn prompt(&self) -> String {
        self.prompt.read().unwrap().clone()
    }

    /// Mirror a message into local memory.
    pub async fn record_message(&self, message: Message) {
        self.memory.lock().await.add_message(message);
    }

    /// Send a message and mirror it into local memory.
    pub async fn send_message(&self, text: &str, chat_id: &str) -> Message {
        let message = self.client.send_message(text, chat_id).await;
        self.memory.lock().await.add_message(message.clone());
        message
    }

    pub async fn clear_chat(&self, chat_id: &str) {
        self.memory.lock().await.clear_chat(chat_id);
    }

    pub async fn remove_message(&self, message_id: &str, chat_id: &str) -> bool {
        self.memory.lock().await.remove_message(message_id, chat_id)
    }

    pub async fn add_reference_chat(&self, main_chat_id: &str, reference_chat_id: &str) {
        self.memory
            .lock()
            .await
            .add_reference_chat(main_chat_id, reference_chat_id);
    }

    pub async fn remove_reference_chat(&self, main_chat_id: &str, reference_chat_id: &str) {
        self.memory
            .lock()
            .await
            .remove_reference_chat(main_chat_id, reference_chat_id);
    }

    pub async fn get_reference_chats(&self, main_chat_id: &str) -> Vec<String> {
        self.memory.lock().await.get_reference_chats(main_chat_id)
    }

    /// Clone of this agent's view of one chat; empty when never seen.
    pub async fn chat_snapshot(&self, chat_id: &str) -> AgentChat {
        let memory = self.memory.lock().await;
        memory
            .chat(chat_id)
            .cloned()
            .unwrap_or_else(|| AgentChat::new(chat_id, memory.member_id.clone()))
    }

    /// Main chat plus reference chats, merged in timestamp order.
    pub async fn get_all_messages(&self, main_chat_id: &str) -> Vec<Message> {
        self.memory.lock().await.aggregate_messages(main_chat_id)
    }

    pub async fn knows_chat(&self, chat_id: &str) -> bool {
        self.memory.lock().await.contains_chat(chat_id)
    }

    /// React to a `next_speaker` push: reply when it names this member.
    pub async fn handle_next_speaker(&self, turn: NextSpeaker) {
        if turn.member_id != self.client.member_id() {
            return;
        }
        self.reply(turn).await;
    }

    /// Produce and send a reply into the chat named by `turn`.
    ///
    /// The context is assembled into a throwaway [`AgentChat`] so the
    /// backend sees one coherent transcript regardless of how many reference
    /// chats contributed.
    pub async fn reply(&self, turn: NextSpeaker) {
        let chat_id = turn.chat_id;
        if !self.knows_chat(&chat_id).await {
            log::warn!(
                "{}: asked to speak in chat {} but has no history for it",
                self.client.name(),
                chat_id
            );
            return;
        }

        let messages = self.get_all_messages(&chat_id).await;
        let context = AgentChat {
            chat_id: TEMP_CHAT_ID.to_string(),
            member_id: self.client.member_id().to_string(),
            messages,
        };

        let prompt = self.prompt();
        match self.think(&prompt, &context).await {
            Some(text) => {
                self.send_message(&text, &chat_id).await;
            }
            None => log::warn!(
                "{} stays silent this turn in chat {}",
                self.client.name(),
                chat_id
            ),
        }
    }

    /// Call the backend with the retry policy applied.
    ///
    /// Retryable failures back off exponentially (5 s doubling, 120 s cap)
    /// for up to ten attempts; `None` means the agent gives up this turn.
    pub async fn think(&self, prompt: &str, chat: &AgentChat) -> Option<String> {
        for attempt in 1..=MAX_BACKEND_ATTEMPTS {
            match self.backend.generate(prompt, chat).await {
                Ok(text) => return Some(text),
                Err(e) if e.is_retryable() && attempt < MAX_BACKEND_ATTEMPTS => {
                    let delay = backoff_delay(attempt);
                    log::warn!(
                        "{} backend attempt {}/{} failed ({}), retrying in {:?}",
                        self.client.name(),
                        attempt,
                        MAX_BACKEND_ATTEMPTS,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    log::error!("{} backend failed: {}", self.client.name(), e);
                    return None;
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chatmesh::dto::Message;

    fn message(id: &str, chat_id: &str, from_id: &str, from_name: &str, text: &str, ts: &str) -> Message {
        Message {
            message_id: id.to_string(),
            chat_id: chat_id.to_string(),
            from_member_id: from_id.to_string(),
            from_member_name: from_name.to_string(),
            message_type: "text".to_string(),
            message: text.to_string(),
            timestamp: ts.to_string(),
        }
    }

    #[test]
    fn test_chat_to_prompt_splits_roles_and_prefixes_names() {
        let mut chat = AgentChat::new("c1", "jack");
        chat.add_message(message("m1", "c1", "tom", "Tom", "hello", "t1"));
        chat.add_message(message("m2", "c1", "jack", "Jack", "hi Tom", "t2"));

        let prompt = chat_to_prompt(&chat);
        assert_eq!(prompt.len(), 2);
        assert_eq!(prompt[0].role, PromptRole::User);
        assert_eq!(prompt[0].content, "Tom: hello");
        assert_eq!(prompt[1].role, PromptRole::Assistant);
        assert_eq!(prompt[1].content, "hi Tom");
    }

    #[test]
    fn test_backoff_schedule_doubles_and_caps() {
        let delays: Vec<u64> = (1..=10).map(|a| backoff_delay(a).as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 80, 120, 120, 120, 120, 120]);
    }

    #[test]
    fn test_backend_error_retryability() {
        assert!(BackendError::Timeout.is_retryable());
        assert!(BackendError::RateLimited("slow down".into()).is_retryable());
        assert!(BackendError::Transient("502".into()).is_retryable());
        assert!(!BackendError::Fatal("bad key".into()).is_retryable());
    }
}
