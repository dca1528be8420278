//! The playable roles.
//!
//! A [`Player`] is a [`ChatAgent`] plus game state.  Role behavior is not a
//! type hierarchy: the constructors differ in which commands they register
//! with the underlying client and in how the system prompt is assembled.
//! The host drives every decision through those commands; the free-form
//! chat only carries the conversation itself.

use chatmesh::chatmesh::config::ClientConfig;
use chatmesh::chatmesh::member::CommandHandler;
use chatmesh::{AgentBackend, AgentChat, ChatAgent};
use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::game::{tagged_target, PlayerRole};
use crate::prompts;

/// Parse the witch's free-form answer into one of the three allowed
/// actions: `SAVE`, `KILL:<name>` or `GIVEUP`.
pub fn extract_witch_action(text: &str) -> Option<String> {
    let upper = text.to_uppercase();
    if upper.contains("SAVE") {
        return Some("SAVE".to_string());
    }
    if let Some(target) = tagged_target(text, "KILL") {
        return Some(format!("KILL:{}", target));
    }
    if upper.contains("GIVEUP") {
        return Some("GIVEUP".to_string());
    }
    None
}

/// One seat at the table: an LLM agent plus the game state its commands
/// operate on.
pub struct Player {
    agent: Arc<ChatAgent>,
    role: PlayerRole,
    style: String,
    ability: String,
    goal: String,
    village_chat_id: String,
    alive: AtomicBool,
    // Witch potions; one use each for the whole game.
    has_antidote: AtomicBool,
    has_poison: AtomicBool,
    // What the prophet has learned, name -> role.
    verified: Mutex<HashMap<String, String>>,
    // The werewolf's packmates, by display name.
    teammates: Mutex<Vec<String>>,
}

fn hook<F, Fut>(player: &Arc<Player>, f: F) -> CommandHandler
where
    F: Fn(Arc<Player>, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Value> + Send + 'static,
{
    let weak = Arc::downgrade(player);
    Arc::new(move |data: Value| -> BoxFuture<'static, Value> {
        match weak.upgrade() {
            Some(player) => Box::pin(f(player, data)),
            None => Box::pin(async { Value::Null }),
        }
    })
}

impl Player {
    pub fn villager(
        name: &str,
        member_id: &str,
        style: &str,
        village_chat_id: &str,
        backend: Arc<dyn AgentBackend>,
        config: ClientConfig,
    ) -> Arc<Self> {
        Self::build(
            PlayerRole::Villager,
            name,
            member_id,
            style,
            "no special ability",
            "find the werewolves, vote them out and help the village win",
            village_chat_id,
            backend,
            config,
        )
    }

    pub fn witch(
        name: &str,
        member_id: &str,
        style: &str,
        village_chat_id: &str,
        backend: Arc<dyn AgentBackend>,
        config: ClientConfig,
    ) -> Arc<Self> {
        let player = Self::build(
            PlayerRole::Witch,
            name,
            member_id,
            style,
            "each night you may use one antidote to save a player or one poison to kill one; each potion works once in the whole game",
            "find the werewolves, vote them out and help the village win",
            village_chat_id,
            backend,
            config,
        );
        player.agent.client().register_command(
            "save-or-kill",
            hook(&player, |p, data| async move { p.save_or_kill(data).await }),
        );
        player
    }

    pub fn prophet(
        name: &str,
        member_id: &str,
        style: &str,
        village_chat_id: &str,
        backend: Arc<dyn AgentBackend>,
        config: ClientConfig,
    ) -> Arc<Self> {
        let player = Self::build(
            PlayerRole::Prophet,
            name,
            member_id,
            style,
            "each night you may verify one player's identity",
            "find the werewolves, vote them out and help the village win",
            village_chat_id,
            backend,
            config,
        );
        player.agent.client().register_command(
            "get-verify-target",
            hook(&player, |p, data| async move {
                p.choose_verify_target(data).await
            }),
        );
        player.agent.client().register_command(
            "verify-villager",
            hook(&player, |p, data| async move {
                p.record_verification(data).await
            }),
        );
        player
    }

    /// Werewolves sit in two chats; each one references the other so that
    /// night plotting and day talk share one context.
    pub async fn werewolf(
        name: &str,
        member_id: &str,
        style: &str,
        village_chat_id: &str,
        wolves_chat_id: &str,
        backend: Arc<dyn AgentBackend>,
        config: ClientConfig,
    ) -> Arc<Self> {
        let player = Self::build(
            PlayerRole::Werewolf,
            name,
            member_id,
            style,
            "at night, plot with your pack and attack one player",
            "hide your identity during the day, cooperate with your pack and eliminate everyone else",
            village_chat_id,
            backend,
            config,
        );
        player
            .agent
            .add_reference_chat(village_chat_id, wolves_chat_id)
            .await;
        player
            .agent
            .add_reference_chat(wolves_chat_id, village_chat_id)
            .await;
        player.agent.client().register_command(
            "update-teammates",
            hook(&player, |p, data| async move { p.set_teammates(data).await }),
        );
        player
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        role: PlayerRole,
        name: &str,
        member_id: &str,
        style: &str,
        ability: &str,
        goal: &str,
        village_chat_id: &str,
        backend: Arc<dyn AgentBackend>,
        config: ClientConfig,
    ) -> Arc<Self> {
        let player = Arc::new(Self {
            agent: ChatAgent::new(name, member_id, backend, config),
            role,
            style: style.to_string(),
            ability: ability.to_string(),
            goal: goal.to_string(),
            village_chat_id: village_chat_id.to_string(),
            alive: AtomicBool::new(true),
            has_antidote: AtomicBool::new(true),
            has_poison: AtomicBool::new(true),
            verified: Mutex::new(HashMap::new()),
            teammates: Mutex::new(Vec::new()),
        });
        player.refresh_prompt();

        let client = player.agent.client();
        client.register_command("vote", hook(&player, |p, data| async move { p.vote(data).await }));
        client.register_command("out", hook(&player, |p, _| async move { p.mark_out() }));
        client.register_command("be-saved", hook(&player, |p, _| async move { p.revive() }));
        client.register_command(
            "villager-info",
            hook(&player, |p, _| async move { p.info() }),
        );
        client.register_command(
            "clear-chat",
            hook(&player, |p, data| async move { p.clear_chat(data).await }),
        );

        player
    }

    pub fn agent(&self) -> &Arc<ChatAgent> {
        &self.agent
    }

    pub fn name(&self) -> &str {
        self.agent.client().name()
    }

    pub fn member_id(&self) -> &str {
        self.agent.client().member_id()
    }

    pub fn role(&self) -> PlayerRole {
        self.role
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Rebuild the system prompt from the current game state.
    fn refresh_prompt(&self) {
        let name = self.agent.client().name().to_string();
        let role = self.role.to_string();
        let prompt = match self.role {
            PlayerRole::Werewolf => {
                let teammates = self.teammates.lock().unwrap();
                let pack = if teammates.is_empty() {
                    "all of your packmates are out; you are the last werewolf".to_string()
                } else {
                    teammates.join(", ")
                };
                prompts::werewolf_prompt(&name, &role, &self.ability, &self.goal, &self.style, &pack)
            }
            PlayerRole::Prophet => {
                let verified = self.verified.lock().unwrap();
                let mut prompt =
                    prompts::role_prompt(&name, &role, &self.ability, &self.goal, &self.style);
                if !verified.is_empty() {
                    let known = verified
                        .iter()
                        .map(|(who, what)| format!("{} is a {}", who, what))
                        .collect::<Vec<_>>()
                        .join(", ");
                    prompt.push_str(&format!(
                        "\nImportant! Identities you have already verified: {}",
                        known
                    ));
                }
                prompt
            }
            _ => prompts::role_prompt(&name, &role, &self.ability, &self.goal, &self.style),
        };
        self.agent.set_prompt(prompt);
    }

    /// The decision context: everything this player has seen around the
    /// village chat, plus the instruction being decided on.
    async fn decision_context(&self, instruction: &str, context_id: &str) -> AgentChat {
        let mut messages = self.agent.get_all_messages(&self.village_chat_id).await;
        messages.push(
            self.agent
                .client()
                .produce_message(instruction, context_id, "text"),
        );
        AgentChat {
            chat_id: context_id.to_string(),
            member_id: self.agent.client().member_id().to_string(),
            messages,
        }
    }

    async fn vote(&self, data: Value) -> Value {
        let mut candidates: Vec<String> =
            serde_json::from_value(data["candidates"].clone()).unwrap_or_default();
        candidates.retain(|candidate| candidate != self.name());

        let context = self
            .decision_context(&prompts::vote_prompt(&candidates), "temp-vote")
            .await;
        self.refresh_prompt();

        match self.agent.think(&self.agent.prompt(), &context).await {
            Some(response) => {
                log::info!("{} reasoned: {}", self.name(), response);
                match tagged_target(&response, "VOTETO") {
                    Some(pick) => {
                        log::info!("{} votes for {}", self.name(), pick);
                        Value::String(pick)
                    }
                    None => {
                        log::warn!("{} produced a vote without a |VOTETO:| marker", self.name());
                        Value::Null
                    }
                }
            }
            None => Value::Null,
        }
    }

    fn mark_out(&self) -> Value {
        log::info!("{} is out of the game", self.name());
        self.alive.store(false, Ordering::SeqCst);
        Value::Null
    }

    fn revive(&self) -> Value {
        if self.is_alive() {
            log::info!("{} did not need saving", self.name());
            return Value::Null;
        }
        log::info!("{} was saved", self.name());
        self.alive.store(true, Ordering::SeqCst);
        Value::Null
    }

    fn info(&self) -> Value {
        json!({
            "name": self.name(),
            "member_id": self.member_id(),
            "role": self.role,
            "alive": self.is_alive(),
        })
    }

    async fn clear_chat(&self, data: Value) -> Value {
        if let Some(chat_id) = data["chat_id"].as_str() {
            self.agent.clear_chat(chat_id).await;
        }
        Value::Null
    }

    async fn save_or_kill(&self, data: Value) -> Value {
        let dead_player = data["dead-villager"].as_str().unwrap_or_default();
        let alive_players: Vec<String> =
            serde_json::from_value(data["alive-villagers"].clone()).unwrap_or_default();

        let instruction = prompts::witch_action_prompt(
            dead_player,
            self.has_antidote.load(Ordering::SeqCst),
            self.has_poison.load(Ordering::SeqCst),
            &alive_players,
        );
        let context = self.decision_context(&instruction, "temp-witch").await;
        self.refresh_prompt();

        let Some(response) = self.agent.think(&self.agent.prompt(), &context).await else {
            return Value::Null;
        };
        log::info!("the witch answered: {}", response);

        let Some(action) = extract_witch_action(&response) else {
            log::warn!("{} produced no recognizable witch action", self.name());
            return Value::Null;
        };
        log::info!("the witch acts: {}", action);

        if action == "SAVE" {
            self.has_antidote.store(false, Ordering::SeqCst);
        } else if action.starts_with("KILL:") {
            self.has_poison.store(false, Ordering::SeqCst);
        }
        Value::String(action)
    }

    async fn choose_verify_target(&self, data: Value) -> Value {
        let mut candidates: Vec<String> =
            serde_json::from_value(data["candidates"].clone()).unwrap_or_default();
        candidates.retain(|candidate| candidate != self.name());
        {
            let verified = self.verified.lock().unwrap();
            candidates.retain(|candidate| !verified.contains_key(candidate));
        }
        log::info!("prophet candidates: {:?}", candidates);

        let instruction = {
            let verified = self.verified.lock().unwrap();
            prompts::prophet_verify_prompt(&candidates, &verified)
        };
        let context = self.decision_context(&instruction, "temp-prophet").await;
        self.refresh_prompt();

        match self.agent.think(&self.agent.prompt(), &context).await {
            Some(response) => {
                log::info!("the prophet considered: {}", response);
                tagged_target(&response, "VERIFY")
                    .map(Value::String)
                    .unwrap_or(Value::Null)
            }
            None => Value::Null,
        }
    }

    async fn record_verification(&self, data: Value) -> Value {
        let name = data["name"].as_str().unwrap_or_default().to_string();
        let role = data["role"].as_str().unwrap_or_default().to_string();
        log::info!("the prophet verified: {} is a {}", name, role);
        self.verified.lock().unwrap().insert(name, role);
        self.refresh_prompt();
        Value::Bool(true)
    }

    async fn set_teammates(&self, data: Value) -> Value {
        let mut teammates: Vec<String> =
            serde_json::from_value(data["teammates"].clone()).unwrap_or_default();
        teammates.retain(|teammate| teammate != self.name());
        log::info!("werewolf {} runs with: {:?}", self.name(), teammates);
        *self.teammates.lock().unwrap() = teammates;
        self.refresh_prompt();
        Value::Null
    }
}
