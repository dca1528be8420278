//! The game host: a chat manager running the day/night phase machine.
//!
//! The host owns two chats, the village chat everyone sits in and the
//! private wolves chat, and drives the whole game through them.  Inbound
//! messages on an owned chat are dispatched to the handler of the current
//! phase; free-form discussion phases end on the uppercase
//! `ATTACK <name> TERMINATE` sentinel, every actual decision travels as a
//! typed command (`vote`, `get-verify-target`, `save-or-kill`, ...).
//!
//! Turn-taking is serial by construction: the host names exactly one next
//! speaker and waits for that member's message before advancing.  Game state
//! lives behind a single lock, so a slow phase simply queues the next
//! message's worker behind it.
//!
//! Runtime conditions (an unresponsive provider, a timed-out command) are
//! recovered; a state machine invariant violation is a bug and halts the
//! process with a diagnostic.

use async_trait::async_trait;
use chatmesh::chatmesh::config::ClientConfig;
use chatmesh::{AgentBackend, ChatManager, MemberObserver, Message, Notification};
use serde_json::json;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::Mutex;

use crate::day_ledger::DayLedger;
use crate::game::{
    self, game_outcome, GameClock, GameOutcome, GamePhase, PlayerInfo, PlayerRole,
};
use crate::prompts;

/// Violations of the phase machine's invariants.  These are bugs, not
/// runtime conditions, and halt the session.
#[derive(Debug)]
pub enum GameError {
    /// The `villager-info` sweep produced no players to run the game with.
    PlayersUnavailable,
    /// A night arrived with nobody for the prophet to verify.
    NoVerifyCandidates,
    /// The prophet did not answer, or answered without naming a target.
    ProphetUnresponsive,
    /// The witch did not answer the save-or-kill command.
    WitchUnresponsive,
    /// Voting finished without a single usable ballot.
    NoVotes,
    /// A name that must resolve to a player did not.
    UnknownPlayer(String),
}

impl fmt::Display for GameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameError::PlayersUnavailable => write!(f, "no player info could be collected"),
            GameError::NoVerifyCandidates => write!(f, "no candidates left for the prophet"),
            GameError::ProphetUnresponsive => write!(f, "the prophet produced no verify target"),
            GameError::WitchUnresponsive => write!(f, "the witch produced no action"),
            GameError::NoVotes => write!(f, "the vote produced no usable ballots"),
            GameError::UnknownPlayer(name) => write!(f, "no such player: {}", name),
        }
    }
}

impl Error for GameError {}

/// Mutable game state, guarded by one lock so phases execute serially.
struct HostState {
    phase: GamePhase,
    clock: GameClock,
    players: Vec<PlayerInfo>,
    player_ids: Vec<String>,
    ledger: DayLedger,
}

/// The arbiter of the game.
pub struct GameHost {
    manager: Arc<ChatManager>,
    village_chat_id: RwLock<String>,
    wolves_chat_id: RwLock<String>,
    state: Mutex<HostState>,
}

#[async_trait]
impl MemberObserver for GameHost {
    async fn on_message(&self, message: Message) {
        self.manager.agent().record_message(message.clone()).await;
        if let Err(e) = self.handle_game_message(message).await {
            log::error!("fatal game error: {}", e);
            std::process::exit(1);
        }
    }

    async fn on_notification(&self, notification: Notification) {
        self.manager.relay_notification(notification).await;
    }
}

impl GameHost {
    pub fn new(
        name: impl Into<String>,
        member_id: impl Into<String>,
        backend: Arc<dyn AgentBackend>,
        config: ClientConfig,
    ) -> Arc<Self> {
        let manager = ChatManager::detached(name, member_id, backend, config);
        // The phase machine names every speaker itself.
        manager.set_turn_policy(None);

        let host = Arc::new(Self {
            manager,
            village_chat_id: RwLock::new(String::new()),
            wolves_chat_id: RwLock::new(String::new()),
            state: Mutex::new(HostState {
                phase: GamePhase::Init,
                clock: GameClock::default(),
                players: Vec::new(),
                player_ids: Vec::new(),
                ledger: DayLedger::new(),
            }),
        });
        let observer: Weak<dyn MemberObserver> =
            Arc::downgrade(&(host.clone() as Arc<dyn MemberObserver>));
        host.manager.client().set_observer(observer);
        host
    }

    pub fn manager(&self) -> &Arc<ChatManager> {
        &self.manager
    }

    pub fn client(&self) -> &chatmesh::MemberClient {
        self.manager.client()
    }

    /// Point the host at its two chats.
    pub fn assign_chats(&self, village_chat_id: &str, wolves_chat_id: &str) {
        *self.village_chat_id.write().unwrap() = village_chat_id.to_string();
        *self.wolves_chat_id.write().unwrap() = wolves_chat_id.to_string();
    }

    pub async fn assign_players(&self, player_ids: Vec<String>) {
        self.state.lock().await.player_ids = player_ids;
    }

    pub async fn phase(&self) -> GamePhase {
        self.state.lock().await.phase
    }

    fn village_chat(&self) -> String {
        self.village_chat_id.read().unwrap().clone()
    }

    fn wolves_chat(&self) -> String {
        self.wolves_chat_id.read().unwrap().clone()
    }

    async fn announce(&self, text: &str, chat_id: &str) {
        self.manager.agent().send_message(text, chat_id).await;
    }

    /// Kick the game off: collect the table, brief the pack, enter night one.
    pub async fn start(&self) -> Result<(), GameError> {
        let mut state = self.state.lock().await;
        self.update_players(&mut state).await?;

        let wolf_names: Vec<String> = state
            .players
            .iter()
            .filter(|p| p.role == PlayerRole::Werewolf)
            .map(|p| p.name.clone())
            .collect();
        for wolf in state
            .players
            .iter()
            .filter(|p| p.role == PlayerRole::Werewolf)
        {
            self.client()
                .send_command(
                    "update-teammates",
                    &[wolf.member_id.clone()],
                    json!({ "teammates": wolf_names }),
                )
                .await;
        }

        self.start_night(&mut state).await
    }

    /// Route a message on an owned chat to the current phase's handler.
    /// Phases without a message handler drop it.
    pub async fn handle_game_message(&self, message: Message) -> Result<(), GameError> {
        if message.chat_id != self.village_chat() && message.chat_id != self.wolves_chat() {
            return Ok(());
        }
        if message.from_member_id == self.client().member_id() {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        match state.phase {
            GamePhase::NightStart => self.start_wolf_discussion(&mut state).await,
            GamePhase::WolfKill => self.handle_wolf_kill(&mut state, &message).await,
            GamePhase::Speech => self.handle_speech(&mut state, &message).await,
            GamePhase::Voting => self.handle_voting(&mut state).await,
            GamePhase::Will => self.handle_will(&mut state, &message).await,
            phase => {
                log::debug!(
                    "dropping message from {} (no handler in phase {:?})",
                    message.from_member_name,
                    phase
                );
                Ok(())
            }
        }
    }

    /// Refresh the host's table view through the `villager-info` command.
    async fn update_players(&self, state: &mut HostState) -> Result<(), GameError> {
        let ids = state.player_ids.clone();
        let results = self
            .client()
            .send_command("villager-info", &ids, json!({}))
            .await;

        let mut players = Vec::new();
        for result in results {
            match serde_json::from_value::<PlayerInfo>(result.result.clone()) {
                Ok(player) => players.push(player),
                Err(e) => log::warn!("unusable villager-info result {}: {}", result.result, e),
            }
        }
        if players.is_empty() {
            return Err(GameError::PlayersUnavailable);
        }
        state.players = players;
        Ok(())
    }

    async fn eliminate(&self, state: &mut HostState, member_id: &str) -> Result<(), GameError> {
        self.client()
            .send_command("out", &[member_id.to_string()], json!({}))
            .await;
        self.update_players(state).await
    }

    async fn start_night(&self, state: &mut HostState) -> Result<(), GameError> {
        log::info!("entering night, {}", state.clock);
        state.phase = GamePhase::NightStart;
        self.announce("Night falls. Everyone close your eyes.", &self.village_chat())
            .await;
        self.start_wolf_discussion(state).await
    }

    async fn start_wolf_discussion(&self, state: &mut HostState) -> Result<(), GameError> {
        self.update_players(state).await?;

        let wolves = alive_wolves(&state.players);
        if wolves.is_empty() {
            log::warn!("no werewolves left to run a night with");
            return Ok(());
        }
        let targets: Vec<PlayerInfo> = state
            .players
            .iter()
            .filter(|p| p.alive && p.role != PlayerRole::Werewolf)
            .cloned()
            .collect();
        if targets.is_empty() {
            log::warn!("no targets left for the wolves");
            return Ok(());
        }

        let wolf_names: Vec<String> = wolves.iter().map(|w| w.name.clone()).collect();
        let target_names: Vec<String> = targets.iter().map(|t| t.name.clone()).collect();
        log::info!("wolves awake: {:?}, possible targets: {:?}", wolf_names, target_names);

        state.phase = GamePhase::WolfKill;
        self.announce(
            &prompts::wolf_discussion_opening(&wolf_names, &target_names),
            &self.wolves_chat(),
        )
        .await;
        self.manager
            .choose_next_speaker(&self.wolves_chat(), &wolves[0].member_id)
            .await;
        Ok(())
    }

    async fn handle_wolf_kill(
        &self,
        state: &mut HostState,
        message: &Message,
    ) -> Result<(), GameError> {
        if message.chat_id != self.wolves_chat() {
            return Ok(());
        }

        let day = state.clock.day_number;
        state.ledger.add_night_message(day, &message.message);

        if game::is_discussion_over(&message.message, "ATTACK") {
            state.phase = GamePhase::WolfKillResult;
            return self.handle_wolf_kill_result(state).await;
        }

        match next_alive_wolf(&state.players, &message.from_member_id) {
            Some(wolf) => {
                self.manager
                    .choose_next_speaker(&self.wolves_chat(), &wolf.member_id)
                    .await;
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn handle_wolf_kill_result(&self, state: &mut HostState) -> Result<(), GameError> {
        if let Some(target) = self.process_wolf_kill().await {
            let day = state.clock.day_number;
            state.ledger.set_wolf_kill(day, &target);
            match player_by_name(&state.players, &target) {
                Some(victim) => self.eliminate(state, &victim.member_id).await?,
                // The wolves named someone who isn't at the table; the
                // attack simply fails.
                None => log::warn!("the wolves attacked an unknown player: {}", target),
            }
        }

        state.phase = GamePhase::ProphetVerify;
        self.handle_prophet_verify(state).await
    }

    /// Read the agreed target out of the wolves' discussion transcript.
    async fn process_wolf_kill(&self) -> Option<String> {
        let transcript = self.manager.agent().chat_snapshot(&self.wolves_chat()).await;
        let closing = transcript
            .messages
            .iter()
            .rev()
            .find(|m| game::is_discussion_over(&m.message, "ATTACK"))?;
        let target = game::discussion_target(&closing.message, "ATTACK")?;

        self.announce(
            &format!(
                "The wolves agree to strike {}. Wolves, close your eyes.",
                target
            ),
            &self.wolves_chat(),
        )
        .await;
        Some(target)
    }

    async fn handle_prophet_verify(&self, state: &mut HostState) -> Result<(), GameError> {
        let prophet = state
            .players
            .iter()
            .find(|p| p.role == PlayerRole::Prophet && p.alive)
            .cloned();
        let Some(prophet) = prophet else {
            state.phase = GamePhase::WitchSave;
            return self.handle_witch(state).await;
        };

        let candidates: Vec<String> = alive_players(&state.players)
            .iter()
            .filter(|p| p.name != prophet.name)
            .map(|p| p.name.clone())
            .collect();
        if candidates.is_empty() {
            return Err(GameError::NoVerifyCandidates);
        }

        let results = self
            .client()
            .send_command(
                "get-verify-target",
                &[prophet.member_id.clone()],
                json!({ "candidates": candidates }),
            )
            .await;
        let target = results
            .first()
            .and_then(|r| r.result.as_str())
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or(GameError::ProphetUnresponsive)?;

        let verified = player_by_name(&state.players, &target)
            .ok_or_else(|| GameError::UnknownPlayer(target.clone()))?;
        self.client()
            .send_command(
                "verify-villager",
                &[prophet.member_id.clone()],
                json!({ "name": verified.name, "role": verified.role.to_string() }),
            )
            .await;

        let day = state.clock.day_number;
        state
            .ledger
            .set_prophet_verify(day, &verified.name, &verified.role.to_string());

        state.phase = GamePhase::WitchSave;
        self.handle_witch(state).await
    }

    async fn handle_witch(&self, state: &mut HostState) -> Result<(), GameError> {
        let day = state.clock.day_number;
        let killed = state.ledger.record(day).killed_by_wolves;
        let witch = state
            .players
            .iter()
            .find(|p| p.role == PlayerRole::Witch && p.alive)
            .cloned();

        match (witch, killed) {
            (Some(witch), Some(killed)) => {
                let alive_names: Vec<String> = alive_players(&state.players)
                    .iter()
                    .map(|p| p.name.clone())
                    .collect();
                let results = self
                    .client()
                    .send_command(
                        "save-or-kill",
                        &[witch.member_id.clone()],
                        json!({ "dead-villager": killed, "alive-villagers": alive_names }),
                    )
                    .await;
                let action = results
                    .first()
                    .and_then(|r| r.result.as_str())
                    .map(str::to_string)
                    .ok_or(GameError::WitchUnresponsive)?;

                if action == "SAVE" {
                    state.ledger.set_witch_save(day, &killed);
                    if let Some(saved) = player_by_name(&state.players, &killed) {
                        self.client()
                            .send_command("be-saved", &[saved.member_id.clone()], json!({}))
                            .await;
                    }
                } else if let Some(poisoned) = action.strip_prefix("KILL:") {
                    let poisoned = poisoned.to_string();
                    state.ledger.set_witch_kill(day, &poisoned);
                    match player_by_name(&state.players, &poisoned) {
                        Some(victim) => self.eliminate(state, &victim.member_id).await?,
                        None => log::warn!("the witch poisoned an unknown player: {}", poisoned),
                    }
                }
            }
            (None, _) => log::info!("the witch is gone, skipping her turn"),
            // No death tonight: the witch has nothing to decide.
            (Some(_), None) => {}
        }

        state.phase = GamePhase::DayStart;
        state.clock.advance();
        self.handle_day_start(state).await
    }

    async fn handle_day_start(&self, state: &mut HostState) -> Result<(), GameError> {
        self.announce("The sun rises. Everyone open your eyes.", &self.village_chat())
            .await;
        state.phase = GamePhase::DeathReport;
        self.handle_death_report(state).await
    }

    async fn handle_death_report(&self, state: &mut HostState) -> Result<(), GameError> {
        // Night actions were recorded under the previous day number.
        let record = state.ledger.record(state.clock.day_number.saturating_sub(1));
        log::info!("day {} report: {:?}", state.clock.day_number, record);

        let mut deaths = Vec::new();
        if let Some(killed) = &record.killed_by_wolves {
            if record.saved_by_witch.as_deref() != Some(killed.as_str()) {
                deaths.push(killed.clone());
            }
        }
        if let Some(poisoned) = &record.killed_by_witch {
            deaths.push(poisoned.clone());
        }
        self.announce(&death_report_line(&deaths), &self.village_chat())
            .await;

        self.update_players(state).await?;
        if let Some(outcome) = game_outcome(&state.players) {
            return self.finish(state, outcome).await;
        }

        state.phase = GamePhase::Speech;
        if let Some(first) = first_alive(&state.players) {
            self.manager
                .choose_next_speaker(&self.village_chat(), &first.member_id)
                .await;
        }
        Ok(())
    }

    async fn handle_speech(
        &self,
        state: &mut HostState,
        message: &Message,
    ) -> Result<(), GameError> {
        self.update_players(state).await?;
        match next_alive_villager(&state.players, &message.from_member_id) {
            Some(next) => {
                self.manager
                    .choose_next_speaker(&self.village_chat(), &next.member_id)
                    .await;
                Ok(())
            }
            None => {
                // Everyone has spoken; on to the ballots.
                state.phase = GamePhase::Voting;
                self.handle_voting(state).await
            }
        }
    }

    async fn handle_voting(&self, state: &mut HostState) -> Result<(), GameError> {
        let alive = alive_players(&state.players);
        let alive_ids: Vec<String> = alive.iter().map(|p| p.member_id.clone()).collect();
        let alive_names: Vec<String> = alive.iter().map(|p| p.name.clone()).collect();

        let results = self
            .client()
            .send_command("vote", &alive_ids, json!({ "candidates": alive_names }))
            .await;
        let votes: Vec<String> = results
            .iter()
            .filter_map(|r| r.result.as_str())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();
        log::info!("ballots: {:?}", votes);

        let banished_name = game::most_voted(&votes).ok_or(GameError::NoVotes)?;
        let banished = player_by_name(&state.players, &banished_name)
            .ok_or_else(|| GameError::UnknownPlayer(banished_name.clone()))?;

        self.eliminate(state, &banished.member_id).await?;
        let day = state.clock.day_number;
        state.ledger.set_vote_out(day, &banished_name);

        if let Some(outcome) = game_outcome(&state.players) {
            return self.finish(state, outcome).await;
        }

        state.phase = GamePhase::Will;
        self.announce(
            &format!("{} was banished. Please leave your last words.", banished_name),
            &self.village_chat(),
        )
        .await;
        self.manager
            .choose_next_speaker(&self.village_chat(), &banished.member_id)
            .await;
        Ok(())
    }

    async fn handle_will(
        &self,
        state: &mut HostState,
        message: &Message,
    ) -> Result<(), GameError> {
        log::info!(
            "{} left their last words: {}",
            message.from_member_name,
            message.message
        );
        state.clock.advance();
        self.start_night(state).await
    }

    async fn finish(&self, state: &mut HostState, outcome: GameOutcome) -> Result<(), GameError> {
        let line = match outcome {
            GameOutcome::GoodWins => "All werewolves are dead. The village wins.",
            GameOutcome::WolvesWin => "The werewolves have taken the village. The wolves win.",
        };
        self.announce(line, &self.village_chat()).await;
        state.phase = GamePhase::GameOver;
        log::info!("game over: {}", line);
        Ok(())
    }
}

fn alive_players(players: &[PlayerInfo]) -> Vec<PlayerInfo> {
    players.iter().filter(|p| p.alive).cloned().collect()
}

fn alive_wolves(players: &[PlayerInfo]) -> Vec<PlayerInfo> {
    players
        .iter()
        .filter(|p| p.alive && p.role == PlayerRole::Werewolf)
        .cloned()
        .collect()
}

fn first_alive(players: &[PlayerInfo]) -> Option<PlayerInfo> {
    players.iter().find(|p| p.alive).cloned()
}

fn player_by_name(players: &[PlayerInfo], name: &str) -> Option<PlayerInfo> {
    players.iter().find(|p| p.name == name).cloned()
}

/// Successor of `current` among the alive players, in table order.  `None`
/// once the last alive player has spoken; an unknown id restarts at the
/// first alive player.
fn next_alive_villager(players: &[PlayerInfo], current_id: &str) -> Option<PlayerInfo> {
    let alive = alive_players(players);
    if alive.is_empty() {
        return None;
    }
    match alive.iter().position(|p| p.member_id == current_id) {
        Some(index) => alive.get(index + 1).cloned(),
        None => Some(alive[0].clone()),
    }
}

/// Successor of `current` among the alive wolves, wrapping around: the
/// pack keeps talking in circles until it agrees.
fn next_alive_wolf(players: &[PlayerInfo], current_id: &str) -> Option<PlayerInfo> {
    let wolves = alive_wolves(players);
    if wolves.is_empty() {
        return None;
    }
    match wolves.iter().position(|p| p.member_id == current_id) {
        Some(index) => Some(wolves[(index + 1) % wolves.len()].clone()),
        None => Some(wolves[0].clone()),
    }
}

fn death_report_line(deaths: &[String]) -> String {
    if deaths.is_empty() {
        "Last night was peaceful; nobody died.".to_string()
    } else {
        format!("Last night, {} died.", deaths.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(name: &str, role: PlayerRole, alive: bool) -> PlayerInfo {
        PlayerInfo {
            name: name.to_string(),
            member_id: format!("id-{}", name),
            role,
            alive,
        }
    }

    fn table() -> Vec<PlayerInfo> {
        vec![
            player("a", PlayerRole::Villager, true),
            player("w1", PlayerRole::Werewolf, true),
            player("b", PlayerRole::Villager, false),
            player("c", PlayerRole::Prophet, true),
            player("w2", PlayerRole::Werewolf, true),
        ]
    }

    #[test]
    fn test_next_alive_villager_skips_the_dead_and_ends() {
        let players = table();
        assert_eq!(next_alive_villager(&players, "id-a").unwrap().name, "w1");
        // b is dead, so w1's successor is c.
        assert_eq!(next_alive_villager(&players, "id-w1").unwrap().name, "c");
        assert_eq!(next_alive_villager(&players, "id-c").unwrap().name, "w2");
        assert_eq!(next_alive_villager(&players, "id-w2"), None);
        // Unknown speaker restarts at the first alive player.
        assert_eq!(next_alive_villager(&players, "host").unwrap().name, "a");
    }

    #[test]
    fn test_next_alive_wolf_wraps_around() {
        let players = table();
        assert_eq!(next_alive_wolf(&players, "id-w1").unwrap().name, "w2");
        assert_eq!(next_alive_wolf(&players, "id-w2").unwrap().name, "w1");
        assert_eq!(next_alive_wolf(&players, "nobody").unwrap().name, "w1");
        assert_eq!(next_alive_wolf(&[], "id-w1"), None);
    }

    #[test]
    fn test_death_report_wording() {
        assert_eq!(
            death_report_line(&[]),
            "Last night was peaceful; nobody died."
        );
        assert_eq!(
            death_report_line(&["Alice".to_string(), "Bob".to_string()]),
            "Last night, Alice, Bob died."
        );
    }
}
