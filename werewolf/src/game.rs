//! Game primitives: phases, the day/night clock, player records and the
//! small text conventions the host and the role agents agree on.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The host's phase machine.  Inbound messages on an owned chat are
/// dispatched to the handler of the current phase; phases without a message
/// handler advance on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePhase {
    Init,

    // Day
    DayStart,
    DeathReport,
    Speech,
    Voting,
    VoteResult,
    Will,

    // Night
    NightStart,
    WolfKill,
    WolfKillResult,
    ProphetVerify,
    WitchSave,

    GameOver,
}

/// Day counter plus the day/night flag.  Games start on night one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameClock {
    pub day_number: u32,
    pub is_day: bool,
}

impl Default for GameClock {
    fn default() -> Self {
        Self {
            day_number: 1,
            is_day: false,
        }
    }
}

impl GameClock {
    /// Flip between day and night; a new day begins when night ends.
    pub fn advance(&mut self) {
        self.is_day = !self.is_day;
        if self.is_day {
            self.day_number += 1;
        }
        log::info!("game clock: {}", self);
    }
}

impl fmt::Display for GameClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "day {}, {}",
            self.day_number,
            if self.is_day { "daytime" } else { "night" }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerRole {
    Werewolf,
    Villager,
    Prophet,
    Witch,
}

impl fmt::Display for PlayerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlayerRole::Werewolf => "werewolf",
            PlayerRole::Villager => "villager",
            PlayerRole::Prophet => "prophet",
            PlayerRole::Witch => "witch",
        };
        write!(f, "{}", name)
    }
}

/// What the host knows about one player, refreshed through the
/// `villager-info` command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub name: String,
    pub member_id: String,
    pub role: PlayerRole,
    pub alive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOutcome {
    /// Every werewolf is dead.
    GoodWins,
    /// The werewolves equal or outnumber the remaining villagers.
    WolvesWin,
}

/// The game-over predicate.  `None` while the game goes on.
pub fn game_outcome(players: &[PlayerInfo]) -> Option<GameOutcome> {
    let alive_wolves = players
        .iter()
        .filter(|p| p.alive && p.role == PlayerRole::Werewolf)
        .count();
    let alive_others = players
        .iter()
        .filter(|p| p.alive && p.role != PlayerRole::Werewolf)
        .count();

    if alive_wolves == 0 {
        Some(GameOutcome::GoodWins)
    } else if alive_others <= alive_wolves {
        Some(GameOutcome::WolvesWin)
    } else {
        None
    }
}

/// Winner of a vote: the option with the highest count, ties broken by
/// first appearance in the ballot list.
pub fn most_voted(votes: &[String]) -> Option<String> {
    if votes.is_empty() {
        return None;
    }
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for vote in votes {
        *counts.entry(vote.as_str()).or_default() += 1;
    }
    let mut best: Option<(&str, usize)> = None;
    for vote in votes {
        let count = counts[vote.as_str()];
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((vote.as_str(), count));
        }
    }
    best.map(|(name, _)| name.to_string())
}

/// Extract the target of a `|KEYWORD:NAME|` marker, the convention role
/// agents use to flag a decision inside free-form LLM output.
pub fn tagged_target(text: &str, keyword: &str) -> Option<String> {
    let pattern = format!(r"\|{}:([^|]+)\|", regex::escape(keyword));
    let re = Regex::new(&pattern).ok()?;
    re.captures(text)
        .map(|captures| captures[1].trim().to_string())
}

/// Extract the target of an uppercase `<VERB> <name> TERMINATE` sentinel,
/// the convention that ends a free-form discussion whose length the host
/// cannot know in advance.
pub fn discussion_target(text: &str, verb: &str) -> Option<String> {
    let pattern = format!(r"{}\s+(\S+)\s+TERMINATE", regex::escape(verb));
    let re = Regex::new(&pattern).ok()?;
    re.captures(text).map(|captures| captures[1].to_string())
}

/// Whether a message carries the end-of-discussion sentinel for `verb`.
pub fn is_discussion_over(text: &str, verb: &str) -> bool {
    let upper = text.to_uppercase();
    upper.contains("TERMINATE") && upper.contains(verb)
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

    #[test]
    fn test_clock_starts_on_night_one() {
        let mut clock = GameClock::default();
        assert_eq!(clock.day_number, 1);
        assert!(!clock.is_day);

        clock.advance();
        assert_eq!(clock.day_number, 2);
        assert!(clock.is_day);

        clock.advance();
        assert_eq!(clock.day_number, 2);
        assert!(!clock.is_day);
    }

    #[test]
    fn test_most_voted_counts_and_breaks_ties_by_first_seen() {
        let votes: Vec<String> = ["A", "B", "A", "C", "A"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(most_voted(&votes), Some("A".to_string()));

        let tie: Vec<String> = ["B", "A", "A", "B"].iter().map(|s| s.to_string()).collect();
        assert_eq!(most_voted(&tie), Some("B".to_string()));

        assert_eq!(most_voted(&[]), None);
    }

    #[test]
    fn test_tagged_target_extraction() {
        assert_eq!(
            tagged_target("after some thought |VOTETO:Alice| is my pick", "VOTETO"),
            Some("Alice".to_string())
        );
        assert_eq!(
            tagged_target("I must |VERIFY:Gray Wolf| tonight", "VERIFY"),
            Some("Gray Wolf".to_string())
        );
        assert_eq!(tagged_target("no marker here", "VOTETO"), None);
    }

    #[test]
    fn test_discussion_sentinel_extraction() {
        assert_eq!(
            discussion_target("we agree. ATTACK Alice TERMINATE", "ATTACK"),
            Some("Alice".to_string())
        );
        assert_eq!(
            discussion_target("Let's KILL Alice TERMINATE them", "KILL"),
            Some("Alice".to_string())
        );
        assert!(is_discussion_over("final answer: ATTACK Bob TERMINATE", "ATTACK"));
        assert!(!is_discussion_over("we should attack Bob tomorrow", "ATTACK"));
        assert_eq!(discussion_target("still deliberating", "ATTACK"), None);
    }

    #[test]
    fn test_game_over_when_wolves_are_gone() {
        let players = vec![
            player("a", PlayerRole::Villager, true),
            player("b", PlayerRole::Prophet, true),
            player("w", PlayerRole::Werewolf, false),
        ];
        assert_eq!(game_outcome(&players), Some(GameOutcome::GoodWins));
    }

    #[test]
    fn test_game_over_when_wolves_reach_parity() {
        let players = vec![
            player("a", PlayerRole::Villager, true),
            player("b", PlayerRole::Witch, false),
            player("w1", PlayerRole::Werewolf, true),
            player("w2", PlayerRole::Werewolf, false),
        ];
        assert_eq!(game_outcome(&players), Some(GameOutcome::WolvesWin));
    }

    #[test]
    fn test_game_goes_on_otherwise() {
        let players = vec![
            player("a", PlayerRole::Villager, true),
            player("b", PlayerRole::Villager, true),
            player("w", PlayerRole::Werewolf, true),
        ];
        assert_eq!(game_outcome(&players), None);
    }
}
