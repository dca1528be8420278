//! Prompt templates for the role agents.
//!
//! The markers the host parses back out (`|VOTETO:NAME|`, `|VERIFY:NAME|`,
//! `|KILL:NAME|`, `SAVE`, `GIVEUP`, `ATTACK <name> TERMINATE`) are spelled
//! out here and nowhere else, so the prompts and the parsers cannot drift
//! apart silently.

use std::collections::HashMap;

pub const GAME_RULES: &str = "Werewolf game rules:
Players: 8 or more.
Roles: werewolves, villagers, one prophet, one witch.
At night the werewolves pick a player to attack, the prophet may verify one
player's identity, and the witch holds one antidote and one poison (at most
one potion per night, each usable once in the whole game).
During the day every player speaks in turn, then everyone votes to banish a
player. The banished player may leave last words.";

/// System prompt shared by every role.
pub fn role_prompt(name: &str, role: &str, ability: &str, goal: &str, style: &str) -> String {
    format!(
        "{rules}\n\
         You are {name}, playing a game of Werewolf.\n\
         Your role: {role}.\n\
         Your ability: {ability}.\n\
         Your goal: {goal}.\n\
         Speaking style: {style}\n\
         Keep your statements short, clear and without any name prefix.",
        rules = GAME_RULES,
        name = name,
        role = role,
        ability = ability,
        goal = goal,
        style = style,
    )
}

/// Werewolves additionally know their pack.
pub fn werewolf_prompt(
    name: &str,
    role: &str,
    ability: &str,
    goal: &str,
    style: &str,
    teammates: &str,
) -> String {
    format!(
        "{base}\n\
         Your fellow werewolves: {teammates} (decide alone once they are all out).",
        base = role_prompt(name, role, ability, goal, style),
        teammates = teammates,
    )
}

pub fn vote_prompt(candidates: &[String]) -> String {
    format!(
        "This round of speeches has ended.\n\
         Vote based on the conversation above.\n\
         Candidates: {candidates}\n\
         Requirements:\n\
         1. Weigh each player's statements carefully.\n\
         2. Give your reasoning.\n\
         3. Once decided, output in the format: |VOTETO:NAME|",
        candidates = candidates.join(","),
    )
}

pub fn last_words_prompt() -> String {
    "You have been voted out of the game.\n\
     Please leave your last words. You may reveal your true role, share your\n\
     view of the other players, or point at who you believe the killer is.\n\
     Keep it under 100 words."
        .to_string()
}

pub fn prophet_verify_prompt(candidates: &[String], verified: &HashMap<String, String>) -> String {
    let verified_info = if verified.is_empty() {
        "none".to_string()
    } else {
        verified
            .iter()
            .map(|(name, role)| format!("{} is a {}", name, role))
            .collect::<Vec<_>>()
            .join(",")
    };
    format!(
        "As the prophet, you may verify one player's identity tonight.\n\
         Players you can verify: {candidates}\n\
         Players already verified: {verified} (important!)\n\
         Requirements:\n\
         1. Consider whether a verification is worth it.\n\
         2. Pick the most valuable target.\n\
         3. Once decided, output in the format: |VERIFY:FULL NAME|",
        candidates = candidates.join(","),
        verified = verified_info,
    )
}

pub fn witch_action_prompt(
    dead_player: &str,
    has_antidote: bool,
    has_poison: bool,
    alive_players: &[String],
) -> String {
    let potion = |available: bool| if available { "available" } else { "used up" };
    format!(
        "As the witch, you may use a potion tonight.\n\
         The player who died tonight: {dead}\n\
         Your potions:\n\
         - antidote: {antidote}\n\
         - poison: {poison}\n\
         Players alive: {alive}\n\
         Requirements:\n\
         1. Weigh whether a potion is worth spending.\n\
         2. Make your choice:\n\
            - use the antidote: output \"SAVE\"\n\
            - use the poison: output \"|KILL:NAME|\"\n\
            - do nothing: output \"GIVEUP\"\n\
         Remember: only one potion per night.",
        dead = dead_player,
        antidote = potion(has_antidote),
        poison = potion(has_poison),
        alive = alive_players.join(","),
    )
}

/// The host's announcement opening the wolves' night discussion.  The last
/// wolf to speak is asked to close with the attack sentinel.
pub fn wolf_discussion_opening(wolf_names: &[String], target_names: &[String]) -> String {
    format!(
        "Werewolves, open your eyes.\n\
         Tonight's werewolves: {wolves}\n\
         Targets you may attack: {targets}\n\
         Discuss in turn and agree on a target.\n\
         {last_wolf}, when you speak, sum up the discussion and include the\n\
         final target together with \"TERMINATE\", e.g.: \"ATTACK FULL-NAME TERMINATE\"",
        wolves = wolf_names.join(", "),
        targets = target_names.join(", "),
        last_wolf = wolf_names.last().map(String::as_str).unwrap_or(""),
    )
}
