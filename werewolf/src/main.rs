//! Assemble and run a full game: one host, ten players, two chats.
//!
//! Expects an OpenAI-compatible provider:
//!   LLM_BASE_URL  (default https://api.openai.com/v1)
//!   LLM_API_KEY
//!   LLM_MODEL     (default gpt-4o)
//! and a running broker (BROKER_URL, default http://localhost:3000).

use chatmesh::chatmesh::backends::OpenAiCompatibleBackend;
use chatmesh::chatmesh::config::ClientConfig;
use chatmesh::AgentBackend;
use chatmesh_werewolf::{GameHost, Player};
use std::sync::Arc;

const STYLES: [&str; 10] = [
    "upbeat and playful, loves opening with 'Oh my!'",
    "a joker who turns every serious question into stand-up material",
    "a dreamy poet, convinced they are the next Shakespeare",
    "arrogant and flamboyant, speaks as if the world revolves around them",
    "a prankster with a sly grin, full of surprises",
    "a social butterfly who instantly befriends everyone in the room",
    "a perfectionist who wants every detail to be just right",
    "stern and pedantic, loves starting with 'Actually' and contradicting people",
    "cynical and sarcastic, permanently unimpressed by the world",
    "hot-tempered and loud, but soft-hearted underneath",
];

#[tokio::main]
async fn main() {
    env_logger::init();

    let base_url =
        std::env::var("LLM_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
    let api_key = match std::env::var("LLM_API_KEY") {
        Ok(key) => key,
        Err(_) => {
            eprintln!("LLM_API_KEY is not set");
            std::process::exit(1);
        }
    };
    let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
    let backend: Arc<dyn AgentBackend> =
        Arc::new(OpenAiCompatibleBackend::new(base_url, api_key, model));

    let config = ClientConfig {
        base_url: std::env::var("BROKER_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        ..ClientConfig::default()
    };

    let host = GameHost::new("The Host", "werewolf_host", backend.clone(), config.clone());
    host.client().signup().await;
    if !host.client().login().await {
        eprintln!("the host could not log in");
        std::process::exit(1);
    }

    let village = host
        .client()
        .create_chat("village square", Some("everyone's chat"), true, true)
        .await
        .expect("could not create the village chat");
    let wolves = host
        .client()
        .create_chat("wolves den", Some("the wolves' private chat"), true, true)
        .await
        .expect("could not create the wolves chat");
    host.assign_chats(&village.chat_id, &wolves.chat_id);

    let mut players: Vec<Arc<Player>> = Vec::new();
    players.push(Player::villager(
        "Sunny Sue", "villager_001", STYLES[0], &village.chat_id, backend.clone(), config.clone(),
    ));
    players.push(Player::villager(
        "Joking Jay", "villager_002", STYLES[1], &village.chat_id, backend.clone(), config.clone(),
    ));
    players.push(
        Player::werewolf(
            "Moonlit Mara", "villager_003", STYLES[2], &village.chat_id, &wolves.chat_id,
            backend.clone(), config.clone(),
        )
        .await,
    );
    players.push(Player::villager(
        "Proud Pierce", "villager_004", STYLES[3], &village.chat_id, backend.clone(), config.clone(),
    ));
    players.push(Player::prophet(
        "Tricky Finn", "villager_005", STYLES[4], &village.chat_id, backend.clone(), config.clone(),
    ));
    players.push(Player::villager(
        "Friendly Faye", "villager_006", STYLES[5], &village.chat_id, backend.clone(), config.clone(),
    ));
    players.push(Player::witch(
        "Meticulous Mona", "villager_007", STYLES[6], &village.chat_id, backend.clone(), config.clone(),
    ));
    players.push(
        Player::werewolf(
            "Contrary Carl", "villager_008", STYLES[7], &village.chat_id, &wolves.chat_id,
            backend.clone(), config.clone(),
        )
        .await,
    );
    players.push(Player::villager(
        "Grumbling Greg", "villager_009", STYLES[8], &village.chat_id, backend.clone(), config.clone(),
    ));
    players.push(
        Player::werewolf(
            "Raging Rolf", "villager_010", STYLES[9], &village.chat_id, &wolves.chat_id,
            backend.clone(), config.clone(),
        )
        .await,
    );

    for player in &players {
        player.agent().client().signup().await;
        if !player.agent().client().login().await {
            eprintln!("{} could not log in", player.name());
            std::process::exit(1);
        }
    }

    let all_ids: Vec<String> = players.iter().map(|p| p.member_id().to_string()).collect();
    let wolf_ids: Vec<String> = players
        .iter()
        .filter(|p| p.role() == chatmesh_werewolf::PlayerRole::Werewolf)
        .map(|p| p.member_id().to_string())
        .collect();

    host.client()
        .pull_members_into_chat(&village.chat_id, &all_ids)
        .await;
    host.client()
        .pull_members_into_chat(&wolves.chat_id, &wolf_ids)
        .await;
    host.manager().register_chat_manager(&village.chat_id).await;
    host.manager().register_chat_manager(&wolves.chat_id).await;
    host.assign_players(all_ids).await;

    if let Err(e) = host.start().await {
        eprintln!("the game could not start: {}", e);
        std::process::exit(1);
    }
    host.client().wait().await;
}
