// src/lib.rs

pub mod day_ledger;
pub mod game;
pub mod host;
pub mod prompts;
pub mod roles;

pub use game::{GameClock, GameOutcome, GamePhase, PlayerInfo, PlayerRole};
pub use host::GameHost;
pub use roles::Player;
