// src/lib.rs

// Import the top-level `chatmesh` module.
pub mod chatmesh;

// Re-exporting key items for easier external access.
pub use chatmesh::agent::{AgentBackend, BackendError, ChatAgent};
pub use chatmesh::dto::{Chat, Command, CommandResult, Member, Message, NextSpeaker, Notification};
pub use chatmesh::manager::{ChatManager, TurnPolicy};
pub use chatmesh::member::{MemberClient, MemberObserver};
pub use chatmesh::memory::{AgentChat, AgentChats};
