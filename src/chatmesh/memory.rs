//! Per-member, in-process chat history.
//!
//! [`AgentChats`] maps chat ids to [`AgentChat`] records and keeps the
//! reference-chat relation used for context aggregation.  The relation is a
//! directed graph consulted at depth 1 only: aggregation never follows it
//! recursively, so cycles are harmless.
//!
//! Memory is process-local and not persisted, except for the on-demand
//! [`AgentChat::save_to_txt`] transcript dump.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::chatmesh::dto::Message;

/// One member's view of one chat: an append-only message list.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentChat {
    pub chat_id: String,
    /// Whose perspective this history is held from.  Drives the
    /// assistant/user split when the history becomes an LLM context.
    pub member_id: String,
    pub messages: Vec<Message>,
}

impl AgentChat {
    pub fn new(chat_id: impl Into<String>, member_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            member_id: member_id.into(),
            messages: Vec::new(),
        }
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn clear_messages(&mut self) {
        self.messages.clear();
    }

    pub fn remove_message(&mut self, message_id: &str) {
        self.messages.retain(|m| m.message_id != message_id);
    }

    /// Dump the history as a human-readable log, one line per message in
    /// `[<timestamp>] <name>: <message>` format.  The directory is created
    /// on first write.  Returns the path of the written file.
    pub fn save_to_txt(&self, directory: &Path) -> std::io::Result<PathBuf> {
        fs::create_dir_all(directory)?;
        let path = directory.join(format!("{}.txt", self.chat_id));
        let mut file = fs::File::create(&path)?;
        for message in &self.messages {
            writeln!(
                file,
                "[{}] {}: {}",
                message.timestamp, message.from_member_name, message.message
            )?;
        }
        Ok(path)
    }
}

/// All chats a member remembers, plus the reference-chat relation.
#[derive(Debug, Default)]
pub struct AgentChats {
    pub member_id: String,
    chats: HashMap<String, AgentChat>,
    reference_chats: HashMap<String, Vec<String>>,
}

impl AgentChats {
    pub fn new(member_id: impl Into<String>) -> Self {
        Self {
            member_id: member_id.into(),
            chats: HashMap::new(),
            reference_chats: HashMap::new(),
        }
    }

    /// Append a message, creating the chat record if this is the first
    /// message seen for its chat id.  Arrival order is preserved.
    pub fn add_message(&mut self, message: Message) {
        let member_id = self.member_id.clone();
        self.chats
            .entry(message.chat_id.clone())
            .or_insert_with(|| AgentChat::new(message.chat_id.clone(), member_id))
            .add_message(message);
    }

    pub fn contains_chat(&self, chat_id: &str) -> bool {
        self.chats.contains_key(chat_id)
    }

    pub fn chat(&self, chat_id: &str) -> Option<&AgentChat> {
        self.chats.get(chat_id)
    }

    /// Sticky get: an absent chat is created empty rather than reported
    /// missing.
    pub fn get_chat(&mut self, chat_id: &str) -> &AgentChat {
        let member_id = self.member_id.clone();
        self.chats
            .entry(chat_id.to_string())
            .or_insert_with(|| AgentChat::new(chat_id, member_id))
    }

    pub fn get_messages(&mut self, chat_id: &str) -> &[Message] {
        &self.get_chat(chat_id).messages
    }

    pub fn create_chat(&mut self, chat_id: &str) -> &AgentChat {
        let chat = AgentChat::new(chat_id, self.member_id.clone());
        self.chats.insert(chat_id.to_string(), chat);
        &self.chats[chat_id]
    }

    /// Remove a message by id.  Returns whether the *chat* existed, not
    /// whether a message was actually removed.
    pub fn remove_message(&mut self, message_id: &str, chat_id: &str) -> bool {
        match self.chats.get_mut(chat_id) {
            Some(chat) => {
                chat.remove_message(message_id);
                true
            }
            None => false,
        }
    }

    /// Empty a chat's messages, keeping the chat record itself.
    pub fn clear_chat(&mut self, chat_id: &str) {
        if let Some(chat) = self.chats.get_mut(chat_id) {
            chat.clear_messages();
        }
    }

    pub fn add_reference_chat(&mut self, main_chat_id: &str, reference_chat_id: &str) {
        let refs = self
            .reference_chats
            .entry(main_chat_id.to_string())
            .or_default();
        if !refs.iter().any(|id| id == reference_chat_id) {
            refs.push(reference_chat_id.to_string());
        }
    }

    pub fn remove_reference_chat(&mut self, main_chat_id: &str, reference_chat_id: &str) {
        if let Some(refs) = self.reference_chats.get_mut(main_chat_id) {
            refs.retain(|id| id != reference_chat_id);
        }
    }

    pub fn get_reference_chats(&self, main_chat_id: &str) -> Vec<String> {
        self.reference_chats
            .get(main_chat_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Messages of the main chat plus those of its reference chats, sorted
    /// ascending by timestamp.
    ///
    /// The relation is consulted at depth 1: chats referenced only by the
    /// references themselves contribute nothing.  A reference with no local
    /// record is skipped silently.
    pub fn aggregate_messages(&self, main_chat_id: &str) -> Vec<Message> {
        let mut all = Vec::new();
        if let Some(chat) = self.chats.get(main_chat_id) {
            all.extend(chat.messages.iter().cloned());
        }
        if let Some(refs) = self.reference_chats.get(main_chat_id) {
            for reference_id in refs {
                if let Some(chat) = self.chats.get(reference_id) {
                    all.extend(chat.messages.iter().cloned());
                }
            }
        }
        all.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, chat_id: &str, from: &str, text: &str, ts: &str) -> Message {
        Message {
            message_id: id.to_string(),
            chat_id: chat_id.to_string(),
            from_member_id: from.to_string(),
            from_member_name: from.to_string(),
            message_type: "text".to_string(),
            message: text.to_string(),
            timestamp: ts.to_string(),
        }
    }

    #[test]
    fn test_add_message_creates_chat_and_preserves_order() {
        let mut memory = AgentChats::new("alice");
        memory.add_message(message("m1", "c1", "bob", "first", "t1"));
        memory.add_message(message("m2", "c1", "alice", "second", "t2"));

        let chat = memory.chat("c1").unwrap();
        assert_eq!(chat.member_id, "alice");
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[0].message, "first");
        assert_eq!(chat.messages[1].message, "second");
    }

    #[test]
    fn test_get_chat_is_sticky() {
        let mut memory = AgentChats::new("alice");
        assert!(!memory.contains_chat("c1"));
        let chat = memory.get_chat("c1");
        assert!(chat.messages.is_empty());
        assert!(memory.contains_chat("c1"));
    }

    #[test]
    fn test_remove_message_reports_chat_existence() {
        let mut memory = AgentChats::new("alice");
        memory.add_message(message("m1", "c1", "bob", "hi", "t1"));

        // The message id does not exist, but the chat does.
        assert!(memory.remove_message("nope", "c1"));
        assert_eq!(memory.chat("c1").unwrap().messages.len(), 1);

        assert!(memory.remove_message("m1", "c1"));
        assert!(memory.chat("c1").unwrap().messages.is_empty());

        assert!(!memory.remove_message("m1", "unknown-chat"));
    }

    #[test]
    fn test_clear_chat_keeps_the_record() {
        let mut memory = AgentChats::new("alice");
        memory.add_message(message("m1", "c1", "bob", "hi", "t1"));
        memory.clear_chat("c1");
        assert!(memory.contains_chat("c1"));
        assert!(memory.chat("c1").unwrap().messages.is_empty());
    }

    #[test]
    fn test_reference_relation_deduplicates() {
        let mut memory = AgentChats::new("alice");
        memory.add_reference_chat("main", "ref1");
        memory.add_reference_chat("main", "ref1");
        memory.add_reference_chat("main", "ref2");
        assert_eq!(memory.get_reference_chats("main"), vec!["ref1", "ref2"]);

        memory.remove_reference_chat("main", "ref1");
        assert_eq!(memory.get_reference_chats("main"), vec!["ref2"]);
    }

    #[test]
    fn test_aggregate_is_depth_one_and_time_sorted() {
        let mut memory = AgentChats::new("alice");
        memory.add_message(message("m1", "main", "bob", "one", "2026-01-01T00:00:01Z"));
        memory.add_message(message("m3", "ref", "carol", "three", "2026-01-01T00:00:03Z"));
        memory.add_message(message("m2", "ref", "carol", "two", "2026-01-01T00:00:02Z"));
        memory.add_message(message("m4", "deep", "dave", "four", "2026-01-01T00:00:00Z"));

        // main -> ref -> deep; only the first hop may contribute.
        memory.add_reference_chat("main", "ref");
        memory.add_reference_chat("ref", "deep");

        let all = memory.aggregate_messages("main");
        let texts: Vec<&str> = all.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_aggregate_skips_unknown_references() {
        let mut memory = AgentChats::new("alice");
        memory.add_message(message("m1", "main", "bob", "one", "t1"));
        memory.add_reference_chat("main", "never-seen");
        assert_eq!(memory.aggregate_messages("main").len(), 1);
    }

    #[test]
    fn test_save_to_txt_writes_one_line_per_message() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("logs");

        let mut chat = AgentChat::new("c1", "alice");
        chat.add_message(message("m1", "c1", "Bob", "hello there", "t1"));
        chat.add_message(message("m2", "c1", "Alice", "hi", "t2"));

        let path = chat.save_to_txt(&target).unwrap();
        let contents = fs::read_to_string(path).unwrap();
        assert_eq!(contents, "[t1] Bob: hello there\n[t2] Alice: hi\n");
    }
}
