mod support;

use async_trait::async_trait;
use chatmesh::chatmesh::config::ClientConfig;
use chatmesh::{AgentBackend, AgentChat, BackendError, ChatManager, Message, TurnPolicy};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use support::MockBroker;

struct MockBackend;

#[async_trait]
impl AgentBackend for MockBackend {
    async fn generate(&self, _prompt: &str, _chat: &AgentChat) -> Result<String, BackendError> {
        Ok("unused".to_string())
    }
}

fn config(base_url: &str) -> ClientConfig {
    ClientConfig {
        base_url: base_url.to_string(),
        connect_timeout: Duration::from_secs(2),
        call_timeout: Duration::from_secs(2),
    }
}

fn chat_record(chat_id: &str, members: &[&str], manager: &str) -> Value {
    json!({
        "status": "success",
        "data": {
            "chat_id": chat_id,
            "name": "test chat",
            "is_group": true,
            "members": members,
            "created_by": manager,
            "createdAt": "2026-01-01T00:00:00Z",
            "manager": manager,
        },
    })
}

fn message(id: &str, chat_id: &str, from: &str, text: &str) -> Message {
    Message {
        message_id: id.to_string(),
        chat_id: chat_id.to_string(),
        from_member_id: from.to_string(),
        from_member_name: from.to_string(),
        message_type: "text".to_string(),
        message: text.to_string(),
        timestamp: "2026-01-01T00:00:00Z".to_string(),
    }
}

async fn next_speaker_targets(broker: &MockBroker) -> Vec<String> {
    broker
        .frames_for("next_speaker")
        .await
        .iter()
        .map(|f| f["data"]["member_id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_two_party_chat_alternates_regardless_of_policy() {
    let broker = MockBroker::start().await;
    broker
        .set_response("get_chat", chat_record("c1", &["mod", "a", "b"], "mod"))
        .await;

    let manager = ChatManager::new("Mod", "mod", Arc::new(MockBackend), config(&broker.base_url));
    // Even a non-default policy must not defeat the fast path.
    manager.set_turn_policy(Some(TurnPolicy::Random));
    assert!(manager.client().login().await);

    manager.handle_message(message("m1", "c1", "a", "hello")).await;
    manager.handle_message(message("m2", "c1", "b", "hi")).await;

    broker
        .wait_for(Duration::from_secs(3), |f| {
            f["event"] == "next_speaker" && f["data"]["member_id"] == "a"
        })
        .await
        .expect("second selection must target a");

    assert_eq!(next_speaker_targets(&broker).await, vec!["b", "a"]);
    let frames = broker.frames_for("next_speaker").await;
    assert_eq!(frames[0]["data"]["manager_id"], "mod");
}

#[tokio::test]
async fn test_round_robin_over_three_members() {
    let broker = MockBroker::start().await;
    broker
        .set_response("get_chat", chat_record("c1", &["mod", "a", "b", "c"], "mod"))
        .await;

    let manager = ChatManager::new("Mod", "mod", Arc::new(MockBackend), config(&broker.base_url));
    manager.set_turn_policy(Some(TurnPolicy::RoundRobin));
    assert!(manager.client().login().await);

    for (id, from) in [("m1", "a"), ("m2", "b"), ("m3", "c"), ("m4", "a")] {
        manager.handle_message(message(id, "c1", from, "...")).await;
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while next_speaker_targets(&broker).await.len() < 4 {
        assert!(tokio::time::Instant::now() < deadline, "expected four selections");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(next_speaker_targets(&broker).await, vec!["b", "c", "a", "b"]);
}

#[tokio::test]
async fn test_disabled_policy_emits_nothing() {
    let broker = MockBroker::start().await;
    broker
        .set_response("get_chat", chat_record("c1", &["mod", "a", "b", "c"], "mod"))
        .await;

    let manager = ChatManager::new("Mod", "mod", Arc::new(MockBackend), config(&broker.base_url));
    manager.set_turn_policy(None);
    assert!(manager.client().login().await);

    manager.handle_message(message("m1", "c1", "a", "hello")).await;
    assert!(broker
        .wait_for(Duration::from_secs(1), |f| f["event"] == "next_speaker")
        .await
        .is_none());

    // The message was still mirrored.
    assert_eq!(manager.agent().get_all_messages("c1").await.len(), 1);
}

#[tokio::test]
async fn test_notification_is_relayed_into_the_destination_chat() {
    let broker = MockBroker::start().await;
    broker
        .set_response(
            "get_chat",
            json!({
                "status": "success",
                "data": {
                    "chat_id": "wolves",
                    "name": "wolves-den",
                    "is_group": true,
                    "members": [],
                    "created_by": "host",
                    "createdAt": "2026-01-01T00:00:00Z",
                },
            }),
        )
        .await;

    let manager = ChatManager::new("Mod", "mod", Arc::new(MockBackend), config(&broker.base_url));
    assert!(manager.client().login().await);

    broker
        .push(
            "receive_notification_from_chat",
            json!({
                "message_id": "n1",
                "chat_id": "wolves",
                "from_member_id": "host",
                "from_member_name": "Host",
                "message": "a player was attacked tonight",
                "timestamp": "2026-01-01T00:00:05Z",
                "to_chat_id": "village",
            }),
            Some(5),
        )
        .await;

    let relayed = broker
        .wait_for(Duration::from_secs(3), |f| f["event"] == "send_message")
        .await
        .expect("the manager must post a relay message");
    assert_eq!(relayed["data"]["chat_id"], "village");
    let text = relayed["data"]["message"].as_str().unwrap();
    assert!(text.contains("wolves-den"));
    assert!(text.contains("a player was attacked tonight"));
}

#[tokio::test]
async fn test_send_notification_builds_the_side_channel_payload() {
    let broker = MockBroker::start().await;
    let manager = ChatManager::new("Mod", "mod", Arc::new(MockBackend), config(&broker.base_url));
    assert!(manager.client().login().await);

    manager
        .send_notification_to_chat("wolves", "village", "someone died")
        .await;

    let frame = broker
        .wait_for(Duration::from_secs(3), |f| {
            f["event"] == "send_notification_to_chat"
        })
        .await
        .expect("notification must reach the broker");
    assert_eq!(frame["data"]["chat_id"], "wolves");
    assert_eq!(frame["data"]["to_chat_id"], "village");
    assert_eq!(frame["data"]["message"], "someone died");
    assert_eq!(frame["data"]["from_member_id"], "mod");
}

#[tokio::test]
async fn test_register_chat_manager_reports_broker_status() {
    let broker = MockBroker::start().await;
    let manager = ChatManager::new("Mod", "mod", Arc::new(MockBackend), config(&broker.base_url));
    assert!(manager.client().login().await);

    assert!(manager.register_chat_manager("c1").await);

    broker
        .set_response(
            "register_chat_manager",
            json!({ "status": "error", "message": "chat already has a manager" }),
        )
        .await;
    assert!(!manager.register_chat_manager("c1").await);
}
