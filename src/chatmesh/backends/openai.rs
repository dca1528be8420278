//! Backend for any provider exposing an OpenAI-compatible chat surface.
//!
//! Works against OpenAI itself as well as the many hosted gateways that
//! speak the same `/chat/completions` contract (OpenRouter, SiliconFlow,
//! self-hosted inference servers, ...).  Requests go through the crate's
//! shared pooled HTTP client.
//!
//! Failures are classified for the retry policy in
//! [`ChatAgent::think`](crate::ChatAgent::think): HTTP 429 is a rate limit,
//! request timeouts and 5xx responses are transient, everything else is
//! fatal.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::chatmesh::agent::{chat_to_prompt, AgentBackend, BackendError, PromptRole};
use crate::chatmesh::memory::AgentChat;
use crate::chatmesh::transport::shared_http_client;

/// Chat-completions client for an OpenAI-compatible endpoint.
pub struct OpenAiCompatibleBackend {
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }

    fn request_body(&self, prompt: &str, chat: &AgentChat) -> Value {
        let mut messages = vec![json!({ "role": "system", "content": prompt })];
        for entry in chat_to_prompt(chat) {
            let role = match entry.role {
                PromptRole::System => "system",
                PromptRole::User => "user",
                PromptRole::Assistant => "assistant",
            };
            messages.push(json!({ "role": role, "content": entry.content }));
        }
        json!({ "model": self.model, "messages": messages })
    }
}

#[async_trait]
impl AgentBackend for OpenAiCompatibleBackend {
    async fn generate(&self, prompt: &str, chat: &AgentChat) -> Result<String, BackendError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let body = self.request_body(prompt, chat);

        let response = shared_http_client()
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout
                } else {
                    BackendError::Transient(e.to_string())
                }
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| BackendError::Transient(e.to_string()))?;

        if status.as_u16() == 429 {
            return Err(BackendError::RateLimited(text));
        }
        if status.is_server_error() {
            return Err(BackendError::Transient(format!("{}: {}", status, text)));
        }
        if !status.is_success() {
            return Err(BackendError::Fatal(format!("{}: {}", status, text)));
        }

        if log::log_enabled!(log::Level::Debug) {
            log::debug!("chat completions response: {}", text);
        }

        let payload: Value = serde_json::from_str(&text)
            .map_err(|e| BackendError::Fatal(format!("malformed response body: {}", e)))?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(|content| content.to_string())
            .ok_or_else(|| BackendError::Fatal("response carried no message content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chatmesh::dto::Message;

    #[test]
    fn test_request_body_shape() {
        let backend = OpenAiCompatibleBackend::new("https://api.example.com/v1", "key", "test-model");
        let mut chat = AgentChat::new("c1", "jack");
        chat.add_message(Message {
            message_id: "m1".into(),
            chat_id: "c1".into(),
            from_member_id: "tom".into(),
            from_member_name: "Tom".into(),
            message_type: "text".into(),
            message: "hello".into(),
            timestamp: "t1".into(),
        });

        let body = backend.request_body("be nice", &chat);
        assert_eq!(body["model"], "test-model");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "be nice");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "Tom: hello");
    }
}
